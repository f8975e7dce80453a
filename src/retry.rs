//! Bounded retries for the at-least-once ingest path.

use std::future::Future;

use tracing::warn;

/// Runs `op` up to `attempts` times, returning the first success or the last
/// error. Intermediate failures are logged at warn level.
///
/// The work between attempts must be idempotent; the notification path is
/// built on conditional writes, so re-running a partially applied batch is
/// safe.
pub async fn retry<T, E, F, Fut>(attempts: u32, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    debug_assert!(attempts > 0, "retry needs at least one attempt");
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!(attempt, max_attempts = attempts, error = %err, "attempt failed, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
