//! Minimum-interval spacing for calls to slow or quota-limited upstreams.

use std::future::Future;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep};
use tracing::debug;

/// Spaces successive operations by a minimum interval.
///
/// The gap is measured from the moment the previous throttled operation
/// finished (successfully or not) to the moment the next one starts. The
/// first call runs immediately. Each limiter instance carries its own
/// timing state; callers that must share one upstream quota share one
/// limiter.
///
/// Calls lock the internal state for the full wait-run-update cycle, so
/// concurrent callers serialize instead of racing past a stale timestamp.
pub struct RateLimiter {
    min_interval: Duration,
    last_completion: Mutex<Option<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_completion: Mutex::const_new(None),
        }
    }

    /// Runs `op` once the configured interval has elapsed since the previous
    /// throttled call completed.
    ///
    /// Errors from `op` propagate unchanged, but still count as a completion
    /// so a failing upstream is not hammered.
    pub async fn throttle<F>(&self, op: F) -> F::Output
    where
        F: Future,
    {
        let mut last = self.last_completion.lock().await;

        if let Some(previous) = *last {
            let since_last = previous.elapsed();
            if since_last < self.min_interval {
                let wait = self.min_interval - since_last;
                debug!(?wait, "throttling upstream call");
                sleep(wait).await;
            }
        }

        let output = op.await;
        *last = Some(Instant::now());
        output
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    const INTERVAL: Duration = Duration::from_millis(333);
    const TOLERANCE: Duration = Duration::from_millis(100);

    fn gaps(starts: &[Instant]) -> Vec<Duration> {
        starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn first_call_runs_immediately() {
        let limiter = RateLimiter::new(INTERVAL);
        let before = Instant::now();
        let result = limiter.throttle(async { 42 }).await;
        assert_eq!(result, 42);
        assert_eq!(Instant::now() - before, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_calls_are_spaced() {
        let limiter = RateLimiter::new(INTERVAL);
        let starts = Arc::new(StdMutex::new(Vec::new()));

        for _ in 0..4 {
            let starts = Arc::clone(&starts);
            limiter
                .throttle(async move {
                    starts.lock().unwrap().push(Instant::now());
                })
                .await;
        }

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 4);
        for gap in gaps(&starts) {
            assert!(gap >= INTERVAL, "gap {gap:?} shorter than the interval");
            assert!(gap < INTERVAL + TOLERANCE, "gap {gap:?} overshoots");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_serialize() {
        let limiter = Arc::new(RateLimiter::new(INTERVAL));
        let starts = Arc::new(StdMutex::new(Vec::new()));

        let run = |limiter: Arc<RateLimiter>, starts: Arc<StdMutex<Vec<Instant>>>| async move {
            limiter
                .throttle(async move {
                    starts.lock().unwrap().push(Instant::now());
                })
                .await;
        };

        tokio::join!(
            run(Arc::clone(&limiter), Arc::clone(&starts)),
            run(Arc::clone(&limiter), Arc::clone(&starts)),
            run(Arc::clone(&limiter), Arc::clone(&starts)),
        );

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        for gap in gaps(&starts) {
            assert!(gap >= INTERVAL, "concurrent gap {gap:?} under the interval");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_propagate_and_still_pace() {
        let limiter = RateLimiter::new(INTERVAL);

        let before = Instant::now();
        let result: Result<u32, String> = limiter.throttle(async { Err("boom".to_string()) }).await;
        assert_eq!(result.unwrap_err(), "boom");

        let mut second_start = None;
        let _: Result<u32, String> = limiter
            .throttle(async {
                second_start = Some(Instant::now());
                Ok(7)
            })
            .await;

        let gap = second_start.unwrap() - before;
        assert!(gap >= INTERVAL, "failed call did not update the pace");
    }
}
