//! Decides when a tracked title's run is over.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::clients::SeriesInfoSource;
use crate::domain::TitleKey;
use crate::rate_limit::RateLimiter;

/// Judges "complete" vs "still airing" for one tracked title.
///
/// Two signals feed the judgment: a staleness cutoff (a title nobody has
/// updated within the threshold is retired without asking anyone) and a
/// rate-limited lookup of the expected final episode count. The limiter is
/// owned here so every lookup in the process shares one pace.
pub struct CompletionDetector {
    info_source: Arc<dyn SeriesInfoSource>,
    limiter: RateLimiter,
    outdated_threshold: Duration,
}

impl CompletionDetector {
    #[must_use]
    pub fn new(
        info_source: Arc<dyn SeriesInfoSource>,
        outdated_threshold_hours: u32,
        lookup_interval_ms: u64,
    ) -> Self {
        Self {
            info_source,
            limiter: RateLimiter::new(std::time::Duration::from_millis(lookup_interval_ms)),
            outdated_threshold: Duration::hours(i64::from(outdated_threshold_hours)),
        }
    }

    /// Returns whether the title should be purged.
    ///
    /// Stale titles complete immediately, with no upstream call. An unknown
    /// expected count defers the decision; the title stays tracked and the
    /// staleness rule retires it eventually. Otherwise the run is complete
    /// once the highest observed episode reaches the expected final one;
    /// specials that number a single episode from 0 count as the final
    /// episode of a one-episode run.
    pub async fn is_complete(
        &self,
        key: &TitleKey,
        last_update: DateTime<Utc>,
        episodes: &BTreeSet<u32>,
    ) -> Result<bool> {
        let outdated_cutoff = Utc::now() - self.outdated_threshold;
        if last_update < outdated_cutoff {
            info!(title = %key, %last_update, "title is stale, completing without lookup");
            return Ok(true);
        }

        let expected = self
            .limiter
            .throttle(self.info_source.expected_last_episode(key.mal_id))
            .await?;

        let Some(expected) = expected.filter(|&count| count > 0) else {
            warn!(
                title = %key,
                "expected episode count unknown, deferring completion; audit if this persists"
            );
            return Ok(false);
        };

        let Some(observed) = episodes.last().copied() else {
            return Ok(false);
        };

        Ok(expected <= observed || (expected == 1 && observed == 0))
    }
}
