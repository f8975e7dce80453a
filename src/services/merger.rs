//! Idempotent merge of observed videos into the tracked-title store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::db::{EpisodeStore, InsertOutcome, MergeOutcome, StoreError};
use crate::domain::TitleKey;
use crate::notifications::NotificationBatch;

/// Counters for one processed batch.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MergeStats {
    /// Distinct titles in the batch.
    pub titles_seen: usize,
    /// Titles tracked for the first time.
    pub created: usize,
    /// Episodes actually new to the store.
    pub episodes_added: usize,
    /// Conditional writes lost to a concurrent writer; redelivery settles
    /// these.
    pub conflicts: usize,
}

/// Applies notification batches to the store.
///
/// Batches arrive at-least-once and unordered, so every step is an upsert
/// shaped to converge: the same batch applied twice leaves the store exactly
/// as one application did.
pub struct NotificationMerger {
    store: Arc<dyn EpisodeStore>,
}

impl NotificationMerger {
    #[must_use]
    pub fn new(store: Arc<dyn EpisodeStore>) -> Self {
        Self { store }
    }

    /// Groups the batch by title and merges each group.
    ///
    /// A store backend error aborts the whole batch; there is no
    /// partial-batch isolation. The caller retries the batch and the writes
    /// that already landed replay as no-ops.
    pub async fn process(&self, batch: &NotificationBatch) -> Result<MergeStats, StoreError> {
        let mut stats = MergeStats::default();

        if batch.is_empty() {
            debug!("no videos to process");
            return Ok(stats);
        }

        let mut grouped: BTreeMap<TitleKey, BTreeSet<u32>> = BTreeMap::new();
        for item in &batch.items {
            grouped
                .entry(item.video_key.title_key())
                .or_default()
                .insert(item.video_key.episode);
        }
        stats.titles_seen = grouped.len();

        for (key, observed) in &grouped {
            self.process_title(&mut stats, key, observed).await?;
        }

        metrics::counter!("notification_batches_total").increment(1);
        metrics::counter!("episodes_added_total").increment(stats.episodes_added as u64);

        Ok(stats)
    }

    async fn process_title(
        &self,
        stats: &mut MergeStats,
        key: &TitleKey,
        observed: &BTreeSet<u32>,
    ) -> Result<(), StoreError> {
        let Some(existing) = self.store.get(key).await? else {
            match self.store.insert_new(key, observed).await? {
                InsertOutcome::Created => {
                    info!(title = %key, episodes = observed.len(), "tracking new title");
                    stats.created += 1;
                    stats.episodes_added += observed.len();
                }
                InsertOutcome::AlreadyExists => {
                    warn!(title = %key, "title created concurrently, leaving for redelivery");
                    stats.conflicts += 1;
                }
            }
            return Ok(());
        };

        let new_ones: BTreeSet<u32> = observed
            .difference(&existing.episodes)
            .copied()
            .collect();

        if new_ones.is_empty() {
            debug!(title = %key, "no new episodes in batch");
            return Ok(());
        }

        match self.store.merge_add(key, &new_ones).await? {
            MergeOutcome::Updated => {
                info!(title = %key, added = new_ones.len(), "merged new episodes");
                stats.episodes_added += new_ones.len();
            }
            MergeOutcome::NotFound => {
                warn!(title = %key, "title purged concurrently, dropping episodes");
                stats.conflicts += 1;
            }
        }

        Ok(())
    }
}
