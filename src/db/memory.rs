//! In-process store, primarily for tests.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::{TitleKey, TrackedTitle};

use super::{DeleteOutcome, EpisodeStore, InsertOutcome, MergeOutcome, StoreError};

/// [`EpisodeStore`] over a lock-guarded map.
///
/// A single write lock per operation gives the same per-key atomicity the
/// SQLite store gets from conditional statements.
#[derive(Debug, Default)]
pub struct MemoryStore {
    titles: RwLock<BTreeMap<String, TrackedTitle>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EpisodeStore for MemoryStore {
    async fn get(&self, key: &TitleKey) -> Result<Option<TrackedTitle>, StoreError> {
        let titles = self.titles.read().await;
        Ok(titles.get(&key.storage_key()).cloned())
    }

    async fn insert_new(
        &self,
        key: &TitleKey,
        episodes: &BTreeSet<u32>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut titles = self.titles.write().await;
        if titles.contains_key(&key.storage_key()) {
            return Ok(InsertOutcome::AlreadyExists);
        }

        let now = Utc::now();
        titles.insert(
            key.storage_key(),
            TrackedTitle {
                key: key.clone(),
                episodes: episodes.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(InsertOutcome::Created)
    }

    async fn merge_add(
        &self,
        key: &TitleKey,
        episodes: &BTreeSet<u32>,
    ) -> Result<MergeOutcome, StoreError> {
        let mut titles = self.titles.write().await;
        let Some(title) = titles.get_mut(&key.storage_key()) else {
            return Ok(MergeOutcome::NotFound);
        };

        title.episodes.extend(episodes.iter().copied());
        title.updated_at = Utc::now();
        Ok(MergeOutcome::Updated)
    }

    async fn list_all(&self) -> Result<Vec<TrackedTitle>, StoreError> {
        let titles = self.titles.read().await;
        Ok(titles.values().cloned().collect())
    }

    async fn delete(&self, key: &TitleKey) -> Result<DeleteOutcome, StoreError> {
        let mut titles = self.titles.write().await;
        if titles.remove(&key.storage_key()).is_some() {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }
}
