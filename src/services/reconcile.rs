//! The periodic pass that keeps the store, the catalog, and the downstream
//! consumer in agreement.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::clients::{VideoCatalog, VideoRegistrar};
use crate::db::{DeleteOutcome, EpisodeStore, StoreError};
use crate::domain::VideoKey;
use crate::services::completion::CompletionDetector;

/// Errors specific to a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{service} error: {message}")]
    Upstream { service: String, message: String },
}

impl ReconcileError {
    fn upstream(service: &str, err: &anyhow::Error) -> Self {
        Self::Upstream {
            service: service.to_string(),
            message: err.to_string(),
        }
    }
}

/// Counters for one reconciliation run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
    pub titles_checked: usize,
    pub new_videos: usize,
    pub completed: usize,
}

/// Runs the two reconciliation phases: registration, then cleanup.
pub struct Reconciler {
    store: Arc<dyn EpisodeStore>,
    catalog: Arc<dyn VideoCatalog>,
    registrar: Arc<dyn VideoRegistrar>,
    detector: CompletionDetector,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        store: Arc<dyn EpisodeStore>,
        catalog: Arc<dyn VideoCatalog>,
        registrar: Arc<dyn VideoRegistrar>,
        detector: CompletionDetector,
    ) -> Self {
        Self {
            store,
            catalog,
            registrar,
            detector,
        }
    }

    /// One full pass. Phases run sequentially; the first failure aborts the
    /// run and the next scheduled run starts over. A failed run advances
    /// nothing it did not already emit, and everything it emits is safe to
    /// emit again.
    pub async fn run_once(&self) -> Result<ReconcileStats, ReconcileError> {
        let mut stats = ReconcileStats::default();

        self.register_new_videos(&mut stats).await?;
        self.cleanup_completed_series(&mut stats).await?;

        info!(
            titles = stats.titles_checked,
            new_videos = stats.new_videos,
            completed = stats.completed,
            "reconciliation finished"
        );
        metrics::counter!("reconcile_runs_total").increment(1);
        metrics::counter!("videos_registered_total").increment(stats.new_videos as u64);
        metrics::counter!("titles_purged_total").increment(stats.completed as u64);

        Ok(stats)
    }

    /// Diffs every tracked title against the catalog and sends all newly
    /// available videos downstream as one combined request.
    async fn register_new_videos(&self, stats: &mut ReconcileStats) -> Result<(), ReconcileError> {
        let titles = self.store.list_all().await?;
        stats.titles_checked = titles.len();

        let mut new_videos: Vec<VideoKey> = Vec::new();
        for title in &titles {
            let upstream = self
                .catalog
                .list_episodes(title.key.mal_id, &title.key.dub)
                .await
                .map_err(|e| ReconcileError::upstream("catalog", &e))?;

            let fresh = upstream
                .into_iter()
                .filter(|episode| !title.episodes.contains(episode))
                .map(|episode| VideoKey::new(title.key.mal_id, title.key.dub.clone(), episode));
            let before = new_videos.len();
            new_videos.extend(fresh);

            if new_videos.len() > before {
                debug!(
                    title = %title.key,
                    count = new_videos.len() - before,
                    "catalog has unregistered episodes"
                );
            }
        }

        if new_videos.is_empty() {
            debug!("no new videos to register");
            return Ok(());
        }

        info!(count = new_videos.len(), "registering new videos");
        self.registrar
            .register_videos(&new_videos)
            .await
            .map_err(|e| ReconcileError::upstream("registrar", &e))?;
        stats.new_videos = new_videos.len();

        Ok(())
    }

    /// Re-reads the tracked set and purges every title the detector judges
    /// complete.
    async fn cleanup_completed_series(
        &self,
        stats: &mut ReconcileStats,
    ) -> Result<(), ReconcileError> {
        let titles = self.store.list_all().await?;

        for title in titles {
            let complete = self
                .detector
                .is_complete(&title.key, title.updated_at, &title.episodes)
                .await
                .map_err(|e| ReconcileError::upstream("series info", &e))?;

            if !complete {
                continue;
            }

            match self.store.delete(&title.key).await? {
                DeleteOutcome::Deleted => {
                    info!(
                        title = %title.key,
                        last_episode = title.last_episode(),
                        "title complete, purged from tracking"
                    );
                    stats.completed += 1;
                }
                DeleteOutcome::NotFound => {
                    debug!(title = %title.key, "title already purged");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::SeriesInfoSource;
    use crate::db::MemoryStore;
    use crate::domain::{MalId, TitleKey};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex;

    struct FakeCatalog {
        episodes: HashMap<String, Vec<u32>>,
        fail: bool,
    }

    impl FakeCatalog {
        fn new(entries: &[(i32, &str, &[u32])]) -> Arc<Self> {
            let episodes = entries
                .iter()
                .map(|&(id, dub, eps)| (TitleKey::new(id, dub).storage_key(), eps.to_vec()))
                .collect();
            Arc::new(Self {
                episodes,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                episodes: HashMap::new(),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl VideoCatalog for FakeCatalog {
        async fn list_episodes(&self, mal_id: MalId, dub: &str) -> Result<Vec<u32>> {
            if self.fail {
                anyhow::bail!("catalog down");
            }
            let key = TitleKey::new(mal_id, dub).storage_key();
            Ok(self.episodes.get(&key).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct RecordingRegistrar {
        requests: Mutex<Vec<Vec<VideoKey>>>,
        fail: bool,
    }

    #[async_trait]
    impl VideoRegistrar for RecordingRegistrar {
        async fn register_videos(&self, keys: &[VideoKey]) -> Result<()> {
            if self.fail {
                anyhow::bail!("registrar down");
            }
            self.requests.lock().unwrap().push(keys.to_vec());
            Ok(())
        }
    }

    struct FakeInfo {
        expected: HashMap<i32, u32>,
    }

    impl FakeInfo {
        fn new(entries: &[(i32, u32)]) -> Arc<Self> {
            Arc::new(Self {
                expected: entries.iter().copied().collect(),
            })
        }

        fn unknown() -> Arc<Self> {
            Arc::new(Self {
                expected: HashMap::new(),
            })
        }
    }

    #[async_trait]
    impl SeriesInfoSource for FakeInfo {
        async fn expected_last_episode(&self, mal_id: MalId) -> Result<Option<u32>> {
            Ok(self.expected.get(&mal_id.value()).copied())
        }
    }

    fn eps(nums: &[u32]) -> BTreeSet<u32> {
        nums.iter().copied().collect()
    }

    fn reconciler(
        store: &Arc<MemoryStore>,
        catalog: Arc<FakeCatalog>,
        registrar: &Arc<RecordingRegistrar>,
        info: Arc<FakeInfo>,
    ) -> Reconciler {
        let detector = CompletionDetector::new(info as Arc<dyn SeriesInfoSource>, 72, 0);
        Reconciler::new(
            Arc::clone(store) as Arc<dyn EpisodeStore>,
            catalog,
            Arc::clone(registrar) as Arc<dyn VideoRegistrar>,
            detector,
        )
    }

    #[tokio::test]
    async fn emits_exactly_the_missing_episodes() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_new(&TitleKey::new(21, "en"), &eps(&[1, 2]))
            .await
            .unwrap();
        let registrar = Arc::new(RecordingRegistrar::default());
        let rec = reconciler(
            &store,
            FakeCatalog::new(&[(21, "en", &[1, 2, 3])]),
            &registrar,
            FakeInfo::unknown(),
        );

        let stats = rec.run_once().await.unwrap();
        assert_eq!(stats.new_videos, 1);

        let requests = registrar.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0], vec![VideoKey::new(21, "en", 3)]);

        // Unknown expected count defers the purge.
        assert!(store.get(&TitleKey::new(21, "en")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn nothing_new_sends_no_request() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_new(&TitleKey::new(21, "en"), &eps(&[1, 2, 3]))
            .await
            .unwrap();
        let registrar = Arc::new(RecordingRegistrar::default());
        let rec = reconciler(
            &store,
            FakeCatalog::new(&[(21, "en", &[1, 2, 3])]),
            &registrar,
            FakeInfo::unknown(),
        );

        let stats = rec.run_once().await.unwrap();
        assert_eq!(stats.new_videos, 0);
        assert!(registrar.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_episodes_across_titles_share_one_request() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_new(&TitleKey::new(7, "ja"), &eps(&[1]))
            .await
            .unwrap();
        store
            .insert_new(&TitleKey::new(9, "en"), &eps(&[1]))
            .await
            .unwrap();
        let registrar = Arc::new(RecordingRegistrar::default());
        let rec = reconciler(
            &store,
            FakeCatalog::new(&[(7, "ja", &[1, 2]), (9, "en", &[1, 2])]),
            &registrar,
            FakeInfo::unknown(),
        );

        let stats = rec.run_once().await.unwrap();
        assert_eq!(stats.new_videos, 2);

        let requests = registrar.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].len(), 2);
    }

    #[tokio::test]
    async fn completed_titles_are_purged_and_airing_ones_kept() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_new(&TitleKey::new(7, "ja"), &eps(&[10, 11, 12]))
            .await
            .unwrap();
        store
            .insert_new(&TitleKey::new(9, "en"), &eps(&[1, 2, 3]))
            .await
            .unwrap();
        let registrar = Arc::new(RecordingRegistrar::default());
        let rec = reconciler(
            &store,
            FakeCatalog::new(&[(7, "ja", &[10, 11, 12]), (9, "en", &[1, 2, 3])]),
            &registrar,
            FakeInfo::new(&[(7, 12), (9, 24)]),
        );

        let stats = rec.run_once().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert!(store.get(&TitleKey::new(7, "ja")).await.unwrap().is_none());
        assert!(store.get(&TitleKey::new(9, "en")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn catalog_failure_aborts_before_anything_is_sent() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_new(&TitleKey::new(21, "en"), &eps(&[1]))
            .await
            .unwrap();
        let registrar = Arc::new(RecordingRegistrar::default());
        let rec = reconciler(&store, FakeCatalog::failing(), &registrar, FakeInfo::unknown());

        let result = rec.run_once().await;
        assert!(matches!(
            result,
            Err(ReconcileError::Upstream { ref service, .. }) if service == "catalog"
        ));
        assert!(registrar.requests.lock().unwrap().is_empty());
        assert!(store.get(&TitleKey::new(21, "en")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn registrar_failure_prevents_the_cleanup_phase() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_new(&TitleKey::new(7, "ja"), &eps(&[12]))
            .await
            .unwrap();
        let registrar = Arc::new(RecordingRegistrar {
            requests: Mutex::new(Vec::new()),
            fail: true,
        });
        // The title would be judged complete if cleanup ran.
        let rec = reconciler(
            &store,
            FakeCatalog::new(&[(7, "ja", &[12, 13])]),
            &registrar,
            FakeInfo::new(&[(7, 12)]),
        );

        let result = rec.run_once().await;
        assert!(matches!(
            result,
            Err(ReconcileError::Upstream { ref service, .. }) if service == "registrar"
        ));
        assert!(store.get(&TitleKey::new(7, "ja")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_store_is_a_quiet_run() {
        let store = Arc::new(MemoryStore::new());
        let registrar = Arc::new(RecordingRegistrar::default());
        let rec = reconciler(&store, FakeCatalog::new(&[]), &registrar, FakeInfo::unknown());

        let stats = rec.run_once().await.unwrap();
        assert_eq!(stats, ReconcileStats::default());
        assert!(registrar.requests.lock().unwrap().is_empty());
    }
}
