use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clients::{CatalogClient, JikanClient, RegistrarClient};
use crate::config::Config;
use crate::db::{EpisodeStore, Store};
use crate::services::{CompletionDetector, NotificationMerger, Reconciler};

/// Build a shared HTTP client with reasonable defaults for API calls.
/// This client should be reused across all HTTP-based services to enable
/// connection pooling and avoid socket exhaustion.
fn build_shared_http_client(timeout_seconds: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_seconds))
        .user_agent("Ongoarr/1.0")
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build shared HTTP client: {e}"))
}

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Arc<dyn EpisodeStore>,

    pub merger: Arc<NotificationMerger>,

    /// `None` until both upstream endpoints are configured; ingest still
    /// works without them.
    pub reconciler: Option<Arc<Reconciler>>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        Self::with_store(config, Arc::new(store))
    }

    /// Wires the services around an already-open store. Tests hand in a
    /// `MemoryStore` here.
    pub fn with_store(config: Config, store: Arc<dyn EpisodeStore>) -> anyhow::Result<Self> {
        let merger = Arc::new(NotificationMerger::new(store.clone()));
        let reconciler = Self::build_reconciler(&config, store.clone())?;
        let config = Arc::new(RwLock::new(config));

        Ok(Self {
            config,
            store,
            merger,
            reconciler,
        })
    }

    fn build_reconciler(
        config: &Config,
        store: Arc<dyn EpisodeStore>,
    ) -> anyhow::Result<Option<Arc<Reconciler>>> {
        if config.catalog.base_url.is_empty() || config.registrar.base_url.is_empty() {
            return Ok(None);
        }

        // Create a shared HTTP client for all services that need HTTP
        // capabilities. This enables connection pooling and avoids socket
        // exhaustion.
        let timeout = config
            .catalog
            .request_timeout_seconds
            .max(config.registrar.request_timeout_seconds);
        let http_client = build_shared_http_client(timeout)?;

        let catalog = Arc::new(CatalogClient::with_shared_client(
            http_client.clone(),
            config.catalog.base_url.clone(),
            config.catalog.token.clone(),
        ));
        let registrar = Arc::new(RegistrarClient::with_shared_client(
            http_client.clone(),
            config.registrar.base_url.clone(),
            config.registrar.token.clone(),
        ));
        let jikan = Arc::new(JikanClient::with_shared_client(http_client));

        let detector = CompletionDetector::new(
            jikan,
            config.tracking.outdated_threshold_hours,
            config.tracking.completion_lookup_interval_ms,
        );

        Ok(Some(Arc::new(Reconciler::new(
            store, catalog, registrar, detector,
        ))))
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn ingest_only_config_skips_reconciler() {
        let mut config = Config::default();
        config.scheduler.enabled = false;

        let state = SharedState::with_store(config, Arc::new(MemoryStore::new())).unwrap();
        assert!(state.reconciler.is_none());
    }

    #[tokio::test]
    async fn full_config_builds_reconciler() {
        let mut config = Config::default();
        config.catalog.base_url = "http://catalog.local".to_string();
        config.registrar.base_url = "http://registrar.local".to_string();

        let state = SharedState::with_store(config, Arc::new(MemoryStore::new())).unwrap();
        assert!(state.reconciler.is_some());
    }
}
