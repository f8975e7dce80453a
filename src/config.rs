use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub scheduler: SchedulerConfig,

    pub tracking: TrackingConfig,

    pub catalog: UpstreamConfig,

    pub registrar: UpstreamConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    #[serde(default)]
    pub suppress_connection_errors: bool,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/ongoarr.db".to_string(),
            log_level: "info".to_string(),
            suppress_connection_errors: false,
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 6989,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    /// Hours between reconciliation runs.
    pub reconcile_interval_hours: u32,

    /// Six-field cron expression; overrides the interval when set.
    pub cron_expression: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        // Off by default: there is no sensible default catalog or registrar
        // endpoint, and validate() refuses an enabled scheduler without them.
        Self {
            enabled: false,
            reconcile_interval_hours: 6,
            cron_expression: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// A title not updated for this many hours is retired without asking the
    /// info service (default: 168 = one week).
    pub outdated_threshold_hours: u32,

    /// Minimum spacing between completion-info lookups in milliseconds
    /// (default: 1000, Jikan's public rate limit).
    pub completion_lookup_interval_ms: u64,

    /// Attempts per inbound notification batch before giving up (default: 3).
    pub notification_retries: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            outdated_threshold_hours: 168,
            completion_lookup_interval_ms: 1000,
            notification_retries: 3,
        }
    }
}

/// Connection settings for one HTTP upstream (catalog or registrar).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,

    /// Static bearer token, if the service wants one.
    pub token: Option<String>,

    pub request_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            tracking: TrackingConfig::default(),
            catalog: UpstreamConfig::default(),
            registrar: UpstreamConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("ongoarr").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".ongoarr").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracking.outdated_threshold_hours == 0 {
            anyhow::bail!("tracking.outdated_threshold_hours must be > 0");
        }

        if self.tracking.completion_lookup_interval_ms == 0 {
            anyhow::bail!("tracking.completion_lookup_interval_ms must be > 0");
        }

        if self.tracking.notification_retries == 0 {
            anyhow::bail!("tracking.notification_retries must be > 0");
        }

        if self.scheduler.enabled
            && self.scheduler.reconcile_interval_hours == 0
            && self.scheduler.cron_expression.is_none()
        {
            anyhow::bail!("Scheduler interval must be > 0 or cron expression must be set");
        }

        if self.scheduler.enabled {
            Self::require_upstream("catalog", &self.catalog)?;
            Self::require_upstream("registrar", &self.registrar)?;
        } else {
            Self::check_upstream_url("catalog", &self.catalog)?;
            Self::check_upstream_url("registrar", &self.registrar)?;
        }

        Ok(())
    }

    fn require_upstream(name: &str, upstream: &UpstreamConfig) -> Result<()> {
        if upstream.base_url.is_empty() {
            anyhow::bail!("{name}.base_url must be configured while the scheduler is enabled");
        }
        Self::check_upstream_url(name, upstream)
    }

    fn check_upstream_url(name: &str, upstream: &UpstreamConfig) -> Result<()> {
        if !upstream.base_url.is_empty() {
            url::Url::parse(&upstream.base_url)
                .with_context(|| format!("{name}.base_url is not a valid URL"))?;
        }
        Ok(())
    }
}
