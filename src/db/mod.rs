//! Persistence for tracked titles.
//!
//! The engine sees storage as a key-value store with conditional-write
//! semantics: inserts fail when the key exists, merges and deletes fail when
//! it does not, and those races come back as tagged outcomes rather than
//! errors. [`Store`] is the SQLite implementation used by the daemon;
//! [`MemoryStore`] backs tests and ephemeral runs.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Statement, TransactionTrait,
};
use thiserror::Error;
use tracing::info;

use crate::domain::{TitleKey, TrackedTitle};
use crate::entities::tracked_title;

pub mod memory;
pub mod migrator;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt record for {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    /// Another writer created the key first.
    AlreadyExists,
}

/// Result of a conditional merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Updated,
    /// The key was deleted before the merge landed.
    NotFound,
}

/// Result of a conditional delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Key-value view of tracked titles with per-key atomic writes.
///
/// Concurrent-modification races surface as the tagged outcomes above, never
/// as errors; `StoreError` carries genuine backend failures only. Callers
/// treat `AlreadyExists`/`NotFound` as "someone else already advanced this
/// key" and move on; redelivery or the next scheduled run reconciles.
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    /// Fetches one tracked title. No side effects.
    async fn get(&self, key: &TitleKey) -> Result<Option<TrackedTitle>, StoreError>;

    /// Backend liveness check for health probes.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Creates a title with its first observed episodes, failing the
    /// condition if the key already exists. Sets `created_at = updated_at`.
    /// Callers pass non-empty sets; a tracked title never exists without
    /// episodes.
    async fn insert_new(
        &self,
        key: &TitleKey,
        episodes: &BTreeSet<u32>,
    ) -> Result<InsertOutcome, StoreError>;

    /// Unions `episodes` into an existing title and bumps `updated_at`,
    /// failing the condition if the key is gone. Idempotent under redelivery
    /// of the same episode numbers.
    async fn merge_add(
        &self,
        key: &TitleKey,
        episodes: &BTreeSet<u32>,
    ) -> Result<MergeOutcome, StoreError>;

    /// All tracked titles, ordered by storage key. May be eventually
    /// consistent with in-flight writes.
    async fn list_all(&self) -> Result<Vec<TrackedTitle>, StoreError>;

    /// Removes a title, conditional on existence.
    async fn delete(&self, key: &TitleKey) -> Result<DeleteOutcome, StoreError>;
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_iso(key: &str, field: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            detail: format!("bad {field} timestamp {value:?}: {e}"),
        })
}

fn decode_episodes(key: &str, raw: &str) -> Result<BTreeSet<u32>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        detail: format!("bad episode set: {e}"),
    })
}

fn encode_episodes(episodes: &BTreeSet<u32>) -> String {
    // A set of integers always serializes.
    serde_json::to_string(episodes).unwrap_or_else(|_| "[]".to_string())
}

fn row_to_title(row: tracked_title::Model) -> Result<TrackedTitle, StoreError> {
    let episodes = decode_episodes(&row.title_key, &row.episodes)?;
    let created_at = parse_iso(&row.title_key, "created_at", &row.created_at)?;
    let updated_at = parse_iso(&row.title_key, "updated_at", &row.updated_at)?;
    Ok(TrackedTitle {
        key: TitleKey::new(row.mal_id, row.dub),
        episodes,
        created_at,
        updated_at,
    })
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }
}

#[async_trait]
impl EpisodeStore for Store {
    async fn get(&self, key: &TitleKey) -> Result<Option<TrackedTitle>, StoreError> {
        let row = tracked_title::Entity::find_by_id(key.storage_key())
            .one(&self.conn)
            .await?;
        row.map(row_to_title).transpose()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    async fn insert_new(
        &self,
        key: &TitleKey,
        episodes: &BTreeSet<u32>,
    ) -> Result<InsertOutcome, StoreError> {
        let now = now_iso();
        let model = tracked_title::ActiveModel {
            title_key: Set(key.storage_key()),
            mal_id: Set(key.mal_id.value()),
            dub: Set(key.dub.clone()),
            episodes: Set(encode_episodes(episodes)),
            created_at: Set(now.clone()),
            updated_at: Set(now),
        };

        // INSERT .. ON CONFLICT DO NOTHING keeps the existence check and the
        // write in one statement, the same shape as a conditional put.
        let inserted = tracked_title::Entity::insert(model)
            .on_conflict(
                OnConflict::column(tracked_title::Column::TitleKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;

        if inserted == 0 {
            Ok(InsertOutcome::AlreadyExists)
        } else {
            Ok(InsertOutcome::Created)
        }
    }

    async fn merge_add(
        &self,
        key: &TitleKey,
        episodes: &BTreeSet<u32>,
    ) -> Result<MergeOutcome, StoreError> {
        let txn = self.conn.begin().await?;

        let Some(row) = tracked_title::Entity::find_by_id(key.storage_key())
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(MergeOutcome::NotFound);
        };

        let mut merged = decode_episodes(&row.title_key, &row.episodes)?;
        merged.extend(episodes.iter().copied());

        let mut active: tracked_title::ActiveModel = row.into();
        active.episodes = Set(encode_episodes(&merged));
        active.updated_at = Set(now_iso());
        sea_orm::ActiveModelTrait::update(active, &txn).await?;

        txn.commit().await?;
        Ok(MergeOutcome::Updated)
    }

    async fn list_all(&self) -> Result<Vec<TrackedTitle>, StoreError> {
        let rows = tracked_title::Entity::find()
            .order_by_asc(tracked_title::Column::TitleKey)
            .all(&self.conn)
            .await?;
        rows.into_iter().map(row_to_title).collect()
    }

    async fn delete(&self, key: &TitleKey) -> Result<DeleteOutcome, StoreError> {
        let result = tracked_title::Entity::delete_many()
            .filter(tracked_title::Column::TitleKey.eq(key.storage_key()))
            .exec(&self.conn)
            .await?;

        if result.rows_affected == 0 {
            Ok(DeleteOutcome::NotFound)
        } else {
            Ok(DeleteOutcome::Deleted)
        }
    }
}
