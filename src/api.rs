//! HTTP surface: notification ingest plus a small read API.
//!
//! Ingest is the at-least-once delivery channel, so the handler accepts
//! redelivered batches without complaint; the merge layer makes them no-ops.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::{EpisodeStore, StoreError};
use crate::domain::{MalId, TitleKey, TrackedTitle};
use crate::notifications::{self, NotificationError};
use crate::retry::retry;
use crate::services::MergeStats;
use crate::state::SharedState;

use chrono::SecondsFormat;
use tokio::sync::RwLock;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    DatabaseError(String),

    ValidationError(String),

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(msg) => ApiError::DatabaseError(msg),
            StoreError::Corrupt { .. } => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<NotificationError> for ApiError {
    fn from(err: NotificationError) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl ApiError {
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        ApiError::NotFound(format!("{} {} not found", resource, id))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::ValidationError(msg.into())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn EpisodeStore> {
        &self.shared.store
    }
}

#[must_use]
pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/notifications", post(ingest_notifications))
        .route("/api/titles", get(list_titles))
        .route("/api/titles/{id}/{dub}", get(get_title))
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
pub struct TitleSummaryDto {
    pub mal_id: i32,
    pub dub: String,
    pub episode_count: usize,
    pub first_episode: Option<u32>,
    pub last_episode: Option<u32>,
    pub updated_at: String,
}

impl From<&TrackedTitle> for TitleSummaryDto {
    fn from(title: &TrackedTitle) -> Self {
        Self {
            mal_id: title.key.mal_id.value(),
            dub: title.key.dub.clone(),
            episode_count: title.episodes.len(),
            first_episode: title.first_episode(),
            last_episode: title.last_episode(),
            updated_at: title
                .updated_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TitleDetailDto {
    pub mal_id: i32,
    pub dub: String,
    pub episodes: Vec<u32>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&TrackedTitle> for TitleDetailDto {
    fn from(title: &TrackedTitle) -> Self {
        Self {
            mal_id: title.key.mal_id.value(),
            dub: title.key.dub.clone(),
            episodes: title.episodes.iter().copied().collect(),
            created_at: title
                .created_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            updated_at: title
                .updated_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// `POST /api/notifications`
///
/// Accepts one inbound notification batch. Malformed JSON or an invalid key
/// rejects the whole batch with 400; nothing is partially applied before
/// parsing succeeds. Store failures abort the batch after the configured
/// retries, and the sender is expected to redeliver.
pub async fn ingest_notifications(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<ApiResponse<MergeStats>>, ApiError> {
    let batch = notifications::parse_batch(&body)?;
    batch.validate()?;

    let retries = state.config().read().await.tracking.notification_retries;
    let merger = state.shared.merger.clone();
    let stats = retry(retries, || merger.process(&batch)).await?;

    Ok(Json(ApiResponse::success(stats)))
}

/// `GET /api/titles`
pub async fn list_titles(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<TitleSummaryDto>>>, ApiError> {
    let titles = state.store().list_all().await?;
    let dtos: Vec<TitleSummaryDto> = titles.iter().map(TitleSummaryDto::from).collect();
    Ok(Json(ApiResponse::success(dtos)))
}

/// `GET /api/titles/{id}/{dub}`
pub async fn get_title(
    State(state): State<Arc<AppState>>,
    Path((id, dub)): Path<(i32, String)>,
) -> Result<Json<ApiResponse<TitleDetailDto>>, ApiError> {
    if id < 0 {
        return Err(ApiError::validation("title id must be non-negative"));
    }

    let key = TitleKey::new(MalId::new(id), dub);
    match state.store().get(&key).await? {
        Some(title) => Ok(Json(ApiResponse::success(TitleDetailDto::from(&title)))),
        None => Err(ApiError::not_found("Title", &key)),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub uptime_seconds: u64,
}

/// `GET /health`
///
/// Liveness plus a store ping; 503 when the database is unreachable.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let database = state.store().ping().await.is_ok();

    let body = HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    };

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ApiResponse::success(body))).into_response()
}

/// `GET /metrics`
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.prometheus_handle.as_ref().map_or_else(
        || "Metrics not enabled or failed to initialize".to_string(),
        metrics_exporter_prometheus::PrometheusHandle::render,
    )
}
