use axum::{Json, Router, extract::State, routing::get};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(health))
        .route("/db", get(db_health))
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` when the model or the store is unavailable
    pub status: String,
    pub model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_error: Option<String>,
    pub label_table: String,
    pub database: DbHealthResponse,
    pub upload_dir_exists: bool,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DbHealthResponse {
    pub backend: String,
    /// `ok` or `error`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<u128>,
}

async fn probe_store(state: &AppState) -> DbHealthResponse {
    let backend = state.repository.backend_name().to_string();
    match state.repository.ping().await {
        Ok(rtt) => DbHealthResponse {
            backend,
            status: "ok".to_string(),
            rtt_ms: Some(rtt.as_millis()),
        },
        Err(e) => {
            tracing::warn!("Health probe of {} store failed: {}", backend, e);
            DbHealthResponse {
                backend,
                status: "error".to_string(),
                rtt_ms: None,
            }
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service status", body = HealthResponse)
    )
)]
#[tracing::instrument(name = "GET /api/health", skip(state))]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let adapter = state.pipeline.adapter();
    let database = probe_store(&state).await;
    let healthy = adapter.is_loaded() && database.status == "ok";

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        model_loaded: adapter.is_loaded(),
        model_error: adapter.unavailable_reason().map(str::to_string),
        label_table: adapter.labels().identity(),
        database,
        upload_dir_exists: state.pipeline.uploads().exists(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}

#[utoipa::path(
    get,
    path = "/health/db",
    tag = "health",
    responses(
        (status = 200, description = "Prediction store health check with round-trip time", body = DbHealthResponse)
    )
)]
#[tracing::instrument(name = "GET /api/health/db", skip(state))]
pub async fn db_health(State(state): State<AppState>) -> Json<DbHealthResponse> {
    Json(probe_store(&state).await)
}
