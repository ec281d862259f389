use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::ApiError,
    middleware::auth::AppUser,
    repository::{ConfidenceStatistics, PredictionSummary, StoredPrediction},
    routes::{LimitParams, clamp_limit},
    state::AppState,
};

pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const MAX_HISTORY_LIMIT: usize = 100;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/analytics/summary", get(summary))
        .route("/predictions/history", get(history))
        .route("/results/statistics", get(statistics))
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub total_predictions: usize,
    pub limit: usize,
    pub recent_predictions: Vec<StoredPrediction>,
}

#[utoipa::path(
    get,
    path = "/analytics/summary",
    tag = "analytics",
    responses(
        (status = 200, description = "Aggregate counts over stored predictions; the caller's own when authenticated", body = PredictionSummary)
    )
)]
#[tracing::instrument(name = "GET /api/analytics/summary", skip(state, user))]
pub async fn summary(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
) -> Result<Json<PredictionSummary>, ApiError> {
    let summary = state.repository.summary(user.user_id()).await?;
    Ok(Json(summary))
}

#[utoipa::path(
    get,
    path = "/predictions/history",
    tag = "analytics",
    params(
        ("limit" = Option<i64>, Query, description = "Number of records, 1 to 100 (default 10)")
    ),
    responses(
        (status = 200, description = "Most recent predictions, newest first", body = HistoryResponse)
    )
)]
#[tracing::instrument(name = "GET /api/predictions/history", skip(state, user))]
pub async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
    Query(params): Query<LimitParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = clamp_limit(params.limit, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT);
    let owner = user.user_id();

    let total_predictions = state.repository.count(owner).await? as usize;
    let recent_predictions = state.repository.recent(limit, owner).await?;

    Ok(Json(HistoryResponse {
        total_predictions,
        limit,
        recent_predictions,
    }))
}

#[utoipa::path(
    get,
    path = "/results/statistics",
    tag = "analytics",
    responses(
        (status = 200, description = "Confidence statistics over stored predictions", body = ConfidenceStatistics),
        (status = 404, description = "No prediction data available")
    )
)]
#[tracing::instrument(name = "GET /api/results/statistics", skip(state, user))]
pub async fn statistics(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
) -> Result<Json<ConfidenceStatistics>, ApiError> {
    state
        .repository
        .statistics(user.user_id())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No prediction data available"))
}
