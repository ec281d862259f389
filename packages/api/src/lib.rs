use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State as AxumState},
    middleware::from_fn_with_state,
    routing::get,
};
use middleware::auth::auth_middleware;
use serde::Serialize;
use state::{AppState, State};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, decompression::RequestDecompressionLayer,
    services::ServeDir, trace::TraceLayer,
};
use utoipa::OpenApi;

pub mod entity;
mod middleware;
mod routes;

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod openapi;
pub mod pipeline;
pub mod repository;
pub mod state;
pub mod uploads;

pub use axum;
pub use middleware::auth::AppUser;
pub use sea_orm;

pub fn construct_router(state: Arc<State>) -> Router {
    let api = Router::new()
        .nest("/predict", routes::predict::routes())
        .nest("/debug", routes::debug::routes())
        .nest("/health", routes::health::routes())
        .nest("/auth", routes::auth::routes())
        .merge(routes::info::routes())
        .merge(routes::analytics::routes())
        .route("/openapi.json", get(openapi_json));

    Router::new()
        .route("/", get(api_info))
        .nest("/api", api)
        .with_state(state.clone())
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        .layer(DefaultBodyLimit::max(state.config.body_limit()))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(
            ServiceBuilder::new()
                .layer(RequestDecompressionLayer::new())
                .layer(CompressionLayer::new()),
        )
}

#[derive(Serialize)]
struct ApiInfo {
    title: &'static str,
    description: &'static str,
    version: &'static str,
    model_loaded: bool,
    label_table: String,
    classes: Vec<String>,
    input_size: String,
    endpoints: BTreeMap<&'static str, &'static str>,
}

#[tracing::instrument(name = "GET /", skip(state))]
async fn api_info(AxumState(state): AxumState<AppState>) -> Json<ApiInfo> {
    let adapter = state.pipeline.adapter();
    let (width, height) = state.pipeline.preprocessor().input_size();
    Json(ApiInfo {
        title: "NeuroScan API",
        description: "Brain MRI classification with confidence-aware results and prediction analytics",
        version: env!("CARGO_PKG_VERSION"),
        model_loaded: adapter.is_loaded(),
        label_table: adapter.labels().identity(),
        classes: adapter.labels().labels.clone(),
        input_size: format!("{}x{} pixels", width, height),
        endpoints: BTreeMap::from([
            ("/", "GET - API description"),
            ("/api/predict", "POST - Classify a single brain scan (multipart field 'image')"),
            ("/api/predict/batch", "POST - Classify several scans (repeated multipart field 'images')"),
            ("/api/debug/prediction", "POST - Raw model output for a scan, nothing stored"),
            ("/api/debug/class-order", "GET - Class order of the active label table"),
            ("/api/health", "GET - Health check and system status"),
            ("/api/classes", "GET - Available classes"),
            ("/api/model/info", "GET - Model information and thresholds"),
            ("/api/analytics/summary", "GET - Prediction statistics"),
            ("/api/predictions/history", "GET - Recent prediction history"),
            ("/api/results/statistics", "GET - Confidence statistics"),
            ("/api/auth/register", "POST - Create an account"),
            ("/api/auth/login", "POST - Obtain a bearer token"),
            ("/api/auth/verify", "GET - Check a bearer token"),
            ("/api/auth/logout", "POST - Revoke a bearer token"),
            ("/api/openapi.json", "GET - OpenAPI document"),
            ("/uploads/{filename}", "GET - Serve stored uploads"),
        ]),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDoc::openapi())
}
