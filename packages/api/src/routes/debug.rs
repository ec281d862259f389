use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::{get, post},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::ApiError,
    pipeline::RawInspection,
    routes::{predict::ImageUpload, single_image},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/prediction", post(debug_prediction))
        .route("/class-order", get(class_order))
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DebugPredictionResponse {
    pub filename: String,
    pub label_table: String,
    pub min_confidence: f32,
    /// Whether the normal endpoint would have rejected this prediction
    pub below_threshold: bool,
    #[serde(flatten)]
    pub inspection: RawInspection,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClassOrderResponse {
    pub label_table: String,
    pub current_class_order: Vec<String>,
    pub class_indices: BTreeMap<String, usize>,
    pub no_tumor_label: String,
    pub note: String,
}

#[utoipa::path(
    post,
    path = "/debug/prediction",
    tag = "debug",
    request_body(content = ImageUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Raw model output for the image; nothing is stored", body = DebugPredictionResponse),
        (status = 400, description = "Invalid image"),
        (status = 500, description = "Model not loaded")
    )
)]
#[tracing::instrument(name = "POST /api/debug/prediction", skip(state, multipart))]
pub async fn debug_prediction(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DebugPredictionResponse>, ApiError> {
    let image = single_image(&mut multipart, "image").await?;

    let pipeline = Arc::clone(&state.pipeline);
    let bytes = image.bytes.clone();
    let content_type = image.content_type.clone();
    let inspection =
        tokio::task::spawn_blocking(move || pipeline.inspect(&bytes, content_type.as_deref()))
            .await??;

    let min_confidence = state.pipeline.interpreter().min_confidence();
    Ok(Json(DebugPredictionResponse {
        filename: image.filename,
        label_table: state.pipeline.adapter().labels().identity(),
        min_confidence,
        below_threshold: inspection.confidence < min_confidence,
        inspection,
    }))
}

#[utoipa::path(
    get,
    path = "/debug/class-order",
    tag = "debug",
    responses(
        (status = 200, description = "Class order of the active label table", body = ClassOrderResponse)
    )
)]
#[tracing::instrument(name = "GET /api/debug/class-order", skip(state))]
pub async fn class_order(State(state): State<AppState>) -> Json<ClassOrderResponse> {
    let labels = state.pipeline.adapter().labels();
    Json(ClassOrderResponse {
        label_table: labels.identity(),
        current_class_order: labels.labels.clone(),
        class_indices: labels
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect(),
        no_tumor_label: labels.no_tumor_label.clone(),
        note: "Model output index i is reported as current_class_order[i]. \
               If predictions look systematically swapped, the label table does not match the training order."
            .to_string(),
    })
}
