use std::collections::BTreeMap;

use axum::{Json, Router, extract::State, routing::get};
use neuroscan_vision::{
    inference::UNCERTAINTY_MARGIN,
    interpret::{HIGH_RELIABILITY, MEDIUM_RELIABILITY, class_descriptions},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/classes", get(classes))
        .route("/model/info", get(model_info))
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClassesResponse {
    pub classes: Vec<String>,
    pub total_classes: usize,
    pub no_tumor_label: String,
    pub description: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Thresholds {
    pub min_confidence: f32,
    pub uncertainty_margin: f32,
    pub high_reliability: f32,
    pub medium_reliability: f32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModelInfoResponse {
    pub model_loaded: bool,
    pub model_id: String,
    pub version: u32,
    pub model_format: Option<String>,
    pub source: Option<String>,
    /// `[batch, height, width, channels]`
    pub input_shape: Vec<usize>,
    pub output_width: usize,
    pub classes: Vec<String>,
    pub preprocessing: String,
    pub thresholds: Thresholds,
}

#[utoipa::path(
    get,
    path = "/classes",
    tag = "model",
    responses(
        (status = 200, description = "Classes of the active label table", body = ClassesResponse)
    )
)]
#[tracing::instrument(name = "GET /api/classes", skip(state))]
pub async fn classes(State(state): State<AppState>) -> Json<ClassesResponse> {
    let labels = state.pipeline.adapter().labels();
    Json(ClassesResponse {
        classes: labels.labels.clone(),
        total_classes: labels.len(),
        no_tumor_label: labels.no_tumor_label.clone(),
        description: class_descriptions(labels)
            .into_iter()
            .map(|(label, text)| (label, text.to_string()))
            .collect(),
    })
}

#[utoipa::path(
    get,
    path = "/model/info",
    tag = "model",
    responses(
        (status = 200, description = "Model, preprocessing and threshold configuration", body = ModelInfoResponse)
    )
)]
#[tracing::instrument(name = "GET /api/model/info", skip(state))]
pub async fn model_info(State(state): State<AppState>) -> Json<ModelInfoResponse> {
    let adapter = state.pipeline.adapter();
    let labels = adapter.labels();
    let descriptor = adapter.describe();
    let (width, height) = state.pipeline.preprocessor().input_size();

    Json(ModelInfoResponse {
        model_loaded: adapter.is_loaded(),
        model_id: labels.model_id.clone(),
        version: labels.version,
        model_format: descriptor.as_ref().map(|d| d.format.clone()),
        source: descriptor.as_ref().map(|d| d.source.clone()),
        input_shape: state.pipeline.preprocessor().shape().to_vec(),
        output_width: descriptor
            .and_then(|d| d.output_width)
            .unwrap_or(labels.len()),
        classes: labels.labels.clone(),
        preprocessing: format!(
            "Decode JPEG/PNG, convert to RGB, resize to {}x{}, scale pixel values to [0, 1]",
            width, height
        ),
        thresholds: Thresholds {
            min_confidence: state.pipeline.interpreter().min_confidence(),
            uncertainty_margin: UNCERTAINTY_MARGIN,
            high_reliability: HIGH_RELIABILITY,
            medium_reliability: MEDIUM_RELIABILITY,
        },
    })
}
