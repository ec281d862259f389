use std::collections::BTreeMap;

use axum::{
    Extension, Json, Router,
    extract::{Multipart, State},
    routing::post,
};
use chrono::{DateTime, Utc};
use neuroscan_vision::StageError;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    error::ApiError,
    middleware::auth::AppUser,
    pipeline::{PredictionOutcome, PredictionRequest, percent, probability_percentages},
    routes::{ClientAddr, UploadedImage, collect_images, single_image},
    state::AppState,
    uploads::upload_url,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(predict))
        .route("/batch", post(predict_batch))
}

/// Multipart body of `POST /api/predict`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ImageUpload {
    #[schema(value_type = String, format = Binary)]
    image: Vec<u8>,
}

/// Multipart body of `POST /api/predict/batch`; repeat `images` per file.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct BatchUpload {
    #[schema(value_type = Vec<String>)]
    images: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PredictionResponse {
    pub success: bool,
    pub prediction: String,
    pub display_name: String,
    /// Percent, two decimals
    pub confidence: f64,
    /// Percent per class, two decimals
    pub probabilities: BTreeMap<String, f64>,
    pub tumor_detected: bool,
    pub is_uncertain: bool,
    pub message: String,
    pub recommendation: String,
    pub reliability_level: String,
    pub processing_time_ms: u64,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl From<PredictionOutcome> for PredictionResponse {
    fn from(outcome: PredictionOutcome) -> Self {
        let PredictionOutcome {
            result,
            interpretation,
            filename,
            stored_filename,
            prediction_id,
            processing_time_ms,
            ..
        } = outcome;
        Self {
            success: true,
            confidence: percent(result.confidence),
            probabilities: probability_percentages(&result.probabilities),
            prediction: result.label,
            display_name: interpretation.display_name,
            tumor_detected: result.tumor_detected,
            is_uncertain: result.is_uncertain,
            message: interpretation.message,
            recommendation: interpretation.recommendation,
            reliability_level: interpretation.reliability.to_string(),
            processing_time_ms,
            filename,
            image_url: stored_filename.as_deref().map(upload_url),
            prediction_id,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchFailure {
    pub success: bool,
    pub filename: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum BatchEntry {
    Success(PredictionResponse),
    Failure(BatchFailure),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct BatchSummary {
    pub total_images: usize,
    pub successful: usize,
    pub failed: usize,
    pub counts_by_class: BTreeMap<String, u64>,
    pub tumor_detected: usize,
    pub no_tumor: usize,
    /// Mean confidence of the successful entries, in `[0, 1]`
    pub average_confidence: f64,
}

impl BatchSummary {
    fn from_entries(entries: &[BatchEntry]) -> Self {
        let mut summary = BatchSummary {
            total_images: entries.len(),
            ..Default::default()
        };
        let mut confidence_sum = 0.0;
        for entry in entries {
            match entry {
                BatchEntry::Success(p) => {
                    summary.successful += 1;
                    *summary
                        .counts_by_class
                        .entry(p.prediction.clone())
                        .or_insert(0) += 1;
                    if p.tumor_detected {
                        summary.tumor_detected += 1;
                    } else {
                        summary.no_tumor += 1;
                    }
                    confidence_sum += p.confidence / 100.0;
                }
                BatchEntry::Failure(_) => summary.failed += 1,
            }
        }
        if summary.successful > 0 {
            summary.average_confidence = confidence_sum / summary.successful as f64;
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchResponse {
    pub success: bool,
    pub results: Vec<BatchEntry>,
    pub summary: BatchSummary,
}

fn request_for(
    image: UploadedImage,
    user: &AppUser,
    client_addr: Option<String>,
) -> PredictionRequest {
    PredictionRequest {
        bytes: image.bytes,
        filename: image.filename,
        content_type: image.content_type,
        client_addr,
        owner_id: user.user_id(),
    }
}

#[utoipa::path(
    post,
    path = "/predict",
    tag = "predict",
    request_body(content = ImageUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Classification that passed the confidence threshold", body = PredictionResponse),
        (status = 400, description = "Invalid image or low confidence prediction"),
        (status = 500, description = "Model not loaded")
    )
)]
#[tracing::instrument(name = "POST /api/predict", skip(state, user, multipart))]
pub async fn predict(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
    ClientAddr(client_addr): ClientAddr,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, ApiError> {
    let image = single_image(&mut multipart, "image").await?;

    let outcome = state
        .pipeline
        .run(request_for(image, &user, client_addr), state.repository.as_ref())
        .await
        .map_err(|failure| {
            tracing::debug!("Pipeline stopped after {:?}", failure.reached);
            ApiError::from(failure.error)
        })?;

    Ok(Json(outcome.into()))
}

#[utoipa::path(
    post,
    path = "/predict/batch",
    tag = "predict",
    request_body(content = BatchUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Per-image results and a batch summary", body = BatchResponse),
        (status = 400, description = "No images or too many images"),
        (status = 500, description = "Model not loaded")
    )
)]
#[tracing::instrument(name = "POST /api/predict/batch", skip(state, user, multipart))]
pub async fn predict_batch(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
    ClientAddr(client_addr): ClientAddr,
    mut multipart: Multipart,
) -> Result<Json<BatchResponse>, ApiError> {
    let images = collect_images(&mut multipart, "images", state.config.max_batch_size).await?;
    if images.is_empty() {
        return Err(ApiError::bad_request("No images provided"));
    }

    let adapter = state.pipeline.adapter();
    if !adapter.is_loaded() {
        return Err(StageError::ModelUnavailable(
            adapter
                .unavailable_reason()
                .unwrap_or("No model loaded")
                .to_string(),
        )
        .into());
    }

    let mut results = Vec::with_capacity(images.len());
    for image in images {
        let filename = image.filename.clone();
        let entry = match state
            .pipeline
            .run(
                request_for(image, &user, client_addr.clone()),
                state.repository.as_ref(),
            )
            .await
        {
            Ok(outcome) => BatchEntry::Success(outcome.into()),
            Err(failure) => {
                let error = ApiError::from(failure.error);
                BatchEntry::Failure(BatchFailure {
                    success: false,
                    filename,
                    code: error.code().to_string(),
                    message: error.message().unwrap_or("Prediction failed").to_string(),
                    details: error.details().cloned(),
                })
            }
        };
        results.push(entry);
    }

    let summary = BatchSummary::from_entries(&results);
    tracing::info!(
        "Batch of {} images: {} succeeded, {} failed",
        summary.total_images,
        summary.successful,
        summary.failed
    );

    Ok(Json(BatchResponse {
        success: true,
        results,
        summary,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(label: &str, confidence: f64, tumor: bool) -> BatchEntry {
        BatchEntry::Success(PredictionResponse {
            success: true,
            prediction: label.to_string(),
            display_name: label.to_string(),
            confidence,
            probabilities: BTreeMap::new(),
            tumor_detected: tumor,
            is_uncertain: false,
            message: String::new(),
            recommendation: String::new(),
            reliability_level: "High".to_string(),
            processing_time_ms: 1,
            filename: "scan.png".to_string(),
            image_url: None,
            prediction_id: None,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn batch_summary_counts_entries() {
        let entries = vec![
            success("glioma", 90.0, true),
            success("glioma", 70.0, true),
            success("no_tumor", 80.0, false),
            BatchEntry::Failure(BatchFailure {
                success: false,
                filename: "bad.png".to_string(),
                code: "INVALID_IMAGE".to_string(),
                message: "Invalid image".to_string(),
                details: None,
            }),
        ];

        let summary = BatchSummary::from_entries(&entries);
        assert_eq!(summary.total_images, 4);
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.tumor_detected, 2);
        assert_eq!(summary.no_tumor, 1);
        assert_eq!(summary.counts_by_class["glioma"], 2);
        assert!((summary.average_confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn empty_batch_summary_is_zeroed() {
        let summary = BatchSummary::from_entries(&[]);
        assert_eq!(summary, BatchSummary::default());
    }
}
