use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use neuroscan_vision::StageError;
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    auth::AuthError,
    pipeline::{percent, probability_percentages},
    repository::RepositoryError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportPolicy {
    Ignore,
    Report,
}

/// Error returned by every handler.
///
/// Renders as `{"success": false, "error": {"code", "id"?, "message", "details"?}}`.
/// Reported errors get a fresh id, echoed in the `x-error-id` header and in
/// the log line carrying the internal summary, so a client can quote it.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    public_code: String,
    public_message: Option<String>,
    details: Option<Value>,
    report_policy: ReportPolicy,
    report_summary: Option<String>,
    report_details: Option<String>,
}

impl ApiError {
    fn new(
        status: StatusCode,
        public_code: impl Into<String>,
        public_message: Option<String>,
        report_policy: ReportPolicy,
    ) -> Self {
        Self {
            status,
            public_code: public_code.into(),
            public_message,
            details: None,
            report_policy,
            report_summary: None,
            report_details: None,
        }
    }

    fn with_report(mut self, summary: impl Into<String>, details: Option<String>) -> Self {
        self.report_summary = Some(summary.into());
        self.report_details = details;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.public_code
    }

    pub fn message(&self) -> Option<&str> {
        self.public_message.as_deref()
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!("Internal error: {}", msg);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            None,
            ReportPolicy::Report,
        )
        .with_report(msg, None)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::warn!("Not found: {}", msg);
        Self::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            Some(msg),
            ReportPolicy::Ignore,
        )
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::warn!("Bad request: {}", msg);
        Self::new(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            Some(msg),
            ReportPolicy::Ignore,
        )
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::warn!("Unauthorized: {}", msg);
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            Some(msg),
            ReportPolicy::Ignore,
        )
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::warn!("Forbidden: {}", msg);
        Self::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            Some(msg),
            ReportPolicy::Ignore,
        )
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::warn!("Conflict: {}", msg);
        Self::new(
            StatusCode::CONFLICT,
            "CONFLICT",
            Some(msg),
            ReportPolicy::Ignore,
        )
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::warn!("Payload too large: {}", msg);
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            Some(msg),
            ReportPolicy::Ignore,
        )
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!("Service unavailable: {}", msg);
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            Some("Service unavailable".to_string()),
            ReportPolicy::Report,
        )
        .with_report(msg, None)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorEnvelope<'a> {
            success: bool,
            error: ErrorBody<'a>,
        }

        #[derive(Serialize)]
        struct ErrorBody<'a> {
            code: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            id: Option<&'a str>,
            message: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<&'a Value>,
        }

        let code = if self.public_code.is_empty() {
            "ERROR"
        } else {
            self.public_code.as_str()
        };

        let public_message = self
            .public_message
            .as_deref()
            .unwrap_or_else(|| self.status.canonical_reason().unwrap_or("Error"));

        let error_id = (self.report_policy == ReportPolicy::Report)
            .then(|| uuid::Uuid::new_v4().to_string());

        if let Some(id) = error_id.as_deref() {
            tracing::error!(
                error_id = id,
                status = self.status.as_u16(),
                code,
                details = self.report_details.as_deref().unwrap_or_default(),
                "{}",
                self.report_summary.as_deref().unwrap_or(public_message)
            );
        }

        let mut response = (
            self.status,
            Json(ErrorEnvelope {
                success: false,
                error: ErrorBody {
                    code,
                    id: error_id.as_deref(),
                    message: public_message,
                    details: self.details.as_ref(),
                },
            }),
        )
            .into_response();

        if let Some(id) = error_id.as_deref()
            && let Ok(v) = HeaderValue::from_str(id)
        {
            response.headers_mut().insert("x-error-id", v);
        }

        response
    }
}

impl From<StageError> for ApiError {
    fn from(err: StageError) -> Self {
        let code = err.code();
        match err {
            StageError::InvalidImage(ref msg) | StageError::Preprocess(ref msg) => {
                tracing::warn!("Rejected image: {}", msg);
                Self::new(
                    StatusCode::BAD_REQUEST,
                    code,
                    Some(err.to_string()),
                    ReportPolicy::Ignore,
                )
            }
            StageError::LowConfidence {
                ref result,
                min_confidence,
            } => {
                tracing::warn!(
                    "Low confidence prediction: {} at {:.3}",
                    result.label,
                    result.confidence
                );
                let details = json!({
                    "prediction": result.label,
                    "confidence": percent(result.confidence),
                    "probabilities": probability_percentages(&result.probabilities),
                    "min_confidence": percent(min_confidence),
                    "is_uncertain": result.is_uncertain,
                });
                Self::new(
                    StatusCode::BAD_REQUEST,
                    code,
                    Some(err.to_string()),
                    ReportPolicy::Ignore,
                )
                .with_details(details)
            }
            StageError::ModelUnavailable(ref reason) => {
                tracing::error!("Model unavailable: {}", reason);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    Some("Model not loaded. Please try again later.".to_string()),
                    ReportPolicy::Report,
                )
                .with_report(err.to_string(), None)
            }
            StageError::Inference(ref msg) => {
                tracing::error!("Inference error: {}", msg);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    Some("Prediction failed".to_string()),
                    ReportPolicy::Report,
                )
                .with_report(err.to_string(), None)
            }
        }
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(err: sea_orm::DbErr) -> Self {
        tracing::error!("Database error: {:?}", err);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "DATABASE_ERROR",
            None,
            ReportPolicy::Report,
        )
        .with_report(format!("{:?}", err), Some(err.to_string()))
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(db) => db.into(),
            other => {
                tracing::error!("Repository error: {}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    None,
                    ReportPolicy::Report,
                )
                .with_report(other.to_string(), None)
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::DecodingError(_) | AuthError::Revoked => Self::unauthorized(err.to_string()),
            AuthError::EncodingError(_) | AuthError::HashingError(_) => {
                Self::internal(err.to_string())
            }
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        let status = err.status();
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::payload_too_large(err.body_text());
        }
        Self::bad_request(format!("Malformed multipart body: {}", err.body_text()))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("Worker task failed: {}", err))
    }
}

impl std::error::Error for ApiError {}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.public_code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use neuroscan_vision::ClassificationResult;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn client_errors_render_without_id() {
        let response = ApiError::bad_request("nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get("x-error-id").is_none());

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
        assert_eq!(body["error"]["message"], "nope");
        assert!(body["error"].get("id").is_none());
    }

    #[tokio::test]
    async fn reported_errors_carry_matching_id() {
        let response = ApiError::internal("disk on fire").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let header = response
            .headers()
            .get("x-error-id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let body = body_json(response).await;
        assert_eq!(body["error"]["id"], header.as_str());
        assert_eq!(body["error"]["message"], "Internal Server Error");
    }

    #[test]
    fn stage_errors_map_to_statuses() {
        let cases = [
            (StageError::invalid_image("x"), StatusCode::BAD_REQUEST),
            (StageError::preprocess("x"), StatusCode::BAD_REQUEST),
            (
                StageError::ModelUnavailable("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                StageError::Inference("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let code = err.code();
            let api = ApiError::from(err);
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), code);
        }
    }

    #[test]
    fn low_confidence_keeps_probabilities() {
        let err = StageError::LowConfidence {
            result: Box::new(ClassificationResult {
                label: "glioma".into(),
                class_index: 0,
                confidence: 0.40,
                probabilities: vec![
                    ("glioma".into(), 0.40),
                    ("meningioma".into(), 0.35),
                    ("no_tumor".into(), 0.15),
                    ("pituitary".into(), 0.10),
                ],
                tumor_detected: true,
                is_uncertain: true,
            }),
            min_confidence: 0.55,
        };
        let api = ApiError::from(err);
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api.code(), "LOW_CONFIDENCE");
        let details = api.details().unwrap();
        assert_eq!(details["prediction"], "glioma");
        assert_eq!(details["confidence"], 40.0);
        assert_eq!(details["probabilities"]["meningioma"], 35.0);
    }
}
