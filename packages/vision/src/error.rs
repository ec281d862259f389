use thiserror::Error;

use crate::inference::ClassificationResult;

/// Failure of a single prediction stage.
///
/// Every stage of the prediction pipeline returns this type so a caller can
/// see from the signature alone which failures a stage may produce.
#[derive(Debug, Error)]
pub enum StageError {
    /// Client input is malformed or out of bounds.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// The image passed validation but could not be turned into a tensor.
    #[error("Preprocessing failed: {0}")]
    Preprocess(String),

    /// No model is loaded in this process.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The model was loaded but failed while running.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Inference ran but the result does not meet the confidence policy.
    #[error(
        "Low confidence prediction ({:.1}% < {:.1}%). Please upload a clearer image.",
        .result.confidence * 100.0,
        .min_confidence * 100.0
    )]
    LowConfidence {
        result: Box<ClassificationResult>,
        min_confidence: f32,
    },
}

impl StageError {
    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImage(msg.into())
    }

    pub fn preprocess(msg: impl Into<String>) -> Self {
        Self::Preprocess(msg.into())
    }

    /// Stable machine readable code, used in HTTP error envelopes and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            StageError::InvalidImage(_) => "INVALID_IMAGE",
            StageError::Preprocess(_) => "PREPROCESS_ERROR",
            StageError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            StageError::Inference(_) => "INFERENCE_ERROR",
            StageError::LowConfidence { .. } => "LOW_CONFIDENCE",
        }
    }
}

/// Problems with a class-label table, detected at startup.
#[derive(Debug, Error)]
pub enum LabelTableError {
    #[error("Class-label table '{0}' has no labels")]
    Empty(String),

    #[error("Class-label table '{table}' lists '{label}' more than once")]
    DuplicateLabel { table: String, label: String },

    #[error("No-tumor label '{label}' is not part of class-label table '{table}'")]
    UnknownNoTumorLabel { table: String, label: String },

    #[error(
        "Class-label table '{table}' has {labels} labels but the model emits {model_outputs} outputs"
    )]
    WidthMismatch {
        table: String,
        labels: usize,
        model_outputs: usize,
    },

    #[error("Failed to read class-label table: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse class-label table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Problems loading a model from disk.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Model file not found: {0}")]
    NotFound(String),

    #[error("Failed to load model '{path}': {reason}")]
    Load { path: String, reason: String },
}
