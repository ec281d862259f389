//! The prediction-request pipeline.
//!
//! ```text
//! Received -> Validated -> Preprocessed -> Inferred -> Interpreted -> [Persisted] -> Completed
//!     \____________\______________\____________\____________\----> Failed
//! ```
//!
//! Validation through interpretation is CPU bound and runs on the blocking
//! pool. Persistence only happens for results that passed the confidence
//! policy and never fails the request.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use axum::body::Bytes;
use neuroscan_vision::{
    ClassificationResult, ImageValidator, InferenceAdapter, Interpretation, Preprocessor,
    ResultInterpreter, StageError,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::{
    config::ServiceConfig,
    repository::{NewPrediction, PredictionRepository},
    uploads::UploadStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum PipelineStage {
    Received,
    Validated,
    Preprocessed,
    Inferred,
    Interpreted,
    Persisted,
    Completed,
    Failed,
}

impl PipelineStage {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Validated, Preprocessed)
                | (Preprocessed, Inferred)
                | (Inferred, Interpreted)
                | (Interpreted, Persisted)
                | (Interpreted, Completed)
                | (Persisted, Completed)
        ) || (next == Failed && !matches!(self, Completed | Failed))
    }
}

/// Stages a single run went through, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTrace {
    stages: Vec<PipelineStage>,
}

impl Default for StageTrace {
    fn default() -> Self {
        Self {
            stages: vec![PipelineStage::Received],
        }
    }
}

impl StageTrace {
    pub fn current(&self) -> PipelineStage {
        self.stages
            .last()
            .copied()
            .unwrap_or(PipelineStage::Received)
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    fn advance(&mut self, next: PipelineStage) {
        debug_assert!(
            self.current().can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.current(),
            next
        );
        tracing::trace!("Pipeline stage {:?} -> {:?}", self.current(), next);
        self.stages.push(next);
    }

    /// Marks the run failed and returns the last stage that completed.
    fn fail(&mut self) -> PipelineStage {
        let reached = self.current();
        self.advance(PipelineStage::Failed);
        reached
    }
}

/// One uploaded image, as handed to the pipeline.
#[derive(Debug, Clone)]
pub struct PredictionRequest {
    pub bytes: Bytes,
    pub filename: String,
    pub content_type: Option<String>,
    pub client_addr: Option<String>,
    pub owner_id: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub result: ClassificationResult,
    pub interpretation: Interpretation,
}

#[derive(Debug, Error)]
#[error("{error}")]
pub struct PipelineFailure {
    /// Last stage that completed before the failure.
    pub reached: PipelineStage,
    #[source]
    pub error: StageError,
}

#[derive(Debug, Clone)]
pub struct PredictionOutcome {
    pub result: ClassificationResult,
    pub interpretation: Interpretation,
    pub filename: String,
    pub stored_filename: Option<String>,
    /// `None` when the record could not be stored.
    pub prediction_id: Option<i64>,
    pub processing_time_ms: u64,
    pub trace: StageTrace,
}

/// Raw model view of an image, for debugging class order and calibration.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RawInspection {
    pub raw_predictions: Vec<f32>,
    pub class_probabilities: BTreeMap<String, ClassProbability>,
    pub predicted_class_index: usize,
    pub predicted_class: String,
    pub confidence: f32,
    pub is_uncertain: bool,
    pub max_probability: f32,
    pub min_probability: f32,
    pub prediction_spread: f32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClassProbability {
    pub index: usize,
    pub probability: f32,
    pub percentage: f64,
}

pub struct PredictionPipeline {
    validator: ImageValidator,
    preprocessor: Preprocessor,
    adapter: InferenceAdapter,
    interpreter: ResultInterpreter,
    uploads: UploadStore,
}

impl PredictionPipeline {
    pub fn new(
        validator: ImageValidator,
        preprocessor: Preprocessor,
        adapter: InferenceAdapter,
        interpreter: ResultInterpreter,
        uploads: UploadStore,
    ) -> Self {
        Self {
            validator,
            preprocessor,
            adapter,
            interpreter,
            uploads,
        }
    }

    pub fn from_config(config: &ServiceConfig, adapter: InferenceAdapter) -> Self {
        Self::new(
            ImageValidator::new(config.validation.clone()),
            Preprocessor::square(config.input_size),
            adapter,
            ResultInterpreter::new(config.min_confidence),
            UploadStore::new(&config.upload_dir),
        )
    }

    pub fn adapter(&self) -> &InferenceAdapter {
        &self.adapter
    }

    pub fn validator(&self) -> &ImageValidator {
        &self.validator
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn interpreter(&self) -> &ResultInterpreter {
        &self.interpreter
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    /// Validate, preprocess, infer and interpret. Blocking.
    pub fn analyze(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
        trace: &mut StageTrace,
    ) -> Result<Analysis, StageError> {
        let image = self.validator.validate(bytes, content_type)?;
        trace.advance(PipelineStage::Validated);

        let tensor = self.preprocessor.preprocess(&image)?;
        trace.advance(PipelineStage::Preprocessed);

        let result = self.adapter.classify(&tensor)?;
        trace.advance(PipelineStage::Inferred);

        let interpretation = self.interpreter.interpret(&result)?;
        trace.advance(PipelineStage::Interpreted);

        Ok(Analysis {
            result,
            interpretation,
        })
    }

    /// Runs one request through every stage.
    pub async fn run(
        self: &Arc<Self>,
        request: PredictionRequest,
        repository: &dyn PredictionRepository,
    ) -> Result<PredictionOutcome, PipelineFailure> {
        let started = Instant::now();

        let pipeline = Arc::clone(self);
        let bytes = request.bytes.clone();
        let content_type = request.content_type.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut trace = StageTrace::default();
            let analysis = pipeline.analyze(&bytes, content_type.as_deref(), &mut trace);
            (analysis, trace)
        })
        .await;

        let (analysis, mut trace) = match joined {
            Ok(out) => out,
            Err(e) => {
                let error = StageError::Inference(format!("Pipeline worker failed: {}", e));
                record_outcome(error.code(), started);
                return Err(PipelineFailure {
                    reached: PipelineStage::Received,
                    error,
                });
            }
        };

        let Analysis {
            result,
            interpretation,
        } = match analysis {
            Ok(analysis) => analysis,
            Err(error) => {
                let reached = trace.fail();
                record_outcome(error.code(), started);
                return Err(PipelineFailure { reached, error });
            }
        };
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let stored_filename = match self.uploads.save(&request.filename, &request.bytes).await {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!("Failed to store upload {}: {}", request.filename, e);
                None
            }
        };

        let record = NewPrediction {
            owner_id: request.owner_id,
            filename: request.filename.clone(),
            stored_filename: stored_filename.clone(),
            predicted_class: result.label.clone(),
            class_index: result.class_index,
            confidence: result.confidence,
            probabilities: result.probabilities.clone(),
            tumor_detected: result.tumor_detected,
            is_uncertain: result.is_uncertain,
            reliability: interpretation.reliability,
            processing_time_ms,
            client_addr: request.client_addr.clone(),
        };

        let prediction_id = match repository.append(record).await {
            Ok(id) => {
                trace.advance(PipelineStage::Persisted);
                Some(id)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to persist prediction for {} in {} store: {}",
                    request.filename,
                    repository.backend_name(),
                    e
                );
                metrics::counter!("prediction_persist_failures_total").increment(1);
                None
            }
        };

        trace.advance(PipelineStage::Completed);
        record_outcome("success", started);
        tracing::info!(
            "Predicted {} ({:.1}%) for {} in {} ms",
            result.label,
            result.confidence * 100.0,
            request.filename,
            processing_time_ms
        );

        Ok(PredictionOutcome {
            result,
            interpretation,
            filename: request.filename,
            stored_filename,
            prediction_id,
            processing_time_ms,
            trace,
        })
    }

    /// Raw output and per-class breakdown. No threshold, nothing stored. Blocking.
    pub fn inspect(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<RawInspection, StageError> {
        let image = self.validator.validate(bytes, content_type)?;
        let tensor = self.preprocessor.preprocess(&image)?;
        let raw = self.adapter.predict_raw(&tensor)?;
        let result = self.adapter.interpret_output(&raw)?;

        let probabilities = result.raw_probabilities();
        let max = probabilities.iter().copied().fold(f32::MIN, f32::max);
        let min = probabilities.iter().copied().fold(f32::MAX, f32::min);

        Ok(RawInspection {
            class_probabilities: result
                .probabilities
                .iter()
                .enumerate()
                .map(|(index, (label, p))| {
                    (
                        label.clone(),
                        ClassProbability {
                            index,
                            probability: *p,
                            percentage: percent(*p),
                        },
                    )
                })
                .collect(),
            raw_predictions: raw,
            predicted_class_index: result.class_index,
            predicted_class: result.label,
            confidence: result.confidence,
            is_uncertain: result.is_uncertain,
            max_probability: max,
            min_probability: min,
            prediction_spread: max - min,
        })
    }
}

fn record_outcome(outcome: &'static str, started: Instant) {
    metrics::counter!("predictions_total", "outcome" => outcome).increment(1);
    metrics::histogram!("prediction_duration_seconds").record(started.elapsed().as_secs_f64());
}

/// Probability in `[0, 1]` as a percentage rounded to two decimals.
pub fn percent(p: f32) -> f64 {
    (p as f64 * 10_000.0).round() / 100.0
}

pub fn probability_percentages(probabilities: &[(String, f32)]) -> BTreeMap<String, f64> {
    probabilities
        .iter()
        .map(|(label, p)| (label.clone(), percent(*p)))
        .collect()
}
