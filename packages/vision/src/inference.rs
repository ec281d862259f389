//! Model loading and inference.
//!
//! [`Classifier`] is the seam between the pipeline and a concrete model;
//! [`TractClassifier`] runs an ONNX export of the trained network with
//! `tract-onnx`. [`InferenceAdapter`] turns raw model output into a labeled
//! [`ClassificationResult`].

use std::{path::Path, sync::Arc};

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tract_onnx::prelude::*;

use crate::{
    error::{LabelTableError, ModelLoadError, StageError},
    labels::ClassLabelTable,
};

/// Top-two probability gap under which a classification counts as undecided.
pub const UNCERTAINTY_MARGIN: f32 = 0.20;

/// Tolerance for treating a model output as an already normalized distribution.
pub const PROBABILITY_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub class_index: usize,
    /// Probability of the predicted class, in `[0, 1]`.
    pub confidence: f32,
    /// `(label, probability)` in model output order.
    pub probabilities: Vec<(String, f32)>,
    pub tumor_detected: bool,
    pub is_uncertain: bool,
}

impl ClassificationResult {
    pub fn probability_of(&self, label: &str) -> Option<f32> {
        self.probabilities
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, p)| *p)
    }

    pub fn raw_probabilities(&self) -> Vec<f32> {
        self.probabilities.iter().map(|(_, p)| *p).collect()
    }
}

/// Descriptive data about a loaded model, echoed by the model info endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub source: String,
    pub format: String,
    pub input_shape: [usize; 4],
    pub output_width: Option<usize>,
}

pub trait Classifier: Send + Sync {
    /// `(width, height)` of the expected input.
    fn input_size(&self) -> (u32, u32);

    /// Number of outputs the model declares, when known before running it.
    fn output_width(&self) -> Option<usize>;

    fn describe(&self) -> ModelDescriptor;

    /// Runs the model on a `[1, H, W, 3]` tensor and returns the first output row.
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, StageError>;
}

pub struct TractClassifier {
    plan: TypedRunnableModel<TypedModel>,
    source: String,
    input_size: (u32, u32),
    output_width: Option<usize>,
}

impl TractClassifier {
    /// Loads an ONNX model whose single input is NHWC f32 of `input_size`.
    pub fn load(path: impl AsRef<Path>, input_size: (u32, u32)) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let source = path.display().to_string();
        if !path.exists() {
            return Err(ModelLoadError::NotFound(source));
        }

        let (w, h) = input_size;
        let load_err = |e: TractError| ModelLoadError::Load {
            path: source.clone(),
            reason: e.to_string(),
        };

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(load_err)?
            .with_input_fact(0, f32::fact([1, h as usize, w as usize, 3]).into())
            .map_err(load_err)?
            .into_optimized()
            .map_err(load_err)?
            .into_runnable()
            .map_err(load_err)?;

        let output_width = plan
            .model()
            .output_fact(0)
            .ok()
            .and_then(|fact| fact.shape.as_concrete().map(|dims| dims.to_vec()))
            .and_then(|dims| dims.last().copied());

        tracing::info!(
            "Loaded model from {} (input {}x{}, outputs {:?})",
            source,
            w,
            h,
            output_width
        );

        Ok(Self {
            plan,
            source,
            input_size,
            output_width,
        })
    }
}

impl Classifier for TractClassifier {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn output_width(&self) -> Option<usize> {
        self.output_width
    }

    fn describe(&self) -> ModelDescriptor {
        let (w, h) = self.input_size;
        ModelDescriptor {
            source: self.source.clone(),
            format: "ONNX".to_string(),
            input_shape: [1, h as usize, w as usize, 3],
            output_width: self.output_width,
        }
    }

    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, StageError> {
        let shape = input.shape().to_vec();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_shape(&shape, &data)
            .map_err(|e| StageError::Inference(format!("Invalid input tensor: {}", e)))?;

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| StageError::Inference(format!("Failed to run model: {}", e)))?;

        let first = outputs
            .first()
            .ok_or_else(|| StageError::Inference("Model produced no outputs".to_string()))?;
        let view = first
            .to_array_view::<f32>()
            .map_err(|e| StageError::Inference(format!("Output is not f32: {}", e)))?;

        Ok(view.iter().copied().collect())
    }
}

/// Wraps the (possibly absent) model together with its class-label table.
#[derive(Clone)]
pub struct InferenceAdapter {
    classifier: Option<Arc<dyn Classifier>>,
    labels: Arc<ClassLabelTable>,
    unavailable_reason: Option<String>,
}

impl InferenceAdapter {
    /// Pairs a model with its label table, failing fast when their widths disagree.
    pub fn new(
        classifier: Arc<dyn Classifier>,
        labels: ClassLabelTable,
    ) -> Result<Self, LabelTableError> {
        labels.validate()?;
        if let Some(width) = classifier.output_width() {
            labels.ensure_width(width)?;
        }
        Ok(Self {
            classifier: Some(classifier),
            labels: Arc::new(labels),
            unavailable_reason: None,
        })
    }

    /// An adapter that answers every request with `ModelUnavailable`.
    pub fn unavailable(labels: ClassLabelTable, reason: impl Into<String>) -> Self {
        Self {
            classifier: None,
            labels: Arc::new(labels),
            unavailable_reason: Some(reason.into()),
        }
    }

    /// Loads the model from disk. Load failures yield an unavailable adapter
    /// instead of an error; a label table that contradicts the loaded model
    /// is fatal.
    pub fn load_or_unavailable(
        path: impl AsRef<Path>,
        input_size: (u32, u32),
        labels: ClassLabelTable,
    ) -> Result<Self, LabelTableError> {
        match TractClassifier::load(path, input_size) {
            Ok(model) => Self::new(Arc::new(model), labels),
            Err(e) => {
                tracing::error!("{}; inference disabled", e);
                Ok(Self::unavailable(labels, e.to_string()))
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn labels(&self) -> &ClassLabelTable {
        &self.labels
    }

    pub fn describe(&self) -> Option<ModelDescriptor> {
        self.classifier.as_ref().map(|c| c.describe())
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable_reason.as_deref()
    }

    /// Runs the model and labels its output.
    pub fn classify(&self, input: &Array4<f32>) -> Result<ClassificationResult, StageError> {
        let raw = self.predict_raw(input)?;
        self.interpret_output(&raw)
    }

    /// The model's output row as emitted, before normalization.
    pub fn predict_raw(&self, input: &Array4<f32>) -> Result<Vec<f32>, StageError> {
        let classifier = self.classifier.as_ref().ok_or_else(|| {
            StageError::ModelUnavailable(
                self.unavailable_reason
                    .clone()
                    .unwrap_or_else(|| "No model loaded".to_string()),
            )
        })?;
        classifier.predict(input)
    }

    /// Labels a raw output vector. Logits are normalized with softmax first.
    pub fn interpret_output(&self, raw: &[f32]) -> Result<ClassificationResult, StageError> {
        if raw.len() != self.labels.len() {
            return Err(StageError::Inference(format!(
                "Model returned {} values but table {} has {} labels",
                raw.len(),
                self.labels.identity(),
                self.labels.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(StageError::Inference(
                "Model returned non-finite values".to_string(),
            ));
        }

        let probabilities = normalize_probabilities(raw);
        let (class_index, confidence) = arg_max(&probabilities);
        let label = self
            .labels
            .label(class_index)
            .map(|l| l.to_string())
            .ok_or_else(|| StageError::Inference(format!("No label for index {}", class_index)))?;

        Ok(ClassificationResult {
            tumor_detected: self.labels.is_tumor(&label),
            is_uncertain: is_uncertain(&probabilities),
            probabilities: self
                .labels
                .labels
                .iter()
                .cloned()
                .zip(probabilities.iter().copied())
                .collect(),
            label,
            class_index,
            confidence,
        })
    }
}

/// Returns the input unchanged when it already is a distribution, otherwise its softmax.
pub fn normalize_probabilities(raw: &[f32]) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    let in_range = raw.iter().all(|v| (0.0..=1.0).contains(v));
    if in_range && (sum - 1.0).abs() <= PROBABILITY_TOLERANCE {
        return raw.to_vec();
    }
    softmax(raw)
}

pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest entry; the first one wins ties.
fn arg_max(values: &[f32]) -> (usize, f32) {
    let mut best = (0usize, f32::MIN);
    for (i, v) in values.iter().enumerate() {
        if *v > best.1 {
            best = (i, *v);
        }
    }
    best
}

/// `top1 - top2 < UNCERTAINTY_MARGIN`. A single-class output is never uncertain.
pub fn is_uncertain(probabilities: &[f32]) -> bool {
    let mut top1 = f32::MIN;
    let mut top2 = f32::MIN;
    for &p in probabilities {
        if p > top1 {
            top2 = top1;
            top1 = p;
        } else if p > top2 {
            top2 = p;
        }
    }
    if probabilities.len() < 2 {
        return false;
    }
    // f32 inputs like 0.6 - 0.4 must land exactly on the margin.
    round6(top1 as f64 - top2 as f64) < round6(UNCERTAINTY_MARGIN as f64)
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}
