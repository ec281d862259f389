//! Brain MRI classification stages: validate an upload, turn it into a model
//! tensor, run the classifier and interpret its output.

pub mod error;
pub mod inference;
pub mod interpret;
pub mod labels;
pub mod preprocess;
pub mod validation;

pub use error::{LabelTableError, ModelLoadError, StageError};
pub use inference::{
    ClassificationResult, Classifier, InferenceAdapter, ModelDescriptor, TractClassifier,
};
pub use interpret::{Interpretation, ReliabilityTier, ResultInterpreter};
pub use labels::ClassLabelTable;
pub use preprocess::Preprocessor;
pub use validation::{ImageValidator, ValidationPolicy};
