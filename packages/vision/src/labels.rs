//! Class-label tables.
//!
//! A table maps model output indices to label names. The order is fixed at
//! training time, so it is declared once here (or loaded from a JSON file)
//! and checked against the model's output width when the model is loaded.

use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::LabelTableError;

/// Identifier of the built-in four-class table.
pub const BRAIN_MRI_4CLASS: &str = "brain-mri-4class";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLabelTable {
    /// Identity of the model this table was trained with.
    pub model_id: String,
    pub version: u32,
    /// Labels in model output order.
    pub labels: Vec<String>,
    /// The label that means "no tumor"; every other label is a tumor class.
    pub no_tumor_label: String,
}

impl ClassLabelTable {
    pub fn new(
        model_id: impl Into<String>,
        version: u32,
        labels: Vec<String>,
        no_tumor_label: impl Into<String>,
    ) -> Result<Self, LabelTableError> {
        let table = Self {
            model_id: model_id.into(),
            version,
            labels,
            no_tumor_label: no_tumor_label.into(),
        };
        table.validate()?;
        Ok(table)
    }

    /// `[glioma, meningioma, no_tumor, pituitary]`, the order the shipped model was trained with.
    pub fn brain_mri_4class() -> Self {
        Self {
            model_id: BRAIN_MRI_4CLASS.to_string(),
            version: 1,
            labels: ["glioma", "meningioma", "no_tumor", "pituitary"]
                .iter()
                .map(|l| l.to_string())
                .collect(),
            no_tumor_label: "no_tumor".to_string(),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LabelTableError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, LabelTableError> {
        let table: ClassLabelTable = serde_json::from_str(raw)?;
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), LabelTableError> {
        if self.labels.is_empty() {
            return Err(LabelTableError::Empty(self.identity()));
        }

        let mut seen = HashSet::with_capacity(self.labels.len());
        for label in &self.labels {
            if !seen.insert(label.as_str()) {
                return Err(LabelTableError::DuplicateLabel {
                    table: self.identity(),
                    label: label.clone(),
                });
            }
        }

        if !seen.contains(self.no_tumor_label.as_str()) {
            return Err(LabelTableError::UnknownNoTumorLabel {
                table: self.identity(),
                label: self.no_tumor_label.clone(),
            });
        }

        Ok(())
    }

    /// Fails when the table does not have exactly one label per model output.
    pub fn ensure_width(&self, model_outputs: usize) -> Result<(), LabelTableError> {
        if self.labels.len() != model_outputs {
            return Err(LabelTableError::WidthMismatch {
                table: self.identity(),
                labels: self.labels.len(),
                model_outputs,
            });
        }
        Ok(())
    }

    /// `model_id@version`
    pub fn identity(&self) -> String {
        format!("{}@{}", self.model_id, self.version)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|l| l.as_str())
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn is_tumor(&self, label: &str) -> bool {
        label != self.no_tumor_label
    }
}

impl Default for ClassLabelTable {
    fn default() -> Self {
        Self::brain_mri_4class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_valid() {
        let table = ClassLabelTable::brain_mri_4class();
        table.validate().unwrap();
        assert_eq!(table.identity(), "brain-mri-4class@1");
        assert_eq!(table.index_of("no_tumor"), Some(2));
        assert_eq!(table.label(1), Some("meningioma"));
    }

    #[test]
    fn width_mismatch_fails_fast() {
        let table = ClassLabelTable::brain_mri_4class();
        assert!(table.ensure_width(4).is_ok());
        let err = table.ensure_width(2).unwrap_err();
        assert!(matches!(
            err,
            LabelTableError::WidthMismatch {
                labels: 4,
                model_outputs: 2,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_no_tumor_label() {
        let err = ClassLabelTable::new(
            "two-class",
            1,
            vec!["meningioma".into(), "no_tumor".into()],
            "notumor",
        )
        .unwrap_err();
        assert!(matches!(err, LabelTableError::UnknownNoTumorLabel { .. }));
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        let err = ClassLabelTable::new("dup", 1, vec!["a".into(), "a".into()], "a").unwrap_err();
        assert!(matches!(err, LabelTableError::DuplicateLabel { .. }));

        let err = ClassLabelTable::new("empty", 1, vec![], "none").unwrap_err();
        assert!(matches!(err, LabelTableError::Empty(_)));
    }

    #[test]
    fn parses_json_table() {
        let raw = r#"{
            "model_id": "brain-mri-2class",
            "version": 3,
            "labels": ["meningioma", "no_tumor"],
            "no_tumor_label": "no_tumor"
        }"#;
        let table = ClassLabelTable::from_json(raw).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.is_tumor("meningioma"));
        assert!(!table.is_tumor("no_tumor"));
    }
}
