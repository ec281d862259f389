//! Turns a [`ClassificationResult`] into what a caller reads: a reliability
//! tier, an advisory message and a recommended next step.

use serde::{Deserialize, Serialize};

use crate::{error::StageError, inference::ClassificationResult, labels::ClassLabelTable};

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.55;
pub const HIGH_RELIABILITY: f32 = 0.90;
pub const MEDIUM_RELIABILITY: f32 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReliabilityTier {
    High,
    Medium,
    Low,
}

impl ReliabilityTier {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= HIGH_RELIABILITY {
            ReliabilityTier::High
        } else if confidence >= MEDIUM_RELIABILITY {
            ReliabilityTier::Medium
        } else {
            ReliabilityTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReliabilityTier::High => "High",
            ReliabilityTier::Medium => "Medium",
            ReliabilityTier::Low => "Low",
        }
    }

    fn band(&self) -> &'static str {
        match self {
            ReliabilityTier::High => "high confidence",
            ReliabilityTier::Medium => "moderate confidence",
            ReliabilityTier::Low => "low confidence",
        }
    }
}

impl std::fmt::Display for ReliabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReliabilityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "High" => Ok(ReliabilityTier::High),
            "Medium" => Ok(ReliabilityTier::Medium),
            "Low" => Ok(ReliabilityTier::Low),
            other => Err(format!("Unknown reliability tier '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Routine,
    Soon,
    Prompt,
}

/// One row of the advisory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Advisory {
    pub label: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub finding: &'static str,
    pub recommendation: &'static str,
    pub urgency: Urgency,
}

static ADVISORIES: [Advisory; 4] = [
    Advisory {
        label: "glioma",
        display_name: "Glioma",
        description: "A type of brain tumor that starts in glial cells",
        finding: "Findings are consistent with a glioma",
        recommendation: "See a neuro-oncology specialist promptly for contrast MRI and further evaluation.",
        urgency: Urgency::Prompt,
    },
    Advisory {
        label: "meningioma",
        display_name: "Meningioma",
        description: "A tumor that arises from the meninges",
        finding: "Findings are consistent with a meningioma",
        recommendation: "See a neurosurgery specialist to review the scan and plan follow-up imaging.",
        urgency: Urgency::Soon,
    },
    Advisory {
        label: "no_tumor",
        display_name: "No Tumor",
        description: "No tumor detected in the scan",
        finding: "No tumor was detected",
        recommendation: "No action needed beyond routine care; consult a physician if symptoms persist.",
        urgency: Urgency::Routine,
    },
    Advisory {
        label: "pituitary",
        display_name: "Pituitary Tumor",
        description: "A tumor in the pituitary gland",
        finding: "Findings are consistent with a pituitary tumor",
        recommendation: "See an endocrinology or neurosurgery specialist for hormonal and imaging work-up.",
        urgency: Urgency::Soon,
    },
];

/// Used for tumor classes of custom label tables that have no dedicated row.
static GENERIC_TUMOR: Advisory = Advisory {
    label: "tumor",
    display_name: "Tumor",
    description: "A tumor class of the configured model",
    finding: "Findings suggest a tumor",
    recommendation: "See a specialist to review the scan.",
    urgency: Urgency::Soon,
};

/// Used for the no-tumor class of custom label tables.
static GENERIC_CLEAR: Advisory = Advisory {
    label: "clear",
    display_name: "No Tumor",
    description: "No tumor detected in the scan",
    finding: "No tumor was detected",
    recommendation: "No action needed beyond routine care.",
    urgency: Urgency::Routine,
};

const UNCERTAIN_NOTE: &str =
    "The top two classes scored closely; consider a second reading or another scan.";

pub fn advisory_for(label: &str, tumor_detected: bool) -> &'static Advisory {
    ADVISORIES
        .iter()
        .find(|a| a.label == label)
        .unwrap_or(if tumor_detected {
            &GENERIC_TUMOR
        } else {
            &GENERIC_CLEAR
        })
}

/// Description of a class, as listed by the classes endpoint.
pub fn class_description(label: &str, no_tumor_label: &str) -> &'static str {
    advisory_for(label, label != no_tumor_label).description
}

/// `(label, description)` for every class of `table`, in output order.
pub fn class_descriptions(table: &ClassLabelTable) -> Vec<(String, &'static str)> {
    table
        .labels
        .iter()
        .map(|label| (label.clone(), class_description(label, &table.no_tumor_label)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub reliability: ReliabilityTier,
    pub display_name: String,
    pub message: String,
    pub recommendation: String,
    pub urgency: Urgency,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultInterpreter {
    min_confidence: f32,
}

impl Default for ResultInterpreter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIDENCE)
    }
}

impl ResultInterpreter {
    pub fn new(min_confidence: f32) -> Self {
        Self {
            min_confidence: min_confidence.clamp(0.0, 1.0),
        }
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn interpret(&self, result: &ClassificationResult) -> Result<Interpretation, StageError> {
        if result.confidence < self.min_confidence {
            return Err(StageError::LowConfidence {
                result: Box::new(result.clone()),
                min_confidence: self.min_confidence,
            });
        }

        let reliability = ReliabilityTier::from_confidence(result.confidence);
        let advisory = advisory_for(&result.label, result.tumor_detected);

        let mut message = format!(
            "{} ({}, {:.1}%).",
            advisory.finding,
            reliability.band(),
            result.confidence * 100.0
        );
        if result.is_uncertain {
            message.push(' ');
            message.push_str(UNCERTAIN_NOTE);
        }

        Ok(Interpretation {
            reliability,
            display_name: advisory.display_name.to_string(),
            message,
            recommendation: advisory.recommendation.to_string(),
            urgency: advisory.urgency,
        })
    }
}
