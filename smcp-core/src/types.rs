//! Shared vocabulary: domains, frameworks, collaborator records and evaluation keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task category that selects the metric set and weight distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Classification,
    Regression,
    #[serde(alias = "nlp")]
    Text,
    #[serde(alias = "cv")]
    Vision,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Classification,
        Domain::Regression,
        Domain::Text,
        Domain::Vision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Regression => "regression",
            Self::Text => "text",
            Self::Vision => "vision",
        }
    }

    /// Metrics that may carry weight in this domain's EvalScore.
    pub fn weighted_metrics(&self) -> &'static [&'static str] {
        match self {
            Self::Classification => &["accuracy", "precision", "recall", "f1"],
            Self::Regression => &["r2", "mae", "rmse"],
            Self::Text => &["bleu", "rouge", "perplexity"],
            Self::Vision => &["iou", "dice", "pixel_accuracy"],
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classification" => Ok(Self::Classification),
            "regression" => Ok(Self::Regression),
            "text" | "nlp" => Ok(Self::Text),
            "vision" | "cv" => Ok(Self::Vision),
            other => Err(format!("unknown domain '{other}'")),
        }
    }
}

/// Framework tag, either declared at upload time or verified from the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Sklearn,
    Pytorch,
    Tensorflow,
    Keras,
    Onnx,
    Native,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sklearn => "sklearn",
            Self::Pytorch => "pytorch",
            Self::Tensorflow => "tensorflow",
            Self::Keras => "keras",
            Self::Onnx => "onnx",
            Self::Native => "native",
        }
    }

    /// Whether a declared tag is satisfied by a verified one.
    ///
    /// TensorFlow and Keras share artifact containers, so either tag accepts the other.
    pub fn is_compatible_with(&self, verified: Framework) -> bool {
        matches!(
            (self, verified),
            (Self::Tensorflow | Self::Keras, Self::Tensorflow | Self::Keras)
        ) || *self == verified
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sklearn" | "scikit-learn" => Ok(Self::Sklearn),
            "pytorch" | "torch" => Ok(Self::Pytorch),
            "tensorflow" | "tf" => Ok(Self::Tensorflow),
            "keras" => Ok(Self::Keras),
            "onnx" => Ok(Self::Onnx),
            "native" => Ok(Self::Native),
            other => Err(format!("unknown framework '{other}'")),
        }
    }
}

/// Model metadata owned by the upload collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub domain: Domain,
    pub framework: Framework,
}

/// Dataset metadata owned by the upload collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Overrides the configured default target column.
    #[serde(default)]
    pub target_column: Option<String>,
    /// Feature column to group by for the fairness report.
    #[serde(default)]
    pub sensitive_column: Option<String>,
}

/// Unique key of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvalKey {
    pub model_id: String,
    pub dataset_id: String,
}

impl EvalKey {
    pub fn new(model_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            dataset_id: dataset_id.into(),
        }
    }
}

impl fmt::Display for EvalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model_id, self.dataset_id)
    }
}
