//! Framework-opaque model runtime trait and its adapters.

pub mod native;
pub mod python;

use crate::data::FeatureRow;
use crate::error::SmcpError;
use crate::types::{Domain, Framework};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use native::{NativeModel, NativeRuntime};
pub use python::PythonModel;

/// One model output, aligned with a dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Prediction {
    Label(String),
    Value(f64),
    Text(String),
    Mask(Vec<String>),
}

impl Prediction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Label(_) => "label",
            Self::Value(_) => "value",
            Self::Text(_) => "text",
            Self::Mask(_) => "mask",
        }
    }

    /// Interpret a raw JSON output according to the evaluation domain.
    pub fn from_json(domain: Domain, value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match domain {
            Domain::Classification => label_from_json(value).map(Self::Label),
            Domain::Regression => match value {
                Value::Number(n) => n.as_f64().map(Self::Value),
                Value::String(s) => s.trim().parse().ok().map(Self::Value),
                Value::Bool(b) => Some(Self::Value(if *b { 1.0 } else { 0.0 })),
                _ => None,
            },
            Domain::Text => match value {
                Value::String(s) => Some(Self::Text(s.clone())),
                Value::Number(_) | Value::Bool(_) => label_from_json(value).map(Self::Text),
                _ => None,
            },
            Domain::Vision => {
                let mut pixels = Vec::new();
                flatten_mask(value, &mut pixels)?;
                Some(Self::Mask(pixels))
            }
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(s) | Self::Text(s) => f.write_str(s),
            Self::Value(v) => write!(f, "{v}"),
            Self::Mask(pixels) => f.write_str(&pixels.join(" ")),
        }
    }
}

/// Canonical text of a numeric label: integral values print without a fraction.
pub fn canonical_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Canonical form of a class label, so `1`, `1.0` and `"1"` compare equal.
pub fn canonical_label(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => canonical_number(v),
        _ => trimmed.to_string(),
    }
}

pub(crate) fn label_from_json(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match value {
        Value::String(s) => Some(canonical_label(s)),
        Value::Number(n) => n.as_f64().map(canonical_number),
        Value::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
        _ => None,
    }
}

fn flatten_mask(value: &serde_json::Value, out: &mut Vec<String>) -> Option<()> {
    use serde_json::Value;
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_mask(item, out)?;
            }
            Some(())
        }
        Value::String(s) => {
            out.extend(s.split_whitespace().map(canonical_label));
            Some(())
        }
        other => {
            out.push(label_from_json(other)?);
            Some(())
        }
    }
}

/// Optional capabilities of a loaded model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub predict_proba: bool,
    pub predict_distribution: bool,
}

/// Class probabilities, one row per dataset row, columns in `classes` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityMatrix {
    pub classes: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// Uniform inference capability over any supported framework.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Framework that executes the artifact.
    fn framework(&self) -> Framework;

    /// Input feature count, when the artifact declares one.
    fn input_dim(&self) -> Option<usize> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Deserialize the artifact and cache what it declares about itself.
    /// Called once by the loader before the model is handed out.
    async fn open(&self) -> Result<(), SmcpError> {
        Ok(())
    }

    /// One prediction per input row, in input order.
    async fn predict(&self, batch: &[FeatureRow]) -> Result<Vec<Prediction>, SmcpError>;

    async fn predict_proba(
        &self,
        _batch: &[FeatureRow],
    ) -> Result<Option<ProbabilityMatrix>, SmcpError> {
        Ok(None)
    }

    /// Predictions and class probabilities for the same batch.
    async fn predict_with_proba(
        &self,
        batch: &[FeatureRow],
    ) -> Result<(Vec<Prediction>, Option<ProbabilityMatrix>), SmcpError> {
        let predictions = self.predict(batch).await?;
        let probabilities = self.predict_proba(batch).await?;
        Ok((predictions, probabilities))
    }

    /// Probability the model assigns to each token of each row's reference text.
    async fn predict_distribution(
        &self,
        _batch: &[FeatureRow],
        _references: &[String],
    ) -> Result<Option<Vec<Vec<f64>>>, SmcpError> {
        Ok(None)
    }
}
