//! Native JSON model container executed in Rust.
//!
//! ```json
//! {"format": "smcp-native", "version": 1,
//!  "model": {"kind": "linear_regressor", "coefficients": [2.0], "intercept": 1.0}}
//! ```

use super::{Capabilities, ModelRuntime, Prediction, ProbabilityMatrix, canonical_label};
use crate::data::{FeatureRow, FeatureValue};
use crate::error::{FrameworkError, SmcpError, ValidationError};
use crate::eval::text::tokenize;
use crate::inference::formats::NATIVE_FORMAT_MARKER;
use crate::types::{Domain, Framework};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const NATIVE_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    model: NativeModel,
}

/// Model kinds the native container can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NativeModel {
    LinearRegressor {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    /// Softmax over one coefficient row per class. Binary models may carry a
    /// single row, scored with a sigmoid for the second class.
    LogisticClassifier {
        classes: Vec<String>,
        coefficients: Vec<Vec<f64>>,
        intercepts: Vec<f64>,
    },
    /// Exact-match lookup keyed by the row's cells joined with spaces.
    TextLookup {
        responses: BTreeMap<String, String>,
        #[serde(default)]
        fallback: String,
        #[serde(default)]
        token_probabilities: Option<BTreeMap<String, f64>>,
        #[serde(default)]
        unknown_token_probability: f64,
    },
    /// Per-pixel binary mask: `1` where a numeric feature reaches the threshold.
    ThresholdSegmenter { threshold: f64 },
}

impl NativeModel {
    /// Parse and validate a native container.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| corrupt(format!("invalid JSON: {e}")))?;
        if envelope.format != NATIVE_FORMAT_MARKER {
            return Err(corrupt(format!("unexpected format '{}'", envelope.format)));
        }
        if envelope.version != NATIVE_VERSION {
            return Err(ValidationError::UnsupportedFormat {
                reason: format!("native container version {}", envelope.version),
            });
        }
        let mut model = envelope.model;
        model.validate()?;
        if let Self::LogisticClassifier { classes, .. } = &mut model {
            for class in classes.iter_mut() {
                *class = canonical_label(class);
            }
        }
        Ok(model)
    }

    /// Task the model was built for.
    pub fn domain(&self) -> Domain {
        match self {
            Self::LinearRegressor { .. } => Domain::Regression,
            Self::LogisticClassifier { .. } => Domain::Classification,
            Self::TextLookup { .. } => Domain::Text,
            Self::ThresholdSegmenter { .. } => Domain::Vision,
        }
    }

    pub fn input_dim(&self) -> Option<usize> {
        match self {
            Self::LinearRegressor { coefficients, .. } => Some(coefficients.len()),
            Self::LogisticClassifier { coefficients, .. } => coefficients.first().map(Vec::len),
            Self::TextLookup { .. } | Self::ThresholdSegmenter { .. } => None,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::LinearRegressor {
                coefficients,
                intercept,
            } => {
                if coefficients.is_empty() {
                    return Err(corrupt("linear_regressor has no coefficients"));
                }
                if !coefficients.iter().chain([intercept]).all(|v| v.is_finite()) {
                    return Err(corrupt("linear_regressor has non-finite parameters"));
                }
            }
            Self::LogisticClassifier {
                classes,
                coefficients,
                intercepts,
            } => {
                if classes.len() < 2 {
                    return Err(corrupt("logistic_classifier needs at least two classes"));
                }
                let unique: BTreeSet<String> = classes.iter().map(|c| canonical_label(c)).collect();
                if unique.len() != classes.len() {
                    return Err(corrupt("logistic_classifier has duplicate classes"));
                }
                let binary = classes.len() == 2 && coefficients.len() == 1;
                if coefficients.len() != classes.len() && !binary {
                    return Err(corrupt(format!(
                        "logistic_classifier has {} coefficient rows for {} classes",
                        coefficients.len(),
                        classes.len()
                    )));
                }
                if intercepts.len() != coefficients.len() {
                    return Err(corrupt(format!(
                        "logistic_classifier has {} intercepts for {} coefficient rows",
                        intercepts.len(),
                        coefficients.len()
                    )));
                }
                let width = coefficients[0].len();
                if width == 0 || coefficients.iter().any(|row| row.len() != width) {
                    return Err(corrupt("logistic_classifier coefficient rows are ragged"));
                }
                if !coefficients
                    .iter()
                    .flatten()
                    .chain(intercepts)
                    .all(|v| v.is_finite())
                {
                    return Err(corrupt("logistic_classifier has non-finite parameters"));
                }
            }
            Self::TextLookup { .. } => {}
            Self::ThresholdSegmenter { threshold } => {
                if !threshold.is_finite() {
                    return Err(corrupt("threshold_segmenter threshold is not finite"));
                }
            }
        }
        Ok(())
    }

    fn predict_rows(&self, rows: &[FeatureRow]) -> Result<Vec<Prediction>, SmcpError> {
        match self {
            Self::LinearRegressor {
                coefficients,
                intercept,
            } => rows
                .iter()
                .map(|row| {
                    let x = numeric_row(row)?;
                    Ok(Prediction::Value(dot(coefficients, &x) + intercept))
                })
                .collect(),
            Self::LogisticClassifier { classes, .. } => rows
                .iter()
                .map(|row| {
                    let probs = self.class_probabilities(&numeric_row(row)?);
                    // First maximum wins on ties.
                    let best = probs
                        .iter()
                        .enumerate()
                        .fold(0, |best, (i, p)| if *p > probs[best] { i } else { best });
                    Ok(Prediction::Label(classes[best].clone()))
                })
                .collect(),
            Self::TextLookup {
                responses,
                fallback,
                ..
            } => Ok(rows
                .iter()
                .map(|row| {
                    let key = lookup_key(row);
                    let text = responses.get(&key).unwrap_or(fallback);
                    Prediction::Text(text.clone())
                })
                .collect()),
            Self::ThresholdSegmenter { threshold } => Ok(rows
                .iter()
                .map(|row| {
                    let mask = row
                        .iter()
                        .map(|cell| match cell.as_f64() {
                            Some(v) if v >= *threshold => "1".to_string(),
                            _ => "0".to_string(),
                        })
                        .collect();
                    Prediction::Mask(mask)
                })
                .collect()),
        }
    }

    fn class_probabilities(&self, x: &[f64]) -> Vec<f64> {
        let Self::LogisticClassifier {
            coefficients,
            intercepts,
            ..
        } = self
        else {
            return Vec::new();
        };
        let logits: Vec<f64> = coefficients
            .iter()
            .zip(intercepts)
            .map(|(w, b)| dot(w, x) + b)
            .collect();

        if logits.len() == 1 {
            let p = 1.0 / (1.0 + (-logits[0]).exp());
            return vec![1.0 - p, p];
        }
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }
}

fn corrupt(reason: impl Into<String>) -> ValidationError {
    ValidationError::CorruptArtifact {
        container: "native".to_string(),
        reason: reason.into(),
    }
}

fn dot(w: &[f64], x: &[f64]) -> f64 {
    w.iter().zip(x).map(|(a, b)| a * b).sum()
}

fn numeric_row(row: &FeatureRow) -> Result<Vec<f64>, SmcpError> {
    row.iter()
        .enumerate()
        .map(|(i, cell)| {
            cell.as_f64().ok_or_else(|| {
                SmcpError::from(FrameworkError::inference(
                    Framework::Native,
                    format!("feature {} is not numeric ({})", i + 1, describe(cell)),
                ))
            })
        })
        .collect()
}

fn describe(cell: &FeatureValue) -> String {
    match cell {
        FeatureValue::Missing => "missing".to_string(),
        other => format!("'{other}'"),
    }
}

fn lookup_key(row: &FeatureRow) -> String {
    row.iter()
        .filter(|c| !matches!(c, FeatureValue::Missing))
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runtime over a validated native model. Computation runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct NativeRuntime {
    model: Arc<NativeModel>,
}

impl NativeRuntime {
    pub fn new(model: NativeModel) -> Self {
        Self {
            model: Arc::new(model),
        }
    }

    pub fn model(&self) -> &NativeModel {
        &self.model
    }
}

async fn blocking<T, F>(f: F) -> Result<T, SmcpError>
where
    F: FnOnce() -> Result<T, SmcpError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SmcpError::internal(format!("native inference task failed: {e}")))?
}

#[async_trait]
impl ModelRuntime for NativeRuntime {
    fn framework(&self) -> Framework {
        Framework::Native
    }

    fn input_dim(&self) -> Option<usize> {
        self.model.input_dim()
    }

    fn capabilities(&self) -> Capabilities {
        match self.model.as_ref() {
            NativeModel::LogisticClassifier { .. } => Capabilities {
                predict_proba: true,
                predict_distribution: false,
            },
            NativeModel::TextLookup {
                token_probabilities,
                ..
            } => Capabilities {
                predict_proba: false,
                predict_distribution: token_probabilities.is_some(),
            },
            _ => Capabilities::default(),
        }
    }

    async fn predict(&self, batch: &[FeatureRow]) -> Result<Vec<Prediction>, SmcpError> {
        let model = Arc::clone(&self.model);
        let rows = batch.to_vec();
        blocking(move || model.predict_rows(&rows)).await
    }

    async fn predict_proba(
        &self,
        batch: &[FeatureRow],
    ) -> Result<Option<ProbabilityMatrix>, SmcpError> {
        let NativeModel::LogisticClassifier { classes, .. } = self.model.as_ref() else {
            return Ok(None);
        };
        let classes = classes.clone();
        let model = Arc::clone(&self.model);
        let rows = batch.to_vec();
        blocking(move || {
            let rows = rows
                .iter()
                .map(|row| Ok(model.class_probabilities(&numeric_row(row)?)))
                .collect::<Result<Vec<_>, SmcpError>>()?;
            Ok(Some(ProbabilityMatrix { classes, rows }))
        })
        .await
    }

    async fn predict_distribution(
        &self,
        batch: &[FeatureRow],
        references: &[String],
    ) -> Result<Option<Vec<Vec<f64>>>, SmcpError> {
        let NativeModel::TextLookup {
            token_probabilities: Some(table),
            unknown_token_probability,
            ..
        } = self.model.as_ref()
        else {
            return Ok(None);
        };
        if references.len() != batch.len() {
            return Err(SmcpError::internal(format!(
                "{} references for {} rows",
                references.len(),
                batch.len()
            )));
        }
        let distribution = references
            .iter()
            .map(|reference| {
                tokenize(reference)
                    .iter()
                    .map(|token| {
                        table
                            .get(token)
                            .copied()
                            .unwrap_or(*unknown_token_probability)
                    })
                    .collect()
            })
            .collect();
        Ok(Some(distribution))
    }
}
