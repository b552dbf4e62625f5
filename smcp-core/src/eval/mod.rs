//! Domain metric computation.
//!
//! Each domain computes a fixed metric set over the predictions and the
//! dataset's target vector. Degenerate inputs never produce NaN: they yield a
//! defined value plus a flag explaining it. The health assessment and group
//! fairness report are supplementary and never feed the score.

pub mod classification;
pub mod fairness;
pub mod health;
pub mod regression;
pub mod text;
pub mod vision;

use crate::error::SmcpError;
use crate::inference::PredictionSet;
use crate::types::Domain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw metric values plus notes on degenerate cases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub values: BTreeMap<String, f64>,
    pub flags: Vec<String>,
}

impl MetricReport {
    pub fn insert(&mut self, metric: &str, value: f64) {
        self.values.insert(metric.to_string(), value);
    }

    pub fn flag(&mut self, note: impl Into<String>) {
        self.flags.push(note.into());
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// Compute the metric set of `domain`.
pub fn compute_metrics(
    domain: Domain,
    predictions: &PredictionSet,
    targets: &[String],
) -> Result<MetricReport, SmcpError> {
    if predictions.predictions.len() != targets.len() {
        return Err(SmcpError::internal(format!(
            "{} predictions for {} targets",
            predictions.predictions.len(),
            targets.len()
        )));
    }

    let report = match domain {
        Domain::Classification => classification::compute(
            &predictions.predictions,
            targets,
            predictions.probabilities.as_ref(),
        )?,
        Domain::Regression => regression::compute(&predictions.predictions, targets)?,
        Domain::Text => text::compute(
            &predictions.predictions,
            targets,
            predictions.token_probabilities.as_deref(),
        )?,
        Domain::Vision => vision::compute(&predictions.predictions, targets)?,
    };
    Ok(report)
}

/// `num / den`, or 0 when the denominator is empty.
pub(crate) fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

/// Harmonic mean of two rates, 0 when both are 0.
pub(crate) fn f_score(precision: f64, recall: f64) -> f64 {
    ratio(2.0 * precision * recall, precision + recall)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::backends::Prediction;

    #[test]
    fn test_length_mismatch_is_internal() {
        let set = PredictionSet {
            predictions: vec![Prediction::Value(1.0)],
            probabilities: None,
            token_probabilities: None,
        };
        let err = compute_metrics(Domain::Regression, &set, &[]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[test]
    fn test_dispatch_by_domain() {
        let set = PredictionSet {
            predictions: vec![Prediction::Value(1.0), Prediction::Value(3.0)],
            probabilities: None,
            token_probabilities: None,
        };
        let report =
            compute_metrics(Domain::Regression, &set, &["1".into(), "2".into()]).unwrap();
        for metric in Domain::Regression.weighted_metrics() {
            assert!(report.get(metric).is_some(), "{metric}");
        }
    }

    #[test]
    fn test_ratio_and_f_score() {
        assert_eq!(ratio(1.0, 0.0), 0.0);
        assert_eq!(f_score(0.0, 0.0), 0.0);
        assert!((f_score(0.5, 1.0) - 2.0 / 3.0).abs() < 1e-12);
    }
}
