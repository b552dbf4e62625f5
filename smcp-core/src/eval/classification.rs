//! Classification metrics: accuracy and macro precision/recall/F1, plus log loss.

use super::{MetricReport, f_score, ratio};
use crate::error::{SmcpError, ValidationError};
use crate::inference::backends::{Prediction, ProbabilityMatrix, canonical_label, canonical_number};
use crate::types::Domain;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    tp: usize,
    fp: usize,
    fn_: usize,
}

pub fn compute(
    predictions: &[Prediction],
    targets: &[String],
    probabilities: Option<&ProbabilityMatrix>,
) -> Result<MetricReport, SmcpError> {
    let predicted = predicted_labels(predictions)?;
    let truth: Vec<String> = targets.iter().map(|t| canonical_label(t)).collect();

    let mut counts: BTreeMap<&str, Counts> = BTreeMap::new();
    let mut correct = 0usize;
    for (p, t) in predicted.iter().zip(&truth) {
        if p == t {
            correct += 1;
            counts.entry(t.as_str()).or_default().tp += 1;
        } else {
            counts.entry(p.as_str()).or_default().fp += 1;
            counts.entry(t.as_str()).or_default().fn_ += 1;
        }
    }

    let n = truth.len() as f64;
    let labels = counts.len() as f64;
    let mut precision = 0.0;
    let mut recall = 0.0;
    let mut f1 = 0.0;
    let mut never_predicted = Vec::new();
    let mut never_true = Vec::new();

    for (label, c) in &counts {
        if c.tp + c.fp == 0 {
            never_predicted.push(*label);
        }
        if c.tp + c.fn_ == 0 {
            never_true.push(*label);
        }
        let p = ratio(c.tp as f64, (c.tp + c.fp) as f64);
        let r = ratio(c.tp as f64, (c.tp + c.fn_) as f64);
        precision += p;
        recall += r;
        f1 += f_score(p, r);
    }

    let mut report = MetricReport::default();
    report.insert("accuracy", ratio(correct as f64, n));
    report.insert("precision", ratio(precision, labels));
    report.insert("recall", ratio(recall, labels));
    report.insert("f1", ratio(f1, labels));

    if !never_predicted.is_empty() {
        report.flag(format!(
            "precision: labels never predicted contribute 0 ({})",
            never_predicted.join(", ")
        ));
    }
    if !never_true.is_empty() {
        report.flag(format!(
            "recall: predicted labels absent from the target contribute 0 ({})",
            never_true.join(", ")
        ));
    }

    if let Some(matrix) = probabilities {
        let log_loss = log_loss(&truth, matrix);
        if log_loss.is_infinite() {
            report.flag("log_loss: a true label received zero probability");
        }
        report.insert("log_loss", log_loss);
    }

    Ok(report)
}

/// Canonical label of each prediction, in row order.
pub fn predicted_labels(predictions: &[Prediction]) -> Result<Vec<String>, SmcpError> {
    predictions
        .iter()
        .enumerate()
        .map(|(i, p)| predicted_label(i + 1, p))
        .collect()
}

fn predicted_label(row: usize, prediction: &Prediction) -> Result<String, SmcpError> {
    match prediction {
        Prediction::Label(s) | Prediction::Text(s) => Ok(canonical_label(s)),
        Prediction::Value(v) => Ok(canonical_number(*v)),
        Prediction::Mask(_) => Err(ValidationError::IncompatiblePrediction {
            row,
            domain: Domain::Classification,
            found: prediction.kind().to_string(),
        }
        .into()),
    }
}

/// Mean negative log-likelihood of the true class.
fn log_loss(truth: &[String], matrix: &ProbabilityMatrix) -> f64 {
    let index: BTreeMap<&str, usize> = matrix
        .classes
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();
    let total: f64 = truth
        .iter()
        .zip(&matrix.rows)
        .map(|(t, row)| {
            let p = index
                .get(t.as_str())
                .and_then(|&i| row.get(i))
                .copied()
                .unwrap_or(0.0);
            -p.ln()
        })
        .sum();
    total / truth.len().max(1) as f64
}
