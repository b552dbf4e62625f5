//! Segmentation metrics over masks pooled across rows.

use super::{MetricReport, ratio};
use crate::error::{SmcpError, ValidationError};
use crate::inference::backends::{Prediction, canonical_label, canonical_number};
use std::collections::BTreeSet;

const FOREGROUND: &str = "1";

#[derive(Debug, Default, Clone, Copy)]
struct Overlap {
    intersection: usize,
    predicted: usize,
    actual: usize,
}

impl Overlap {
    fn iou(&self) -> f64 {
        let union = self.predicted + self.actual - self.intersection;
        ratio(self.intersection as f64, union as f64)
    }

    fn dice(&self) -> f64 {
        ratio(
            2.0 * self.intersection as f64,
            (self.predicted + self.actual) as f64,
        )
    }
}

fn parse_mask(text: &str) -> Vec<String> {
    text.split_whitespace().map(canonical_label).collect()
}

fn predicted_mask(prediction: &Prediction) -> Vec<String> {
    match prediction {
        Prediction::Mask(pixels) => pixels.iter().map(|p| canonical_label(p)).collect(),
        Prediction::Label(s) | Prediction::Text(s) => parse_mask(s),
        Prediction::Value(v) => vec![canonical_number(*v)],
    }
}

pub fn compute(predictions: &[Prediction], targets: &[String]) -> Result<MetricReport, SmcpError> {
    let mut predicted = Vec::new();
    let mut actual = Vec::new();
    for (i, (prediction, target)) in predictions.iter().zip(targets).enumerate() {
        let p = predicted_mask(prediction);
        let t = parse_mask(target);
        if p.len() != t.len() {
            return Err(ValidationError::MaskShapeMismatch {
                row: i + 1,
                expected: t.len(),
                found: p.len(),
            }
            .into());
        }
        predicted.extend(p);
        actual.extend(t);
    }

    let matching = predicted.iter().zip(&actual).filter(|(p, t)| p == t).count();
    let labels: BTreeSet<&str> = predicted
        .iter()
        .chain(&actual)
        .map(String::as_str)
        .collect();

    let mut report = MetricReport::default();
    report.insert("pixel_accuracy", ratio(matching as f64, actual.len() as f64));

    if labels.iter().all(|l| *l == "0" || *l == FOREGROUND) {
        let overlap = overlap_for(FOREGROUND, &predicted, &actual);
        if overlap.predicted + overlap.actual == 0 {
            report.flag("iou/dice: no foreground pixels in prediction or target; reported as 0");
        }
        report.insert("iou", overlap.iou());
        report.insert("dice", overlap.dice());
    } else {
        let count = labels.len() as f64;
        let (iou, dice) = labels.iter().fold((0.0, 0.0), |(iou, dice), label| {
            let overlap = overlap_for(label, &predicted, &actual);
            (iou + overlap.iou(), dice + overlap.dice())
        });
        report.insert("iou", iou / count);
        report.insert("dice", dice / count);
    }

    Ok(report)
}

fn overlap_for(label: &str, predicted: &[String], actual: &[String]) -> Overlap {
    predicted
        .iter()
        .zip(actual)
        .fold(Overlap::default(), |mut acc, (p, t)| {
            let in_p = p == label;
            let in_t = t == label;
            acc.predicted += usize::from(in_p);
            acc.actual += usize::from(in_t);
            acc.intersection += usize::from(in_p && in_t);
            acc
        })
}
