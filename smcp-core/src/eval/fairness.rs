//! Group fairness of a binary classifier over a sensitive feature column.
//!
//! Rows are grouped by the value of the sensitive column. Each group gets its
//! own confusion counts and rates; the cross-group metrics report the largest
//! gap between any two groups.

use super::{f_score, ratio};
use crate::data::{Dataset, FeatureValue};
use crate::inference::backends::canonical_label;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Label treated as the positive class when present.
const DEFAULT_POSITIVE_LABEL: &str = "1";
/// Group name for rows whose sensitive cell is empty.
const MISSING_GROUP: &str = "missing";

const PARITY_GAP_LIMIT: f64 = 0.2;
const DISPARATE_IMPACT_FLOOR: f64 = 0.8;

/// Why a fairness report could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FairnessUnavailable {
    #[error("sensitive column '{column}' is not a feature of the dataset")]
    ColumnNotFound { column: String },

    #[error("sensitive column '{column}' has fewer than two groups")]
    TooFewGroups { column: String },

    #[error("group metrics need a binary target, found {labels} labels")]
    NotBinary { labels: usize },
}

/// Confusion counts and rates for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetrics {
    pub group: String,
    pub sample_count: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub true_positive_rate: f64,
    pub false_positive_rate: f64,
    pub positive_prediction_rate: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl GroupMetrics {
    fn new(group: String, counts: Confusion) -> Self {
        let n = counts.total() as f64;
        let tp = counts.tp as f64;
        let fp = counts.fp as f64;
        let tn = counts.tn as f64;
        let fn_ = counts.fn_ as f64;
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        Self {
            group,
            sample_count: counts.total(),
            accuracy: ratio(tp + tn, n),
            precision,
            recall,
            f1: f_score(precision, recall),
            true_positive_rate: recall,
            false_positive_rate: ratio(fp, fp + tn),
            positive_prediction_rate: ratio(tp + fp, n),
            true_positives: counts.tp,
            false_positives: counts.fp,
            true_negatives: counts.tn,
            false_negatives: counts.fn_,
        }
    }

    fn has_positives(&self) -> bool {
        self.true_positives + self.false_negatives > 0
    }

    fn has_negatives(&self) -> bool {
        self.false_positives + self.true_negatives > 0
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Confusion {
    tp: usize,
    fp: usize,
    tn: usize,
    fn_: usize,
}

impl Confusion {
    fn record(&mut self, actual: bool, predicted: bool) {
        match (actual, predicted) {
            (true, true) => self.tp += 1,
            (false, true) => self.fp += 1,
            (false, false) => self.tn += 1,
            (true, false) => self.fn_ += 1,
        }
    }

    fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }
}

/// Fairness metrics for one sensitive column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessReport {
    pub sensitive_column: String,
    pub positive_label: String,
    pub groups: Vec<GroupMetrics>,
    /// Largest gap in positive prediction rate.
    pub demographic_parity_difference: f64,
    /// Largest gap in true positive rate among groups with positives.
    pub equal_opportunity_difference: f64,
    /// Larger of the true and false positive rate gaps.
    pub equalized_odds_difference: f64,
    /// Lowest over highest positive prediction rate; 1 when nothing is predicted positive.
    pub disparate_impact_ratio: f64,
    pub statistical_parity: f64,
    pub predictive_parity: f64,
    /// Mean of the six metrics above mapped onto [0, 1], higher is fairer.
    pub overall_score: f64,
    pub recommendations: Vec<String>,
}

/// Group the dataset by `column` and compare prediction outcomes across groups.
///
/// `predicted` holds canonical predicted labels aligned with the dataset rows.
pub fn analyze(
    dataset: &Dataset,
    column: &str,
    predicted: &[String],
) -> Result<FairnessReport, FairnessUnavailable> {
    let index = dataset
        .schema()
        .features
        .iter()
        .position(|c| c.name == column)
        .ok_or_else(|| FairnessUnavailable::ColumnNotFound {
            column: column.to_string(),
        })?;

    let truth: Vec<String> = dataset.target().iter().map(|t| canonical_label(t)).collect();
    let labels: BTreeSet<&str> = truth
        .iter()
        .chain(predicted)
        .map(String::as_str)
        .collect();
    if labels.len() > 2 {
        return Err(FairnessUnavailable::NotBinary {
            labels: labels.len(),
        });
    }
    let positive = positive_label(&labels);

    let mut by_group: BTreeMap<String, Confusion> = BTreeMap::new();
    for ((row, actual), guess) in dataset.rows().iter().zip(&truth).zip(predicted) {
        let group = match &row[index] {
            FeatureValue::Missing => MISSING_GROUP.to_string(),
            FeatureValue::Numeric(v) => canonical_label(&v.to_string()),
            FeatureValue::Categorical(s) => s.clone(),
        };
        by_group
            .entry(group)
            .or_default()
            .record(*actual == positive, *guess == positive);
    }
    if by_group.len() < 2 {
        return Err(FairnessUnavailable::TooFewGroups {
            column: column.to_string(),
        });
    }

    let groups: Vec<GroupMetrics> = by_group
        .into_iter()
        .map(|(group, counts)| GroupMetrics::new(group, counts))
        .collect();

    let ppr = spread(groups.iter().map(|g| g.positive_prediction_rate));
    let tpr = spread(groups.iter().filter(|g| g.has_positives()).map(|g| g.true_positive_rate));
    let fpr = spread(groups.iter().filter(|g| g.has_negatives()).map(|g| g.false_positive_rate));
    let precision = spread(groups.iter().map(|g| g.precision));

    let demographic_parity_difference = ppr.gap();
    let equal_opportunity_difference = tpr.gap();
    let equalized_odds_difference = tpr.gap().max(fpr.gap());
    let disparate_impact_ratio = if ppr.max > 0.0 { ppr.min / ppr.max } else { 1.0 };
    let statistical_parity = 1.0 - demographic_parity_difference;
    let predictive_parity = 1.0 - precision.gap();

    let overall_score = [
        1.0 - demographic_parity_difference.min(1.0),
        1.0 - equal_opportunity_difference.min(1.0),
        1.0 - equalized_odds_difference.min(1.0),
        1.0 - (disparate_impact_ratio - 1.0).abs().min(1.0),
        statistical_parity,
        predictive_parity,
    ]
    .iter()
    .sum::<f64>()
        / 6.0;

    let mut recommendations = Vec::new();
    if demographic_parity_difference > PARITY_GAP_LIMIT {
        recommendations.push(
            "Positive prediction rates differ across groups; rebalance the training data \
             or train with fairness constraints."
                .to_string(),
        );
    }
    if equal_opportunity_difference > PARITY_GAP_LIMIT {
        recommendations.push(
            "True positive rates differ across groups; consider post-processing to \
             equalize opportunity."
                .to_string(),
        );
    }
    if disparate_impact_ratio < DISPARATE_IMPACT_FLOOR {
        recommendations.push(
            "Disparate impact below 0.8; review feature selection and apply bias mitigation."
                .to_string(),
        );
    }
    if recommendations.is_empty() {
        recommendations.push(
            "No significant disparity; keep monitoring fairness as the model is retrained."
                .to_string(),
        );
    }

    Ok(FairnessReport {
        sensitive_column: column.to_string(),
        positive_label: positive.to_string(),
        groups,
        demographic_parity_difference,
        equal_opportunity_difference,
        equalized_odds_difference,
        disparate_impact_ratio,
        statistical_parity,
        predictive_parity,
        overall_score,
        recommendations,
    })
}

/// `"1"` when present, otherwise the greater of the two labels.
fn positive_label<'a>(labels: &BTreeSet<&'a str>) -> &'a str {
    if labels.contains(DEFAULT_POSITIVE_LABEL) {
        return DEFAULT_POSITIVE_LABEL;
    }
    labels.last().copied().unwrap_or(DEFAULT_POSITIVE_LABEL)
}

#[derive(Debug, Clone, Copy)]
struct Spread {
    min: f64,
    max: f64,
}

impl Spread {
    fn gap(&self) -> f64 {
        self.max - self.min
    }
}

/// Range of `values`; empty input has no gap.
fn spread(values: impl Iterator<Item = f64>) -> Spread {
    values
        .fold(None, |acc: Option<Spread>, v| {
            Some(match acc {
                None => Spread { min: v, max: v },
                Some(s) => Spread {
                    min: s.min.min(v),
                    max: s.max.max(v),
                },
            })
        })
        .unwrap_or(Spread { min: 0.0, max: 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CsvSource;
    use pretty_assertions::assert_eq;

    fn dataset(csv: &str) -> Dataset {
        CsvSource::new("target").parse(csv.as_bytes()).unwrap()
    }

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_identical_groups_are_fair() {
        let ds = dataset("x,sex,target\n1,f,1\n2,f,0\n3,m,1\n4,m,0\n");
        let report = analyze(&ds, "sex", &labels(&["1", "0", "1", "0"])).unwrap();
        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups[0].group, "f");
        assert_eq!(report.groups[0].accuracy, 1.0);
        assert_eq!(report.demographic_parity_difference, 0.0);
        assert_eq!(report.disparate_impact_ratio, 1.0);
        assert_eq!(report.overall_score, 1.0);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn test_group_gaps() {
        // Group a: every row predicted positive. Group b: none.
        let ds = dataset("g,target\na,1\na,0\nb,1\nb,0\n");
        let report = analyze(&ds, "g", &labels(&["1", "1", "0", "0"])).unwrap();

        let a = &report.groups[0];
        assert_eq!(
            (a.true_positives, a.false_positives, a.true_negatives, a.false_negatives),
            (1, 1, 0, 0)
        );
        assert_eq!(a.positive_prediction_rate, 1.0);
        assert_eq!(a.false_positive_rate, 1.0);
        assert_eq!(report.groups[1].positive_prediction_rate, 0.0);

        assert_eq!(report.demographic_parity_difference, 1.0);
        assert_eq!(report.equal_opportunity_difference, 1.0);
        assert_eq!(report.equalized_odds_difference, 1.0);
        assert_eq!(report.disparate_impact_ratio, 0.0);
        assert_eq!(report.statistical_parity, 0.0);
        // Precision 0.5 vs 0 (nothing predicted).
        assert_eq!(report.predictive_parity, 0.5);
        assert!((report.overall_score - 0.5 / 6.0).abs() < 1e-12);
        assert_eq!(report.recommendations.len(), 3);
    }

    #[test]
    fn test_positive_label_choice() {
        let ds = dataset("g,target\na,yes\nb,no\n");
        let report = analyze(&ds, "g", &labels(&["yes", "yes"])).unwrap();
        assert_eq!(report.positive_label, "yes");

        let ds = dataset("g,target\na,1.0\nb,0\n");
        let report = analyze(&ds, "g", &labels(&["1", "0"])).unwrap();
        assert_eq!(report.positive_label, "1");
        assert_eq!(report.groups[0].true_positives, 1);
    }

    #[test]
    fn test_numeric_and_missing_groups() {
        let ds = dataset("age_band,target\n1,1\n2.0,1\n,0\n");
        let report = analyze(&ds, "age_band", &labels(&["1", "1", "0"])).unwrap();
        let names: Vec<&str> = report.groups.iter().map(|g| g.group.as_str()).collect();
        assert_eq!(names, vec!["1", "2", "missing"]);
    }

    #[test]
    fn test_unavailable_cases() {
        let ds = dataset("g,target\na,1\na,0\n");
        assert_eq!(
            analyze(&ds, "race", &labels(&["1", "0"])).unwrap_err(),
            FairnessUnavailable::ColumnNotFound {
                column: "race".into()
            }
        );
        assert_eq!(
            analyze(&ds, "g", &labels(&["1", "0"])).unwrap_err(),
            FairnessUnavailable::TooFewGroups { column: "g".into() }
        );

        let ds = dataset("g,target\na,x\nb,y\nb,z\n");
        assert_eq!(
            analyze(&ds, "g", &labels(&["x", "y", "z"])).unwrap_err(),
            FairnessUnavailable::NotBinary { labels: 3 }
        );
    }
}
