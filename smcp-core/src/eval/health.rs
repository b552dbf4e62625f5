//! Dataset health and deployment verdict.
//!
//! Runs after the domain metrics. It looks at the evaluation dataset itself
//! (missing cells, class balance, sample size, near-constant columns) and at
//! the headline metric, and produces a 0-100 meta score with flags, one
//! recommendation per flag and a verdict. It never changes `eval_score`.

use crate::data::{Dataset, FeatureValue};
use crate::inference::backends::canonical_label;
use crate::types::Domain;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

const METRIC_WEIGHT: f64 = 0.65;
const DATASET_WEIGHT: f64 = 0.25;
/// No training metrics are available, so the complexity term is always full.
const COMPLEXITY_WEIGHT: f64 = 0.10;

/// Rows below which the sample is considered small.
const SMALL_SAMPLE_ROWS: usize = 100;
/// Share of rows one value must cover for a column to count as near-constant.
const NEAR_CONSTANT_SHARE: f64 = 0.95;

/// Primary metric used when the domain's headline metric is absent.
const NEUTRAL_PRIMARY: f64 = 50.0;

/// Summary statistics of the evaluation dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub rows: usize,
    pub features: usize,
    /// Empty feature cells across the whole dataset.
    pub missing_cells: usize,
    /// Share of the most frequent target label. Classification only.
    pub imbalance_ratio: Option<f64>,
    /// Share of feature columns dominated by a single value.
    pub low_variance_fraction: f64,
}

impl DatasetStats {
    pub fn collect(dataset: &Dataset, domain: Domain) -> Self {
        let rows = dataset.row_count();
        let features = dataset.feature_count();
        let missing_cells = dataset.schema().features.iter().map(|c| c.missing).sum();

        let imbalance_ratio = (domain == Domain::Classification && rows > 0).then(|| {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for label in dataset.target() {
                *counts.entry(canonical_label(label)).or_default() += 1;
            }
            let majority = counts.values().copied().max().unwrap_or(0);
            majority as f64 / rows as f64
        });

        let near_constant = (0..features)
            .filter(|&col| is_near_constant(dataset, col))
            .count();
        let low_variance_fraction = if features > 0 {
            near_constant as f64 / features as f64
        } else {
            0.0
        };

        Self {
            rows,
            features,
            missing_cells,
            imbalance_ratio,
            low_variance_fraction,
        }
    }

    /// 0-100, starting from 100 and losing points for each data problem.
    pub fn health_score(&self) -> f64 {
        let mut score = 100.0;

        if self.rows > 0 {
            let cells = (self.rows * self.features.max(1)) as f64;
            score -= (self.missing_cells as f64 / cells * 100.0).min(30.0);
        }
        if let Some(ratio) = self.imbalance_ratio {
            if ratio > 0.6 {
                score -= (ratio - 0.5) * 80.0;
            }
        }
        if self.rows < SMALL_SAMPLE_ROWS {
            score -= (1.0 - self.rows as f64 / SMALL_SAMPLE_ROWS as f64) * 20.0;
        }
        score -= self.low_variance_fraction * 10.0;

        score.clamp(0.0, 100.0)
    }
}

fn is_near_constant(dataset: &Dataset, col: usize) -> bool {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut present = 0usize;
    for row in dataset.rows() {
        let cell = &row[col];
        if matches!(cell, FeatureValue::Missing) {
            continue;
        }
        present += 1;
        *counts.entry(cell.to_string()).or_default() += 1;
    }
    if present == 0 {
        return true;
    }
    let dominant = counts.values().copied().max().unwrap_or(0);
    dominant as f64 / present as f64 >= NEAR_CONSTANT_SHARE
}

/// A data or performance problem found during assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthFlag {
    HighMissingValues,
    SevereClassImbalance,
    ModerateClassImbalance,
    SmallSampleSize,
    ManyLowVarianceFeatures,
    PrecisionRecallImbalance,
    LowAccuracy,
    #[serde(rename = "low_r2_score")]
    LowR2,
    #[serde(rename = "negative_r2_warning")]
    NegativeR2,
}

impl HealthFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighMissingValues => "high_missing_values",
            Self::SevereClassImbalance => "severe_class_imbalance",
            Self::ModerateClassImbalance => "moderate_class_imbalance",
            Self::SmallSampleSize => "small_sample_size",
            Self::ManyLowVarianceFeatures => "many_low_variance_features",
            Self::PrecisionRecallImbalance => "precision_recall_imbalance",
            Self::LowAccuracy => "low_accuracy",
            Self::LowR2 => "low_r2_score",
            Self::NegativeR2 => "negative_r2_warning",
        }
    }

    /// Critical flags cap the verdict at `needs_improvement`.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::SevereClassImbalance | Self::LowAccuracy | Self::NegativeR2
        )
    }

    pub fn recommendation(&self) -> Recommendation {
        let (action, why, priority) = match self {
            Self::HighMissingValues => (
                "Handle missing values with imputation or removal",
                "Missing values can bias model predictions",
                Priority::High,
            ),
            Self::SevereClassImbalance => (
                "Apply oversampling or class weighting",
                "Severe imbalance leads to biased predictions",
                Priority::High,
            ),
            Self::ModerateClassImbalance => (
                "Consider stratified sampling or cost-sensitive learning",
                "Moderate imbalance may affect minority class performance",
                Priority::Medium,
            ),
            Self::SmallSampleSize => (
                "Collect more data or use data augmentation",
                "Small datasets give unreliable estimates",
                Priority::High,
            ),
            Self::ManyLowVarianceFeatures => (
                "Remove or transform near-constant features",
                "Near-constant features do not contribute to predictions",
                Priority::Low,
            ),
            Self::PrecisionRecallImbalance => (
                "Adjust the decision threshold or rebalance classes",
                "A precision/recall gap indicates a biased classifier",
                Priority::Medium,
            ),
            Self::LowAccuracy => (
                "Tune hyperparameters or revisit feature engineering",
                "Accuracy is below 0.7",
                Priority::High,
            ),
            Self::LowR2 => (
                "Revisit feature engineering or the model architecture",
                "R2 below 0.5 indicates a poor fit",
                Priority::High,
            ),
            Self::NegativeR2 => (
                "Review the model and data before use",
                "Negative R2 means the model is worse than predicting the mean",
                Priority::Critical,
            ),
        };
        Recommendation {
            action: action.to_string(),
            why: why.to_string(),
            priority,
        }
    }
}

impl fmt::Display for HealthFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    pub why: String,
    pub priority: Priority,
}

/// Deployment readiness, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    ProductionReady,
    ProductionReadyWithMonitoring,
    NeedsImprovement,
    NotRecommended,
}

impl VerdictStatus {
    fn from_score(meta_score: f64) -> Self {
        if meta_score >= 85.0 {
            Self::ProductionReady
        } else if meta_score >= 70.0 {
            Self::ProductionReadyWithMonitoring
        } else if meta_score >= 50.0 {
            Self::NeedsImprovement
        } else {
            Self::NotRecommended
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::ProductionReady => "Model is production-ready with high confidence",
            Self::ProductionReadyWithMonitoring => {
                "Model is production-ready but requires monitoring"
            }
            Self::NeedsImprovement => "Model needs improvements before production",
            Self::NotRecommended => "Model not recommended for production use",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub message: String,
    pub critical_issues: usize,
    pub total_issues: usize,
}

/// Supplementary quality assessment attached to an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// 0-100 blend of the headline metric and dataset health.
    pub meta_score: f64,
    pub dataset_health: f64,
    /// Headline metric of the domain on a 0-100 scale.
    pub primary_metric: f64,
    pub stats: DatasetStats,
    pub flags: Vec<HealthFlag>,
    pub recommendations: Vec<Recommendation>,
    pub verdict: Verdict,
}

/// Assess an evaluation dataset together with the metrics computed on it.
pub fn assess(
    domain: Domain,
    dataset: &Dataset,
    metrics: &BTreeMap<String, f64>,
) -> Assessment {
    let stats = DatasetStats::collect(dataset, domain);
    let dataset_health = stats.health_score();
    let primary_metric = primary_metric(domain, metrics);

    let meta_score = (METRIC_WEIGHT * primary_metric
        + DATASET_WEIGHT * dataset_health
        + COMPLEXITY_WEIGHT * 100.0)
        .clamp(0.0, 100.0);

    let flags = flags(domain, &stats, metrics);
    let recommendations = if flags.is_empty() {
        vec![Recommendation {
            action: "Monitor model drift periodically".to_string(),
            why: "Even good models degrade over time".to_string(),
            priority: Priority::Low,
        }]
    } else {
        flags.iter().map(HealthFlag::recommendation).collect()
    };

    let critical_issues = flags.iter().filter(|f| f.is_critical()).count();
    let mut status = VerdictStatus::from_score(meta_score);
    let message = if critical_issues > 0 && status < VerdictStatus::NeedsImprovement {
        status = VerdictStatus::NeedsImprovement;
        "Critical issues detected; address them before deployment"
    } else {
        status.message()
    };

    Assessment {
        meta_score: round2(meta_score),
        dataset_health: round2(dataset_health),
        primary_metric: round2(primary_metric),
        stats,
        verdict: Verdict {
            status,
            message: message.to_string(),
            critical_issues,
            total_issues: flags.len(),
        },
        flags,
        recommendations,
    }
}

fn primary_metric(domain: Domain, metrics: &BTreeMap<String, f64>) -> f64 {
    let get = |name: &str| metrics.get(name).copied().filter(|v| v.is_finite());
    let value = match domain {
        Domain::Classification => get("f1").or_else(|| get("accuracy")),
        Domain::Regression => get("r2").map(|r2| r2.max(0.0)),
        Domain::Text => get("bleu"),
        Domain::Vision => get("iou"),
    };
    value.map_or(NEUTRAL_PRIMARY, |v| (v * 100.0).clamp(0.0, 100.0))
}

fn flags(
    domain: Domain,
    stats: &DatasetStats,
    metrics: &BTreeMap<String, f64>,
) -> Vec<HealthFlag> {
    let mut flags = Vec::new();

    if stats.missing_cells as f64 / stats.rows.max(1) as f64 > 0.05 {
        flags.push(HealthFlag::HighMissingValues);
    }
    match stats.imbalance_ratio {
        Some(r) if r > 0.7 => flags.push(HealthFlag::SevereClassImbalance),
        Some(r) if r > 0.6 => flags.push(HealthFlag::ModerateClassImbalance),
        _ => {}
    }
    if stats.rows < SMALL_SAMPLE_ROWS {
        flags.push(HealthFlag::SmallSampleSize);
    }
    if stats.low_variance_fraction > 0.3 {
        flags.push(HealthFlag::ManyLowVarianceFeatures);
    }

    let get = |name: &str| metrics.get(name).copied();
    match domain {
        Domain::Classification => {
            if let (Some(p), Some(r)) = (get("precision"), get("recall")) {
                if (p - r).abs() > 0.15 {
                    flags.push(HealthFlag::PrecisionRecallImbalance);
                }
            }
            if get("accuracy").is_some_and(|a| a < 0.7) {
                flags.push(HealthFlag::LowAccuracy);
            }
        }
        Domain::Regression => {
            if let Some(r2) = get("r2") {
                if r2 < 0.5 {
                    flags.push(HealthFlag::LowR2);
                }
                if r2 < 0.0 {
                    flags.push(HealthFlag::NegativeR2);
                }
            }
        }
        Domain::Text | Domain::Vision => {}
    }

    flags
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
