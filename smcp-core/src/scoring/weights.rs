//! Per-domain weight distributions and EvalScore aggregation.

use crate::error::ConfigError;
use crate::scoring::normalize::{direction, normalize_value};
use crate::types::Domain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance for the sum-to-one invariant.
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// Metric name -> contribution weight.
pub type WeightDistribution = BTreeMap<String, f64>;

/// Weight distributions for every domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightTable(BTreeMap<Domain, WeightDistribution>);

impl Default for WeightTable {
    fn default() -> Self {
        let table = [
            (
                Domain::Classification,
                &[("accuracy", 0.25), ("precision", 0.25), ("recall", 0.25), ("f1", 0.25)][..],
            ),
            (Domain::Regression, &[("r2", 0.4), ("mae", 0.3), ("rmse", 0.3)][..]),
            (Domain::Text, &[("bleu", 0.4), ("rouge", 0.4), ("perplexity", 0.2)][..]),
            (
                Domain::Vision,
                &[("pixel_accuracy", 0.3), ("iou", 0.35), ("dice", 0.35)][..],
            ),
        ];
        Self(
            table
                .into_iter()
                .map(|(domain, weights)| {
                    let dist = weights
                        .iter()
                        .map(|(metric, w)| (metric.to_string(), *w))
                        .collect();
                    (domain, dist)
                })
                .collect(),
        )
    }
}

impl WeightTable {
    pub fn new(table: BTreeMap<Domain, WeightDistribution>) -> Self {
        Self(table)
    }

    pub fn get(&self, domain: Domain) -> Option<&WeightDistribution> {
        self.0.get(&domain)
    }

    /// Fail fast on any distribution that could push a score outside [0, 100].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for domain in Domain::ALL {
            let weights = self
                .0
                .get(&domain)
                .ok_or(ConfigError::MissingDomain { domain })?;

            for (metric, &weight) in weights {
                if !domain.weighted_metrics().contains(&metric.as_str())
                    || direction(metric).is_none()
                {
                    return Err(ConfigError::UnknownMetric {
                        domain,
                        metric: metric.clone(),
                    });
                }
                if !(0.0..=1.0).contains(&weight) {
                    return Err(ConfigError::WeightRange {
                        domain,
                        metric: metric.clone(),
                        weight,
                    });
                }
            }

            let sum: f64 = weights.values().sum();
            if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
                return Err(ConfigError::WeightSum { domain, sum });
            }
        }
        Ok(())
    }
}

/// Result of weighting one metric report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    /// 100 x sum(weight x normalized), in [0, 100].
    pub eval_score: f64,
    pub normalized_metrics: BTreeMap<String, f64>,
    pub weight_distribution: WeightDistribution,
    /// Weighted metrics that were absent and contributed nothing.
    pub missing: Vec<String>,
}

/// Combine raw metrics into an EvalScore.
///
/// Only weighted metrics are normalized. The score is rounded to two decimals.
pub fn aggregate(metrics: &BTreeMap<String, f64>, weights: &WeightDistribution) -> ScoreCard {
    let mut normalized_metrics = BTreeMap::new();
    let mut missing = Vec::new();
    let mut total = 0.0;

    for (metric, &weight) in weights {
        let Some(&raw) = metrics.get(metric) else {
            missing.push(metric.clone());
            continue;
        };
        // Validation guarantees a policy for every weighted metric.
        let Some(dir) = direction(metric) else {
            missing.push(metric.clone());
            continue;
        };
        let normalized = normalize_value(dir, raw);
        total += weight * normalized;
        normalized_metrics.insert(metric.clone(), normalized);
    }

    let eval_score = ((total * 100.0 * 100.0).round() / 100.0).clamp(0.0, 100.0);

    ScoreCard {
        eval_score,
        normalized_metrics,
        weight_distribution: weights.clone(),
        missing,
    }
}
