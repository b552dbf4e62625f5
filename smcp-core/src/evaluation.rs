//! The persisted result of one pipeline run.

use crate::eval::fairness::FairnessReport;
use crate::eval::health::Assessment;
use crate::scoring::WeightDistribution;
use crate::types::{Domain, EvalKey, Framework};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metrics and score for one (model, dataset) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub model_id: String,
    pub dataset_id: String,
    pub domain: Domain,
    /// Framework verified from the artifact.
    pub framework: Framework,
    pub row_count: usize,
    /// Raw values, including supplementary metrics.
    pub metrics: BTreeMap<String, f64>,
    /// Weighted metrics mapped onto [0, 1].
    pub normalized_metrics: BTreeMap<String, f64>,
    pub weight_distribution: WeightDistribution,
    pub eval_score: f64,
    /// Degenerate-metric notes and load warnings.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Dataset health, meta score and verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<Assessment>,
    /// Group metrics over the dataset's sensitive column, when one is declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fairness: Option<FairnessReport>,
    pub evaluated_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn key(&self) -> EvalKey {
        EvalKey::new(self.model_id.clone(), self.dataset_id.clone())
    }
}
