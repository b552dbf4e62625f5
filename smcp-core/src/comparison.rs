//! Multi-pair comparison and ranking.

use crate::error::{ErrorKind, SmcpError};
use crate::evaluation::Evaluation;
use crate::pipeline::Pipeline;
use crate::types::{Domain, EvalKey};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// One ranked evaluation. Ranks are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEvaluation {
    pub rank: usize,
    #[serde(flatten)]
    pub evaluation: Evaluation,
}

/// A pair whose run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairFailure {
    pub model_id: String,
    pub dataset_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Normalized (radar) and raw values of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMatrixRow {
    pub model_id: String,
    pub dataset_id: String,
    pub normalized: BTreeMap<String, f64>,
    pub raw: BTreeMap<String, f64>,
}

/// Metric-by-metric view of same-domain evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMatrix {
    pub domain: Domain,
    /// Axes: the domain's weighted metrics.
    pub metrics: Vec<String>,
    /// Rows in ranking order.
    pub rows: Vec<MetricMatrixRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub ranking: Vec<RankedEvaluation>,
    pub failures: Vec<PairFailure>,
    /// Present only when every successful evaluation shares one domain.
    pub metric_matrix: Option<MetricMatrix>,
}

/// Runs the pipeline over many pairs and ranks the outcomes.
#[derive(Clone)]
pub struct ComparisonEngine {
    pipeline: Pipeline,
}

impl ComparisonEngine {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Evaluate every distinct pair concurrently, isolating per-pair failures.
    pub async fn compare(&self, pairs: &[EvalKey]) -> ComparisonResult {
        let unique: BTreeSet<&EvalKey> = pairs.iter().collect();
        let outcomes = join_all(unique.into_iter().map(|key| {
            let pipeline = self.pipeline.clone();
            let key = key.clone();
            async move {
                let result = pipeline.evaluate(key.clone()).await;
                (key, result)
            }
        }))
        .await;

        let mut evaluations = Vec::new();
        let mut failures = Vec::new();
        for (key, result) in outcomes {
            match result {
                Ok(evaluation) => evaluations.push(evaluation),
                Err(err) => failures.push(pair_failure(key, &err)),
            }
        }

        let ranking = rank_evaluations(evaluations);
        let metric_matrix = build_metric_matrix(&ranking);

        info!(
            requested = pairs.len(),
            ranked = ranking.len(),
            failed = failures.len(),
            "Comparison complete"
        );

        ComparisonResult {
            ranking,
            failures,
            metric_matrix,
        }
    }
}

fn pair_failure(key: EvalKey, err: &SmcpError) -> PairFailure {
    PairFailure {
        model_id: key.model_id,
        dataset_id: key.dataset_id,
        kind: err.kind(),
        message: err.to_string(),
    }
}

/// Order by descending score, then ascending model id, then ascending dataset id.
pub fn rank_evaluations(mut evaluations: Vec<Evaluation>) -> Vec<RankedEvaluation> {
    evaluations.sort_by(|a, b| {
        b.eval_score
            .partial_cmp(&a.eval_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.model_id.cmp(&b.model_id))
            .then_with(|| a.dataset_id.cmp(&b.dataset_id))
    });
    evaluations
        .into_iter()
        .enumerate()
        .map(|(i, evaluation)| RankedEvaluation {
            rank: i + 1,
            evaluation,
        })
        .collect()
}

/// Metric matrix over the ranking, or `None` when domains are mixed or nothing succeeded.
pub fn build_metric_matrix(ranking: &[RankedEvaluation]) -> Option<MetricMatrix> {
    let domain = ranking.first()?.evaluation.domain;
    if ranking.iter().any(|r| r.evaluation.domain != domain) {
        return None;
    }

    let metrics: Vec<String> = domain
        .weighted_metrics()
        .iter()
        .map(|m| m.to_string())
        .collect();
    let pick = |source: &BTreeMap<String, f64>| -> BTreeMap<String, f64> {
        metrics
            .iter()
            .filter_map(|m| source.get(m).map(|v| (m.clone(), *v)))
            .collect()
    };
    let rows = ranking
        .iter()
        .map(|r| MetricMatrixRow {
            model_id: r.evaluation.model_id.clone(),
            dataset_id: r.evaluation.dataset_id.clone(),
            normalized: pick(&r.evaluation.normalized_metrics),
            raw: pick(&r.evaluation.metrics),
        })
        .collect();

    Some(MetricMatrix {
        domain,
        metrics,
        rows,
    })
}
