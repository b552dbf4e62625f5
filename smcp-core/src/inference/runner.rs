//! Batched inference over a dataset, preserving row order.

use crate::config::InferenceConfig;
use crate::data::Dataset;
use crate::error::{FrameworkError, SmcpError, ValidationError};
use crate::eval::text::tokenize;
use crate::inference::backends::{Prediction, ProbabilityMatrix};
use crate::inference::loader::LoadedModel;
use crate::types::Domain;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Model outputs aligned 1:1 with dataset rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSet {
    pub predictions: Vec<Prediction>,
    pub probabilities: Option<ProbabilityMatrix>,
    /// Per-row probabilities of each reference token.
    pub token_probabilities: Option<Vec<Vec<f64>>>,
}

/// Drives a loaded model over a dataset in fixed-size batches.
#[derive(Debug, Clone)]
pub struct InferenceRunner {
    batch_size: usize,
    max_error_chars: usize,
}

impl InferenceRunner {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_error_chars: config.max_error_chars,
        }
    }

    /// Run inference over every row. Runtime faults are sanitized before
    /// they are returned.
    pub async fn run(
        &self,
        model: &LoadedModel,
        dataset: &Dataset,
        domain: Domain,
    ) -> Result<PredictionSet, SmcpError> {
        self.run_batches(model, dataset, domain)
            .await
            .map_err(|e| e.sanitized(self.max_error_chars))
    }

    async fn run_batches(
        &self,
        model: &LoadedModel,
        dataset: &Dataset,
        domain: Domain,
    ) -> Result<PredictionSet, SmcpError> {
        if let Some(expected) = model.input_dim() {
            if expected != dataset.feature_count() {
                return Err(ValidationError::ShapeMismatch {
                    expected,
                    found: dataset.feature_count(),
                }
                .into());
            }
        }

        let runtime = model.runtime();
        let capabilities = model.capabilities();
        let mut want_proba = domain == Domain::Classification && capabilities.predict_proba;
        let mut want_distribution =
            domain == Domain::Text && capabilities.predict_distribution;

        let mut predictions = Vec::with_capacity(dataset.row_count());
        let mut probabilities: Option<ProbabilityMatrix> = None;
        let mut token_probabilities: Vec<Vec<f64>> = Vec::new();

        for (index, (rows, targets)) in dataset
            .rows()
            .chunks(self.batch_size)
            .zip(dataset.target().chunks(self.batch_size))
            .enumerate()
        {
            let (batch, batch_proba) = if want_proba {
                runtime.predict_with_proba(rows).await?
            } else {
                (runtime.predict(rows).await?, None)
            };
            if batch.len() != rows.len() {
                return Err(self.failure(
                    model,
                    format!("batch returned {} predictions for {} rows", batch.len(), rows.len()),
                ));
            }
            predictions.extend(batch);

            if want_proba {
                match batch_proba {
                    Some(matrix) => {
                        self.check_probabilities(model, &matrix, rows.len())?;
                        match probabilities.as_mut() {
                            None => probabilities = Some(matrix),
                            Some(acc) if acc.classes == matrix.classes => {
                                acc.rows.extend(matrix.rows)
                            }
                            Some(_) => {
                                return Err(self.failure(
                                    model,
                                    "probability classes changed between batches",
                                ));
                            }
                        }
                    }
                    None => {
                        want_proba = false;
                        probabilities = None;
                    }
                }
            }

            if want_distribution {
                match runtime.predict_distribution(rows, targets).await? {
                    Some(distribution) => {
                        self.check_distribution(model, &distribution, targets)?;
                        token_probabilities.extend(distribution);
                    }
                    None => {
                        want_distribution = false;
                        token_probabilities.clear();
                    }
                }
            }

            debug!(
                batch = index,
                rows = rows.len(),
                framework = %model.framework,
                "Inference batch complete"
            );
        }

        Ok(PredictionSet {
            predictions,
            probabilities,
            token_probabilities: want_distribution.then_some(token_probabilities),
        })
    }

    fn check_probabilities(
        &self,
        model: &LoadedModel,
        matrix: &ProbabilityMatrix,
        rows: usize,
    ) -> Result<(), SmcpError> {
        if matrix.rows.len() != rows {
            return Err(self.failure(
                model,
                format!("probabilities returned for {} of {rows} rows", matrix.rows.len()),
            ));
        }
        if matrix.rows.iter().any(|r| r.len() != matrix.classes.len()) {
            return Err(self.failure(model, "probability rows do not match the class count"));
        }
        if let Some(p) = matrix.rows.iter().flatten().find(|p| !valid_probability(**p)) {
            return Err(self.failure(model, format!("probability {p} is outside [0, 1]")));
        }
        Ok(())
    }

    fn check_distribution(
        &self,
        model: &LoadedModel,
        distribution: &[Vec<f64>],
        references: &[String],
    ) -> Result<(), SmcpError> {
        if distribution.len() != references.len() {
            return Err(self.failure(
                model,
                format!(
                    "token distribution returned for {} of {} rows",
                    distribution.len(),
                    references.len()
                ),
            ));
        }
        for (row, reference) in distribution.iter().zip(references) {
            if row.len() != tokenize(reference).len() {
                return Err(self.failure(
                    model,
                    "token distribution does not cover the reference tokens",
                ));
            }
            if let Some(p) = row.iter().find(|p| !valid_probability(**p)) {
                return Err(self.failure(
                    model,
                    format!("token probability {p} is outside [0, 1]"),
                ));
            }
        }
        Ok(())
    }

    fn failure(&self, model: &LoadedModel, message: impl Into<String>) -> SmcpError {
        FrameworkError::inference(model.framework, message).into()
    }
}

fn valid_probability(p: f64) -> bool {
    (0.0..=1.0).contains(&p)
}
