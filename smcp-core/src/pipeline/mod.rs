//! Single-pair evaluation entrypoint.
//!
//! A run fetches the dataset, parses it, fetches and loads the model, runs
//! inference, computes and weights the metrics, and upserts the result. Runs
//! are gated by a bounded worker pool, deduplicated per (model, dataset) key
//! and bounded by the configured timeout. A run either writes one complete
//! evaluation or nothing.

pub mod dedupe;
pub mod retry;

use crate::config::SmcpConfig;
use crate::data::load_dataset;
use crate::error::{ConfigError, SmcpError, StorageError};
use crate::eval::classification::predicted_labels;
use crate::eval::{compute_metrics, fairness, health};
use crate::evaluation::Evaluation;
use crate::inference::{InferenceRunner, LoadedModel, ModelLoader};
use crate::runtime::PythonRuntime;
use crate::scoring::aggregate;
use crate::storage::{Catalog, FileStore, ResultStore};
use crate::types::{Domain, EvalKey, Framework};
use bytes::Bytes;
use chrono::Utc;
use dedupe::InFlight;
use retry::with_retry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// The evaluation pipeline. Cheap to clone; clones share the worker pool and
/// the in-flight map.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<SmcpConfig>,
    catalog: Arc<dyn Catalog>,
    files: Arc<dyn FileStore>,
    results: Arc<dyn ResultStore>,
    loader: ModelLoader,
    runner: InferenceRunner,
    workers: Arc<Semaphore>,
    in_flight: InFlight<EvalKey, Evaluation>,
}

impl Pipeline {
    /// Build a pipeline over validated configuration.
    pub fn new(
        config: Arc<SmcpConfig>,
        catalog: Arc<dyn Catalog>,
        files: Arc<dyn FileStore>,
        results: Arc<dyn ResultStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let loader = ModelLoader::new(PythonRuntime::new(&config.python));
        let runner = InferenceRunner::new(&config.inference);
        let workers = Arc::new(Semaphore::new(config.inference.worker_count()));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                catalog,
                files,
                results,
                loader,
                runner,
                workers,
                in_flight: InFlight::new(),
            }),
        })
    }

    pub fn config(&self) -> &SmcpConfig {
        &self.inner.config
    }

    /// Evaluate one (model, dataset) pair and persist the result.
    ///
    /// Concurrent calls for the same key share a single run.
    pub async fn evaluate(&self, key: EvalKey) -> Result<Evaluation, SmcpError> {
        let inner = Arc::clone(&self.inner);
        let run_key = key.clone();
        self.inner
            .in_flight
            .run(key, move || async move { inner.run(run_key).await })
            .await
    }
}

impl Inner {
    async fn run(self: Arc<Self>, key: EvalKey) -> Result<Evaluation, SmcpError> {
        let _permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| SmcpError::internal("worker pool closed"))?;

        let run_id = Uuid::new_v4();
        let span = info_span!(
            "evaluation",
            run_id = %run_id,
            model_id = %key.model_id,
            dataset_id = %key.dataset_id
        );

        async {
            let started = Instant::now();
            let timeout_secs = self.config.inference.timeout_secs;

            let evaluation =
                match tokio::time::timeout(Duration::from_secs(timeout_secs), self.compute(&key))
                    .await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        warn!(timeout_secs, "Evaluation timed out; nothing written");
                        return Err(SmcpError::InferenceTimeout { timeout_secs });
                    }
                };

            self.persist(&evaluation).await?;

            info!(
                eval_score = evaluation.eval_score,
                domain = %evaluation.domain,
                rows = evaluation.row_count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Evaluation complete"
            );
            Ok(evaluation)
        }
        .instrument(span)
        .await
    }

    async fn compute(&self, key: &EvalKey) -> Result<Evaluation, SmcpError> {
        let retry = &self.config.storage.retry;

        let model_record = with_retry(retry, "catalog.model", || {
            self.catalog.model(&key.model_id)
        })
        .await?;
        let dataset_record = with_retry(retry, "catalog.dataset", || {
            self.catalog.dataset(&key.dataset_id)
        })
        .await?;

        // The dataset is validated before any model bytes are fetched.
        let dataset_bytes = with_retry(retry, "files.get_dataset_bytes", || {
            self.files.get_dataset_bytes(&key.dataset_id)
        })
        .await?;
        let dataset = load_dataset(&dataset_record, &dataset_bytes, &self.config.dataset)?;

        let model_bytes = with_retry(retry, "files.get_model_bytes", || {
            self.files.get_model_bytes(&key.model_id)
        })
        .await?;
        let model = self
            .load_model(model_bytes, model_record.framework, model_record.domain)
            .await?;

        let domain = model_record.domain;
        let predictions = self.runner.run(&model, &dataset, domain).await?;
        let report = compute_metrics(domain, &predictions, dataset.target())?;

        let weights = self
            .config
            .scoring
            .weights
            .get(domain)
            .ok_or(ConfigError::MissingDomain { domain })?;
        let card = aggregate(&report.values, weights);

        let mut flags = report.flags;
        for metric in &card.missing {
            if !flags.iter().any(|f| f.starts_with(metric.as_str())) {
                flags.push(format!("{metric}: not reported; contributes 0 to the score"));
            }
        }
        flags.extend(model.warnings.iter().map(ToString::to_string));

        let assessment = health::assess(domain, &dataset, &report.values);
        let fairness = match dataset_record.sensitive_column.as_deref() {
            Some(column) if domain == Domain::Classification => {
                let predicted = predicted_labels(&predictions.predictions)?;
                match fairness::analyze(&dataset, column, &predicted) {
                    Ok(report) => Some(report),
                    Err(reason) => {
                        debug!(column, %reason, "Fairness report skipped");
                        flags.push(format!("fairness: {reason}"));
                        None
                    }
                }
            }
            Some(_) => {
                flags.push(format!("fairness: not computed for {domain} models"));
                None
            }
            None => None,
        };

        Ok(Evaluation {
            model_id: key.model_id.clone(),
            dataset_id: key.dataset_id.clone(),
            domain,
            framework: model.framework,
            row_count: dataset.row_count(),
            metrics: report.values,
            normalized_metrics: card.normalized_metrics,
            weight_distribution: card.weight_distribution,
            eval_score: card.eval_score,
            flags,
            assessment: Some(assessment),
            fairness,
            evaluated_at: Utc::now(),
        })
    }

    async fn load_model(
        &self,
        bytes: Bytes,
        framework: Framework,
        domain: Domain,
    ) -> Result<LoadedModel, SmcpError> {
        self.loader.load(bytes, framework, domain).await
    }

    async fn persist(&self, evaluation: &Evaluation) -> Result<(), SmcpError> {
        let result = with_retry(&self.config.storage.retry, "results.upsert", || {
            self.results.upsert_evaluation(evaluation)
        })
        .await;

        if let Err(err @ StorageError::ReferentialIntegrity { .. }) = &result {
            warn!(error = %err, "Rejected evaluation write");
        }
        Ok(result?)
    }
}
