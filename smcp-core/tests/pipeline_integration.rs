//! End-to-end pipeline runs over native model artifacts and an in-memory store.
//!
//! A wrapping store injects latency, transient failures and concurrent
//! deletes so the run's storage contract can be observed from outside.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;
use smcp_core::config::RetryConfig;
use smcp_core::error::{StorageError, ValidationError};
use smcp_core::eval::health::{HealthFlag, VerdictStatus};
use smcp_core::{
    Catalog, DatasetRecord, Domain, ErrorKind, EvalKey, Evaluation, FileStore, Framework,
    InMemoryStore, ModelRecord, Pipeline, ResultStore, SmcpConfig, SmcpError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Store wrapper that counts fetches and misbehaves on request.
#[derive(Default)]
struct TestStore {
    inner: InMemoryStore,
    model_fetches: AtomicUsize,
    fetch_delay: Option<Duration>,
    transient_failures: AtomicUsize,
    delete_model_on_fetch: bool,
    active_fetches: AtomicUsize,
    peak_active_fetches: AtomicUsize,
}

impl TestStore {
    fn model_fetches(&self) -> usize {
        self.model_fetches.load(Ordering::SeqCst)
    }

    fn peak_active_fetches(&self) -> usize {
        self.peak_active_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Catalog for TestStore {
    async fn model(&self, id: &str) -> Result<ModelRecord, StorageError> {
        self.inner.model(id).await
    }

    async fn dataset(&self, id: &str) -> Result<DatasetRecord, StorageError> {
        self.inner.dataset(id).await
    }
}

#[async_trait]
impl FileStore for TestStore {
    async fn get_model_bytes(&self, model_id: &str) -> Result<Bytes, StorageError> {
        self.model_fetches.fetch_add(1, Ordering::SeqCst);
        let active = self.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active_fetches.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.active_fetches.fetch_sub(1, Ordering::SeqCst);
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::unavailable("connection reset"));
        }
        let bytes = self.inner.get_model_bytes(model_id).await?;
        if self.delete_model_on_fetch {
            self.inner.delete_model(model_id)?;
        }
        Ok(bytes)
    }

    async fn get_dataset_bytes(&self, dataset_id: &str) -> Result<Bytes, StorageError> {
        self.inner.get_dataset_bytes(dataset_id).await
    }
}

#[async_trait]
impl ResultStore for TestStore {
    async fn upsert_evaluation(&self, evaluation: &Evaluation) -> Result<(), StorageError> {
        self.inner.upsert_evaluation(evaluation).await
    }

    async fn get_evaluation(&self, key: &EvalKey) -> Result<Option<Evaluation>, StorageError> {
        self.inner.get_evaluation(key).await
    }
}

fn native(model: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({"format": "smcp-native", "version": 1, "model": model})).unwrap()
}

fn model_record(id: &str, domain: Domain) -> ModelRecord {
    ModelRecord {
        id: id.into(),
        name: id.into(),
        domain,
        framework: Framework::Native,
    }
}

fn dataset_record(id: &str) -> DatasetRecord {
    DatasetRecord {
        id: id.into(),
        name: id.into(),
        target_column: None,
        sensitive_column: None,
    }
}

/// One model and one dataset per domain, all predicting perfectly.
fn seed(store: &InMemoryStore) {
    store
        .put_model(
            model_record("clf", Domain::Classification),
            native(json!({
                "kind": "logistic_classifier",
                "classes": ["a", "b"],
                "coefficients": [[1.0], [-1.0]],
                "intercepts": [0.0, 0.0]
            })),
        )
        .unwrap();
    store
        .put_dataset(
            dataset_record("clf-data"),
            "x,target\n1,a\n2,a\n-1,b\n-2,b\n",
        )
        .unwrap();

    store
        .put_model(
            model_record("reg", Domain::Regression),
            native(json!({"kind": "linear_regressor", "coefficients": [2.0], "intercept": 1.0})),
        )
        .unwrap();
    store
        .put_dataset(dataset_record("reg-data"), "x,target\n1,3\n2,5\n3,7\n")
        .unwrap();

    store
        .put_model(
            model_record("txt", Domain::Text),
            native(json!({
                "kind": "text_lookup",
                "responses": {"hello": "the cat sat on the mat"},
                "token_probabilities": {"the": 1.0, "cat": 1.0, "sat": 1.0, "on": 1.0, "mat": 1.0}
            })),
        )
        .unwrap();
    store
        .put_dataset(
            dataset_record("txt-data"),
            "prompt,target\nhello,the cat sat on the mat\n",
        )
        .unwrap();

    store
        .put_model(
            model_record("seg", Domain::Vision),
            native(json!({"kind": "threshold_segmenter", "threshold": 0.5})),
        )
        .unwrap();
    store
        .put_dataset(
            dataset_record("seg-data"),
            "p1,p2,p3,target\n0.9,0.1,0.2,1 0 0\n0.7,0.8,0.0,1 1 0\n",
        )
        .unwrap();
}

fn fast_config() -> SmcpConfig {
    let mut config = SmcpConfig::default();
    config.storage.retry = RetryConfig {
        max_retries: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        backoff_multiplier: 2.0,
    };
    config
}

fn pipeline_over(store: Arc<TestStore>, config: SmcpConfig) -> Pipeline {
    Pipeline::new(Arc::new(config), store.clone(), store.clone(), store).unwrap()
}

fn seeded(store: TestStore) -> Arc<TestStore> {
    seed(&store.inner);
    Arc::new(store)
}

#[tokio::test]
async fn test_every_domain_scores_perfect_models() {
    let store = seeded(TestStore::default());
    let pipeline = pipeline_over(store.clone(), fast_config());

    let cases = [
        ("clf", "clf-data", Domain::Classification, 100.0),
        ("reg", "reg-data", Domain::Regression, 100.0),
        // Perplexity 1 normalizes to 0.5 under the 0.2 weight.
        ("txt", "txt-data", Domain::Text, 90.0),
        ("seg", "seg-data", Domain::Vision, 100.0),
    ];
    for (model, dataset, domain, score) in cases {
        let evaluation = pipeline
            .evaluate(EvalKey::new(model, dataset))
            .await
            .unwrap();
        assert_eq!(evaluation.domain, domain);
        assert_eq!(evaluation.framework, Framework::Native);
        assert_eq!(evaluation.eval_score, score, "{model}");
        for metric in domain.weighted_metrics() {
            assert!(
                evaluation.normalized_metrics.contains_key(*metric),
                "{model} lacks {metric}"
            );
        }
    }
    assert_eq!(store.inner.evaluation_count(), 4);
}

#[tokio::test]
async fn test_result_is_persisted_and_readable() {
    let store = seeded(TestStore::default());
    let pipeline = pipeline_over(store.clone(), fast_config());
    let key = EvalKey::new("reg", "reg-data");

    let evaluation = pipeline.evaluate(key.clone()).await.unwrap();
    let stored = store.get_evaluation(&key).await.unwrap().unwrap();
    assert_eq!(stored, evaluation);
    assert_eq!(stored.row_count, 3);
    assert_eq!(stored.metrics["mae"], 0.0);
    assert_eq!(stored.metrics["r2"], 1.0);
}

#[tokio::test]
async fn test_rerun_overwrites_single_record() {
    let store = seeded(TestStore::default());
    let pipeline = pipeline_over(store.clone(), fast_config());
    let key = EvalKey::new("clf", "clf-data");

    let first = pipeline.evaluate(key.clone()).await.unwrap();
    let second = pipeline.evaluate(key.clone()).await.unwrap();

    assert_eq!(first.eval_score, second.eval_score);
    assert_eq!(first.metrics, second.metrics);
    assert_eq!(store.inner.evaluation_count(), 1);
    assert_eq!(store.model_fetches(), 2);
}

#[tokio::test]
async fn test_missing_target_fails_before_model_fetch() {
    let store = seeded(TestStore::default());
    store
        .inner
        .put_dataset(dataset_record("no-target"), "x,y\n1,2\n")
        .unwrap();
    let pipeline = pipeline_over(store.clone(), fast_config());

    let err = pipeline
        .evaluate(EvalKey::new("reg", "no-target"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SmcpError::Validation(ValidationError::MissingTargetColumn { ref column }) if column == "target"
    ));
    assert_eq!(store.model_fetches(), 0);
    assert_eq!(store.inner.evaluation_count(), 0);
}

#[tokio::test]
async fn test_dataset_record_overrides_target_column() {
    let store = seeded(TestStore::default());
    store
        .inner
        .put_dataset(
            DatasetRecord {
                id: "custom".into(),
                name: "custom".into(),
                target_column: Some("price".into()),
                sensitive_column: None,
            },
            "price,x\n3,1\n5,2\n",
        )
        .unwrap();
    let pipeline = pipeline_over(store, fast_config());

    let evaluation = pipeline
        .evaluate(EvalKey::new("reg", "custom"))
        .await
        .unwrap();
    assert_eq!(evaluation.eval_score, 100.0);
}

#[tokio::test]
async fn test_assessment_accompanies_score() {
    let store = seeded(TestStore::default());
    let pipeline = pipeline_over(store, fast_config());

    let evaluation = pipeline
        .evaluate(EvalKey::new("reg", "reg-data"))
        .await
        .unwrap();
    assert_eq!(evaluation.eval_score, 100.0);

    let assessment = evaluation.assessment.unwrap();
    assert_eq!(assessment.stats.rows, 3);
    assert_eq!(assessment.flags, vec![HealthFlag::SmallSampleSize]);
    // 0.65 * 100 + 0.25 * 80.6 + 10
    assert_eq!(assessment.meta_score, 95.15);
    assert_eq!(assessment.verdict.status, VerdictStatus::ProductionReady);
}

fn grouped_dataset(sensitive: &str) -> DatasetRecord {
    DatasetRecord {
        sensitive_column: Some(sensitive.into()),
        ..dataset_record("grouped")
    }
}

#[tokio::test]
async fn test_fairness_report_for_sensitive_column() {
    let store = seeded(TestStore::default());
    store
        .inner
        .put_model(
            model_record("clf2", Domain::Classification),
            native(json!({
                "kind": "logistic_classifier",
                "classes": ["no", "yes"],
                "coefficients": [[-1.0, 0.0], [1.0, 0.0]],
                "intercepts": [0.0, 0.0]
            })),
        )
        .unwrap();
    // Group 0 is always right; group 1 gets one positive wrong.
    store
        .inner
        .put_dataset(
            grouped_dataset("grp"),
            "x,grp,target\n1,0,yes\n-1,0,no\n2,1,yes\n-2,1,yes\n",
        )
        .unwrap();
    let pipeline = pipeline_over(store, fast_config());

    let evaluation = pipeline
        .evaluate(EvalKey::new("clf2", "grouped"))
        .await
        .unwrap();
    let fairness = evaluation.fairness.unwrap();
    assert_eq!(fairness.sensitive_column, "grp");
    assert_eq!(fairness.positive_label, "yes");

    let groups: Vec<(&str, usize, f64)> = fairness
        .groups
        .iter()
        .map(|g| (g.group.as_str(), g.sample_count, g.true_positive_rate))
        .collect();
    assert_eq!(groups, vec![("0", 2, 1.0), ("1", 2, 0.5)]);
    assert_eq!(fairness.equal_opportunity_difference, 0.5);
    assert!(evaluation.flags.iter().all(|f| !f.starts_with("fairness")));
}

#[tokio::test]
async fn test_fairness_skipped_with_flag() {
    let store = seeded(TestStore::default());
    store
        .inner
        .put_dataset(grouped_dataset("region"), "x,target\n1,3\n2,5\n")
        .unwrap();
    let pipeline = pipeline_over(store, fast_config());

    let evaluation = pipeline
        .evaluate(EvalKey::new("reg", "grouped"))
        .await
        .unwrap();
    assert!(evaluation.fairness.is_none());
    assert!(
        evaluation
            .flags
            .contains(&"fairness: not computed for regression models".to_string()),
        "{:?}",
        evaluation.flags
    );
}

#[tokio::test]
async fn test_unknown_ids_are_storage_errors() {
    let store = seeded(TestStore::default());
    let pipeline = pipeline_over(store, fast_config());

    let err = pipeline
        .evaluate(EvalKey::new("ghost", "reg-data"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[tokio::test]
async fn test_unrecognized_artifact_is_validation_error() {
    let store = seeded(TestStore::default());
    store
        .inner
        .put_model(model_record("junk", Domain::Regression), "not a model")
        .unwrap();
    let pipeline = pipeline_over(store.clone(), fast_config());

    let err = pipeline
        .evaluate(EvalKey::new("junk", "reg-data"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(store.inner.evaluation_count(), 0);
}

#[tokio::test]
async fn test_feature_count_mismatch_is_rejected() {
    let store = seeded(TestStore::default());
    store
        .inner
        .put_dataset(dataset_record("wide"), "x1,x2,target\n1,2,3\n")
        .unwrap();
    let pipeline = pipeline_over(store, fast_config());

    let err = pipeline
        .evaluate(EvalKey::new("reg", "wide"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SmcpError::Validation(ValidationError::ShapeMismatch {
            expected: 1,
            found: 2
        })
    ));
}

#[tokio::test]
async fn test_declared_framework_mismatch_is_flagged() {
    let store = seeded(TestStore::default());
    store
        .inner
        .put_model(
            ModelRecord {
                id: "mislabeled".into(),
                name: "mislabeled".into(),
                domain: Domain::Regression,
                framework: Framework::Sklearn,
            },
            native(json!({"kind": "linear_regressor", "coefficients": [2.0], "intercept": 1.0})),
        )
        .unwrap();
    let pipeline = pipeline_over(store, fast_config());

    let evaluation = pipeline
        .evaluate(EvalKey::new("mislabeled", "reg-data"))
        .await
        .unwrap();
    assert_eq!(evaluation.framework, Framework::Native);
    assert!(
        evaluation
            .flags
            .iter()
            .any(|f| f.starts_with("framework_mismatch")),
        "{:?}",
        evaluation.flags
    );
}

#[tokio::test]
async fn test_concurrent_requests_share_one_run() {
    let store = seeded(TestStore {
        fetch_delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    let pipeline = pipeline_over(store.clone(), fast_config());

    let results = join_all((0..5).map(|_| pipeline.evaluate(EvalKey::new("reg", "reg-data")))).await;

    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
    assert_eq!(store.model_fetches(), 1);
    assert_eq!(store.inner.evaluation_count(), 1);
}

#[tokio::test]
async fn test_single_worker_runs_distinct_keys_one_at_a_time() {
    let store = seeded(TestStore {
        fetch_delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    let mut config = fast_config();
    config.inference.workers = 1;
    let pipeline = pipeline_over(store.clone(), config);

    let (reg, clf) = tokio::join!(
        pipeline.evaluate(EvalKey::new("reg", "reg-data")),
        pipeline.evaluate(EvalKey::new("clf", "clf-data")),
    );

    reg.unwrap();
    clf.unwrap();
    assert_eq!(store.model_fetches(), 2);
    assert_eq!(store.peak_active_fetches(), 1);
    assert_eq!(store.inner.evaluation_count(), 2);
}

#[tokio::test]
async fn test_timeout_writes_nothing() {
    let store = seeded(TestStore {
        fetch_delay: Some(Duration::from_secs(3)),
        ..Default::default()
    });
    let mut config = fast_config();
    config.inference.timeout_secs = 1;
    let pipeline = pipeline_over(store.clone(), config);

    let err = pipeline
        .evaluate(EvalKey::new("reg", "reg-data"))
        .await
        .unwrap_err();
    assert!(matches!(err, SmcpError::InferenceTimeout { timeout_secs: 1 }));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(store.inner.evaluation_count(), 0);
}

#[tokio::test]
async fn test_transient_fetch_failures_are_retried() {
    let store = seeded(TestStore {
        transient_failures: AtomicUsize::new(2),
        ..Default::default()
    });
    let pipeline = pipeline_over(store.clone(), fast_config());

    let evaluation = pipeline
        .evaluate(EvalKey::new("reg", "reg-data"))
        .await
        .unwrap();
    assert_eq!(evaluation.eval_score, 100.0);
    assert_eq!(store.model_fetches(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_surface_storage_error() {
    let store = seeded(TestStore {
        transient_failures: AtomicUsize::new(10),
        ..Default::default()
    });
    let pipeline = pipeline_over(store.clone(), fast_config());

    let err = pipeline
        .evaluate(EvalKey::new("reg", "reg-data"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SmcpError::Storage(StorageError::Unavailable { .. })
    ));
    assert_eq!(store.model_fetches(), 4);
}

#[tokio::test]
async fn test_model_deleted_mid_run_rejects_write() {
    let store = seeded(TestStore {
        delete_model_on_fetch: true,
        ..Default::default()
    });
    let pipeline = pipeline_over(store.clone(), fast_config());

    let err = pipeline
        .evaluate(EvalKey::new("reg", "reg-data"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SmcpError::Storage(StorageError::ReferentialIntegrity { .. })
    ));
    assert_eq!(store.inner.evaluation_count(), 0);
}

#[tokio::test]
async fn test_invalid_weights_rejected_at_startup() {
    let store = seeded(TestStore::default());
    let config: SmcpConfig = toml::from_str(
        r#"
        [scoring.weights.classification]
        accuracy = 0.5
        f1 = 0.4

        [scoring.weights.regression]
        r2 = 1.0

        [scoring.weights.text]
        bleu = 1.0

        [scoring.weights.vision]
        iou = 1.0
        "#,
    )
    .unwrap();
    let result = Pipeline::new(Arc::new(config), store.clone(), store.clone(), store);
    assert!(result.is_err());
}
