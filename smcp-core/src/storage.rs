//! Collaborator seams: model/dataset catalog, file store and result store.
//!
//! The pipeline only ever talks to these traits. [`InMemoryStore`] implements
//! all three and is what the CLI and tests use.

use crate::error::StorageError;
use crate::evaluation::Evaluation;
use crate::types::{DatasetRecord, EvalKey, ModelRecord};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Metadata owned by the upload collaborator.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn model(&self, id: &str) -> Result<ModelRecord, StorageError>;
    async fn dataset(&self, id: &str) -> Result<DatasetRecord, StorageError>;
}

/// Raw uploaded bytes.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get_model_bytes(&self, model_id: &str) -> Result<Bytes, StorageError>;
    async fn get_dataset_bytes(&self, dataset_id: &str) -> Result<Bytes, StorageError>;
}

/// Evaluation results, one per (model, dataset).
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or overwrite. Rejects the write when either referenced record is gone.
    async fn upsert_evaluation(&self, evaluation: &Evaluation) -> Result<(), StorageError>;
    async fn get_evaluation(&self, key: &EvalKey) -> Result<Option<Evaluation>, StorageError>;
}

#[derive(Debug, Default)]
struct Tables {
    models: HashMap<String, (ModelRecord, Bytes)>,
    datasets: HashMap<String, (DatasetRecord, Bytes)>,
    evaluations: HashMap<EvalKey, Evaluation>,
}

/// In-process store with cascading deletes.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables
            .read()
            .map_err(|_| StorageError::unavailable("store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables
            .write()
            .map_err(|_| StorageError::unavailable("store lock poisoned"))
    }

    pub fn put_model(&self, record: ModelRecord, bytes: impl Into<Bytes>) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        tables
            .models
            .insert(record.id.clone(), (record, bytes.into()));
        Ok(())
    }

    pub fn put_dataset(
        &self,
        record: DatasetRecord,
        bytes: impl Into<Bytes>,
    ) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        tables
            .datasets
            .insert(record.id.clone(), (record, bytes.into()));
        Ok(())
    }

    /// Remove a model and every evaluation that references it.
    pub fn delete_model(&self, id: &str) -> Result<bool, StorageError> {
        let mut tables = self.write()?;
        let existed = tables.models.remove(id).is_some();
        let before = tables.evaluations.len();
        tables.evaluations.retain(|key, _| key.model_id != id);
        debug!(
            model_id = id,
            cascaded = before - tables.evaluations.len(),
            "Deleted model"
        );
        Ok(existed)
    }

    /// Remove a dataset and every evaluation that references it.
    pub fn delete_dataset(&self, id: &str) -> Result<bool, StorageError> {
        let mut tables = self.write()?;
        let existed = tables.datasets.remove(id).is_some();
        let before = tables.evaluations.len();
        tables.evaluations.retain(|key, _| key.dataset_id != id);
        debug!(
            dataset_id = id,
            cascaded = before - tables.evaluations.len(),
            "Deleted dataset"
        );
        Ok(existed)
    }

    pub fn evaluation_count(&self) -> usize {
        self.read().map(|t| t.evaluations.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Catalog for InMemoryStore {
    async fn model(&self, id: &str) -> Result<ModelRecord, StorageError> {
        self.read()?
            .models
            .get(id)
            .map(|(record, _)| record.clone())
            .ok_or_else(|| StorageError::not_found("model", id))
    }

    async fn dataset(&self, id: &str) -> Result<DatasetRecord, StorageError> {
        self.read()?
            .datasets
            .get(id)
            .map(|(record, _)| record.clone())
            .ok_or_else(|| StorageError::not_found("dataset", id))
    }
}

#[async_trait]
impl FileStore for InMemoryStore {
    async fn get_model_bytes(&self, model_id: &str) -> Result<Bytes, StorageError> {
        self.read()?
            .models
            .get(model_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| StorageError::not_found("model", model_id))
    }

    async fn get_dataset_bytes(&self, dataset_id: &str) -> Result<Bytes, StorageError> {
        self.read()?
            .datasets
            .get(dataset_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| StorageError::not_found("dataset", dataset_id))
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn upsert_evaluation(&self, evaluation: &Evaluation) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        if !tables.models.contains_key(&evaluation.model_id)
            || !tables.datasets.contains_key(&evaluation.dataset_id)
        {
            return Err(StorageError::ReferentialIntegrity {
                model_id: evaluation.model_id.clone(),
                dataset_id: evaluation.dataset_id.clone(),
            });
        }
        tables
            .evaluations
            .insert(evaluation.key(), evaluation.clone());
        Ok(())
    }

    async fn get_evaluation(&self, key: &EvalKey) -> Result<Option<Evaluation>, StorageError> {
        Ok(self.read()?.evaluations.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Domain, Framework};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .put_model(
                ModelRecord {
                    id: "m1".into(),
                    name: "model".into(),
                    domain: Domain::Regression,
                    framework: Framework::Native,
                },
                Bytes::from_static(b"{}"),
            )
            .unwrap();
        store
            .put_dataset(
                DatasetRecord {
                    id: "d1".into(),
                    name: "data".into(),
                    target_column: None,
                    sensitive_column: None,
                },
                Bytes::from_static(b"x,target\n1,2\n"),
            )
            .unwrap();
        store
    }

    fn evaluation(model_id: &str, dataset_id: &str, score: f64) -> Evaluation {
        Evaluation {
            model_id: model_id.into(),
            dataset_id: dataset_id.into(),
            domain: Domain::Regression,
            framework: Framework::Native,
            row_count: 1,
            metrics: BTreeMap::new(),
            normalized_metrics: BTreeMap::new(),
            weight_distribution: BTreeMap::new(),
            eval_score: score,
            flags: Vec::new(),
            assessment: None,
            fairness: None,
            evaluated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_catalog_and_files() {
        let store = seeded();
        assert_eq!(store.model("m1").await.unwrap().domain, Domain::Regression);
        assert_eq!(
            store.get_dataset_bytes("d1").await.unwrap(),
            Bytes::from_static(b"x,target\n1,2\n")
        );
        assert_eq!(
            store.model("nope").await.unwrap_err(),
            StorageError::not_found("model", "nope")
        );
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = seeded();
        store.upsert_evaluation(&evaluation("m1", "d1", 10.0)).await.unwrap();
        store.upsert_evaluation(&evaluation("m1", "d1", 20.0)).await.unwrap();
        assert_eq!(store.evaluation_count(), 1);
        let stored = store
            .get_evaluation(&EvalKey::new("m1", "d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.eval_score, 20.0);
    }

    #[tokio::test]
    async fn test_upsert_rejects_missing_reference() {
        let store = seeded();
        let err = store
            .upsert_evaluation(&evaluation("m2", "d1", 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ReferentialIntegrity { .. }));
        assert_eq!(store.evaluation_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = seeded();
        store.upsert_evaluation(&evaluation("m1", "d1", 10.0)).await.unwrap();
        assert!(store.delete_dataset("d1").unwrap());
        assert_eq!(store.evaluation_count(), 0);
        assert!(!store.delete_dataset("d1").unwrap());
    }
}
