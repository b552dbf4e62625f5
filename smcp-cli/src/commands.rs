//! CLI subcommand handlers.

use crate::Commands;
use anyhow::Context;
use serde::Deserialize;
use smcp_core::{
    ComparisonEngine, DatasetRecord, Domain, EvalKey, Framework, InMemoryStore, ModelRecord,
    Pipeline, SmcpConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, config: SmcpConfig) -> anyhow::Result<()> {
    match command {
        Commands::Evaluate {
            model,
            domain,
            framework,
            dataset,
            target,
            sensitive,
        } => {
            let manifest = Manifest {
                models: vec![ManifestModel {
                    id: file_id(&model),
                    name: None,
                    path: model,
                    domain,
                    framework,
                }],
                datasets: vec![ManifestDataset {
                    id: file_id(&dataset),
                    name: None,
                    path: dataset,
                    target_column: target,
                    sensitive_column: sensitive,
                }],
                pairs: Vec::new(),
            };
            let store = manifest.load_store(Path::new(".")).await?;
            let pipeline = build_pipeline(config, store)?;
            let key = manifest
                .pairs()
                .into_iter()
                .next()
                .context("nothing to evaluate")?;
            let evaluation = pipeline.evaluate(key).await?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
            Ok(())
        }
        Commands::Compare { manifest } => {
            let text = tokio::fs::read_to_string(&manifest)
                .await
                .with_context(|| format!("reading manifest {}", manifest.display()))?;
            let parsed: Manifest = toml::from_str(&text)
                .with_context(|| format!("parsing manifest {}", manifest.display()))?;
            let base = manifest.parent().unwrap_or_else(|| Path::new("."));
            let store = parsed.load_store(base).await?;
            let pairs = parsed.pairs();
            info!(pairs = pairs.len(), "Comparing");

            let engine = ComparisonEngine::new(build_pipeline(config, store)?);
            let result = engine.compare(&pairs).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn build_pipeline(config: SmcpConfig, store: Arc<InMemoryStore>) -> anyhow::Result<Pipeline> {
    Pipeline::new(Arc::new(config), store.clone(), store.clone(), store)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

/// Id derived from a file name: `models/churn.pkl` -> `churn`.
fn file_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Local description of the models, datasets and pairs to evaluate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct Manifest {
    #[serde(default)]
    pub models: Vec<ManifestModel>,
    #[serde(default)]
    pub datasets: Vec<ManifestDataset>,
    /// Every model against every dataset when empty.
    #[serde(default)]
    pub pairs: Vec<EvalKey>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct ManifestModel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub path: PathBuf,
    pub domain: Domain,
    pub framework: Framework,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct ManifestDataset {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub path: PathBuf,
    #[serde(default)]
    pub target_column: Option<String>,
    #[serde(default)]
    pub sensitive_column: Option<String>,
}

impl Manifest {
    pub fn pairs(&self) -> Vec<EvalKey> {
        if !self.pairs.is_empty() {
            return self.pairs.clone();
        }
        self.models
            .iter()
            .flat_map(|m| {
                self.datasets
                    .iter()
                    .map(move |d| EvalKey::new(m.id.clone(), d.id.clone()))
            })
            .collect()
    }

    /// Read every listed file into a fresh store. Relative paths resolve against `base`.
    pub async fn load_store(&self, base: &Path) -> anyhow::Result<Arc<InMemoryStore>> {
        let store = InMemoryStore::new();
        for model in &self.models {
            let path = base.join(&model.path);
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading model {}", path.display()))?;
            store.put_model(
                ModelRecord {
                    id: model.id.clone(),
                    name: model.name.clone().unwrap_or_else(|| model.id.clone()),
                    domain: model.domain,
                    framework: model.framework,
                },
                bytes,
            )?;
        }
        for dataset in &self.datasets {
            let path = base.join(&dataset.path);
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading dataset {}", path.display()))?;
            store.put_dataset(
                DatasetRecord {
                    id: dataset.id.clone(),
                    name: dataset.name.clone().unwrap_or_else(|| dataset.id.clone()),
                    target_column: dataset.target_column.clone(),
                    sensitive_column: dataset.sensitive_column.clone(),
                },
                bytes,
            )?;
        }
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use smcp_core::ResultStore;

    const MANIFEST: &str = r#"
        [[models]]
        id = "line"
        path = "line.json"
        domain = "regression"
        framework = "native"

        [[models]]
        id = "steep"
        path = "steep.json"
        domain = "regression"
        framework = "native"

        [[datasets]]
        id = "points"
        path = "points.csv"
        target_column = "y"
    "#;

    fn write_fixtures(dir: &Path) {
        let model = |slope: f64| {
            format!(
                r#"{{"format": "smcp-native", "version": 1,
                    "model": {{"kind": "linear_regressor", "coefficients": [{slope}], "intercept": 0.0}}}}"#
            )
        };
        std::fs::write(dir.join("line.json"), model(1.0)).unwrap();
        std::fs::write(dir.join("steep.json"), model(3.0)).unwrap();
        std::fs::write(dir.join("points.csv"), "x,y\n1,1\n2,2\n3,3\n").unwrap();
    }

    #[test]
    fn test_file_id_uses_stem() {
        assert_eq!(file_id(Path::new("models/churn.pkl")), "churn");
        assert_eq!(file_id(Path::new("data.csv")), "data");
    }

    #[test]
    fn test_pairs_default_to_cross_product() {
        let manifest: Manifest = toml::from_str(MANIFEST).unwrap();
        assert_eq!(
            manifest.pairs(),
            vec![EvalKey::new("line", "points"), EvalKey::new("steep", "points")]
        );
    }

    #[test]
    fn test_explicit_pairs_win() {
        let text = format!(
            "{MANIFEST}\n[[pairs]]\nmodel_id = \"steep\"\ndataset_id = \"points\"\n"
        );
        let manifest: Manifest = toml::from_str(&text).unwrap();
        assert_eq!(manifest.pairs(), vec![EvalKey::new("steep", "points")]);
    }

    #[test]
    fn test_unknown_domain_rejected() {
        let text = MANIFEST.replacen("regression", "audio", 1);
        assert!(toml::from_str::<Manifest>(&text).is_err());
    }

    #[tokio::test]
    async fn test_sensitive_column_reaches_catalog() {
        use smcp_core::Catalog;

        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let text = MANIFEST.replace(
            "target_column = \"y\"",
            "target_column = \"y\"\nsensitive_column = \"x\"",
        );
        let manifest: Manifest = toml::from_str(&text).unwrap();
        let store = manifest.load_store(dir.path()).await.unwrap();
        let record = store.dataset("points").await.unwrap();
        assert_eq!(record.sensitive_column.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let manifest: Manifest = toml::from_str(MANIFEST).unwrap();
        let err = manifest.load_store(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("line.json"), "{err}");
    }

    #[tokio::test]
    async fn test_manifest_comparison_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let manifest: Manifest = toml::from_str(MANIFEST).unwrap();

        let store = manifest.load_store(dir.path()).await.unwrap();
        let pipeline = build_pipeline(SmcpConfig::default(), store.clone()).unwrap();
        let result = ComparisonEngine::new(pipeline)
            .compare(&manifest.pairs())
            .await;

        assert!(result.failures.is_empty(), "{:?}", result.failures);
        assert_eq!(result.ranking[0].evaluation.model_id, "line");
        assert_eq!(result.ranking[0].evaluation.eval_score, 100.0);
        assert!(
            store
                .get_evaluation(&EvalKey::new("steep", "points"))
                .await
                .unwrap()
                .is_some()
        );
    }
}
