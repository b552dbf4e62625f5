//! Configuration for the evaluation pipeline.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit config file -> environment. The result is validated once and then
//! shared immutably (`Arc<SmcpConfig>`) by every pipeline component.

use crate::error::ConfigError;
use crate::scoring::weights::WeightTable;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmcpConfig {
    /// Dataset parsing configuration.
    #[serde(default)]
    pub dataset: DatasetConfig,
    /// Inference execution configuration.
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Python runtime used by the sklearn/PyTorch/Keras/ONNX adapters.
    #[serde(default)]
    pub python: PythonConfig,
    /// Collaborator storage access.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Per-domain weight distributions.
    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// Dataset parsing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Target column used when a dataset record does not name one.
    #[serde(default = "default_target_column")]
    pub target_column: String,
    /// CSV field delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            target_column: default_target_column(),
            delimiter: default_delimiter(),
        }
    }
}

fn default_target_column() -> String {
    "target".to_string()
}

fn default_delimiter() -> char {
    ','
}

/// Inference execution configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Rows per inference batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent evaluation runs (0 = available parallelism).
    #[serde(default)]
    pub workers: usize,
    /// Maximum duration of one evaluation run in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum length of a runtime fault message returned to callers.
    #[serde(default = "default_max_error_chars")]
    pub max_error_chars: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: 0,
            timeout_secs: default_timeout_secs(),
            max_error_chars: default_max_error_chars(),
        }
    }
}

impl InferenceConfig {
    /// Resolved size of the evaluation worker pool.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

fn default_batch_size() -> usize {
    1024
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_error_chars() -> usize {
    240
}

/// Python runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonConfig {
    /// Path to the Python executable.
    #[serde(default = "default_python_path")]
    pub python_path: PathBuf,
    /// Virtual environment to run in, if any.
    #[serde(default)]
    pub venv_path: Option<PathBuf>,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            python_path: default_python_path(),
            venv_path: None,
        }
    }
}

fn default_python_path() -> PathBuf {
    PathBuf::from("python3")
}

/// Collaborator storage access configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Exponential backoff for transient storage failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Scoring configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: WeightTable,
}

impl SmcpConfig {
    /// Check every invariant that must hold before the pipeline starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inference.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "inference.batch_size".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.inference.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "inference.timeout_secs".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.dataset.target_column.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "dataset.target_column".into(),
                reason: "must not be empty".into(),
            });
        }
        if !self.dataset.delimiter.is_ascii() {
            return Err(ConfigError::Invalid {
                key: "dataset.delimiter".into(),
                reason: "must be a single ASCII character".into(),
            });
        }
        if self.storage.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                key: "storage.retry.backoff_multiplier".into(),
                reason: "must be at least 1.0".into(),
            });
        }
        self.scoring.weights.validate()
    }
}

/// User-level config file (`~/.config/smcp/config.toml` on Linux).
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "smcp", "smcp")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources and validate it.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `SMCP_`, nested keys split on `__`)
/// 2. Explicit config file
/// 3. User config file
/// 4. Built-in defaults
pub fn load_config(explicit: Option<&Path>) -> Result<SmcpConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(SmcpConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::Load(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    // SMCP_INFERENCE__BATCH_SIZE, SMCP_STORAGE__RETRY__MAX_RETRIES, ...
    figment = figment.merge(Env::prefixed("SMCP_").split("__"));

    let config: SmcpConfig = figment
        .extract()
        .map_err(|e| ConfigError::Load(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Domain;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SmcpConfig::default();
        assert_eq!(config.dataset.target_column, "target");
        assert_eq!(config.inference.batch_size, 1024);
        assert_eq!(config.inference.timeout_secs, 300);
        assert_eq!(config.storage.retry.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = SmcpConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SmcpConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_worker_count_resolves() {
        let mut inference = InferenceConfig::default();
        assert!(inference.worker_count() >= 1);
        inference.workers = 3;
        assert_eq!(inference.worker_count(), 3);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = SmcpConfig::default();
        config.inference.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_load_config_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[inference]\nbatch_size = 16\n\n[scoring.weights.regression]\nr2 = 0.5\nmae = 0.25\nrmse = 0.25\n"
        )
        .unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.inference.batch_size, 16);
        let regression = config.scoring.weights.get(Domain::Regression).unwrap();
        assert_eq!(regression.get("r2"), Some(&0.5));
        // Domains not mentioned keep their defaults.
        assert!(config.scoring.weights.get(Domain::Text).is_some());
    }

    #[test]
    fn test_load_config_rejects_bad_weights() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scoring.weights.regression]\nr2 = 0.9\n").unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::WeightSum { .. }));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/smcp.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
