//! Error types for the evaluation pipeline.
//!
//! One `thiserror` enum per failure category, wrapped by [`SmcpError`]. All
//! variants carry owned strings so a run's outcome can be cloned and shared
//! between deduplicated callers.

use crate::types::{Domain, Framework};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for pipeline operations.
#[derive(Debug, Clone, Error)]
pub enum SmcpError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Framework error: {0}")]
    Framework(#[from] FrameworkError),

    #[error("Inference timed out after {timeout_secs}s")]
    InferenceTimeout { timeout_secs: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse category of an [`SmcpError`], used in comparison failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Framework,
    Timeout,
    Storage,
    Config,
    Internal,
}

impl SmcpError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Framework(_) => ErrorKind::Framework,
            Self::InferenceTimeout { .. } => ErrorKind::Timeout,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Sanitize runtime fault messages before they reach a caller.
    pub fn sanitized(self, max_chars: usize) -> Self {
        match self {
            Self::Framework(err) => Self::Framework(err.sanitized(max_chars)),
            other => other,
        }
    }
}

/// Bad artifact, dataset or schema. Always user-actionable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("target column '{column}' not found in dataset")]
    MissingTargetColumn { column: String },

    #[error("dataset contains no rows")]
    EmptyDataset,

    #[error("row {row} has {found} columns, expected {expected}")]
    InconsistentRowLength {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("row {row} has an empty target value")]
    MissingTargetValue { row: usize },

    #[error("row {row} has a non-numeric target '{value}'")]
    NonNumericTarget { row: usize, value: String },

    #[error("malformed dataset: {reason}")]
    MalformedDataset { reason: String },

    #[error("unsupported model format: {reason}")]
    UnsupportedFormat { reason: String },

    #[error("corrupt {container} artifact: {reason}")]
    CorruptArtifact { container: String, reason: String },

    #[error("model declared as {declared} but the artifact is a {artifact} model")]
    DomainMismatch { declared: Domain, artifact: Domain },

    #[error("model expects {expected} input features, dataset has {found}")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("row {row}: predicted mask has {found} pixels, reference has {expected}")]
    MaskShapeMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("row {row}: {domain} metrics cannot use a {found} prediction")]
    IncompatiblePrediction {
        row: usize,
        domain: Domain,
        found: String,
    },
}

/// The model's runtime raised during load or inference.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameworkError {
    #[error("{framework} inference failed: {message}")]
    InferenceFailure {
        framework: Framework,
        message: String,
    },

    #[error("{framework} runtime unavailable: {message}")]
    RuntimeUnavailable {
        framework: Framework,
        message: String,
    },
}

impl FrameworkError {
    pub fn inference(framework: Framework, msg: impl Into<String>) -> Self {
        Self::InferenceFailure {
            framework,
            message: msg.into(),
        }
    }

    pub fn unavailable(framework: Framework, msg: impl Into<String>) -> Self {
        Self::RuntimeUnavailable {
            framework,
            message: msg.into(),
        }
    }

    fn sanitized(self, max_chars: usize) -> Self {
        match self {
            Self::InferenceFailure { framework, message } => Self::InferenceFailure {
                framework,
                message: sanitize_runtime_message(&message, max_chars),
            },
            Self::RuntimeUnavailable { framework, message } => Self::RuntimeUnavailable {
                framework,
                message: sanitize_runtime_message(&message, max_chars),
            },
        }
    }
}

/// Collaborator storage failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    #[error("evaluation for {model_id}/{dataset_id} rejected: model or dataset no longer exists")]
    ReferentialIntegrity {
        model_id: String,
        dataset_id: String,
    },
}

impl StorageError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable {
            message: msg.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Only unavailability is transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Invalid configuration, detected at load time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("no weight distribution configured for {domain}")]
    MissingDomain { domain: Domain },

    #[error("weights for {domain} sum to {sum}, expected 1.0")]
    WeightSum { domain: Domain, sum: f64 },

    #[error("weight {weight} for {domain}.{metric} is outside [0, 1]")]
    WeightRange {
        domain: Domain,
        metric: String,
        weight: f64,
    },

    #[error("metric '{metric}' cannot be weighted in the {domain} domain")]
    UnknownMetric { domain: Domain, metric: String },

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Keep only the final exception line of a runtime fault and cap its length.
///
/// Python tracebacks put the exception on the last unindented line; frames
/// and source excerpts are indented and never reach the caller.
pub fn sanitize_runtime_message(raw: &str, max_chars: usize) -> String {
    let line = raw
        .lines()
        .rev()
        .map(str::trim_end)
        .find(|l| !l.is_empty() && !l.starts_with(char::is_whitespace) && !l.starts_with("Traceback"))
        .unwrap_or("runtime fault without message")
        .trim();

    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut truncated: String = line.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
