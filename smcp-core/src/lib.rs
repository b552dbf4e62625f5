//! # SMCP Core
//!
//! Evaluation pipeline for the Standardized Model Comparison Pipeline.
//! Loads a model artifact, runs it over a tabular dataset, computes the
//! domain's metrics, normalizes and weights them into a single 0-100
//! EvalScore, persists the result, and ranks many evaluations side by side.

pub mod comparison;
pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod evaluation;
pub mod inference;
pub mod pipeline;
pub mod runtime;
pub mod scoring;
pub mod storage;
pub mod types;

// Re-export commonly used types at the crate root.
pub use comparison::{
    ComparisonEngine, ComparisonResult, MetricMatrix, MetricMatrixRow, PairFailure,
    RankedEvaluation,
};
pub use config::{SmcpConfig, load_config};
pub use data::{Dataset, load_dataset};
pub use error::{ErrorKind, SmcpError};
pub use evaluation::Evaluation;
pub use pipeline::Pipeline;
pub use scoring::{ScoreCard, WeightTable};
pub use storage::{Catalog, FileStore, InMemoryStore, ResultStore};
pub use types::{DatasetRecord, Domain, EvalKey, Framework, ModelRecord};
