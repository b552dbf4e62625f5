//! Dataset loading: CSV parsing, schema inference and the target vector.

pub mod dataset;
pub mod schema;
pub mod source;

pub use dataset::{Dataset, FeatureRow, FeatureValue};
pub use schema::{ColumnSchema, ColumnType, DatasetSchema};
pub use source::CsvSource;

use crate::config::DatasetConfig;
use crate::error::ValidationError;
use crate::types::DatasetRecord;

/// Parse dataset bytes, resolving the target column from the record first
/// and the configured default second.
pub fn load_dataset(
    record: &DatasetRecord,
    bytes: &[u8],
    config: &DatasetConfig,
) -> Result<Dataset, ValidationError> {
    let target = record
        .target_column
        .as_deref()
        .unwrap_or(&config.target_column);
    CsvSource::new(target)
        .with_delimiter(config.delimiter)
        .parse(bytes)
}
