//! In-memory dataset: typed feature rows and a positional target vector.

use crate::data::schema::DatasetSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single feature cell.
///
/// Serializes as a bare JSON number, string or `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Categorical(String),
    Missing,
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "{v}"),
            Self::Categorical(s) => f.write_str(s),
            Self::Missing => Ok(()),
        }
    }
}

/// One dataset row, aligned with `DatasetSchema::features`.
pub type FeatureRow = Vec<FeatureValue>;

/// A parsed dataset. Row order is fixed at parse time and never changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: DatasetSchema,
    rows: Vec<FeatureRow>,
    target: Vec<String>,
}

impl Dataset {
    pub(crate) fn new(schema: DatasetSchema, rows: Vec<FeatureRow>, target: Vec<String>) -> Self {
        debug_assert_eq!(rows.len(), target.len());
        Self {
            schema,
            rows,
            target,
        }
    }

    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn target(&self) -> &[String] {
        &self.target
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn feature_count(&self) -> usize {
        self.schema.features.len()
    }
}
