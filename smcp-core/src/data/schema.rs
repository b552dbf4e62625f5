//! Schema definition and column type inference.

use serde::{Deserialize, Serialize};

/// Inferred type of a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Categorical,
}

/// Schema for a single feature column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnType,
    /// Number of empty cells.
    pub missing: usize,
}

/// Resolved schema of a dataset: feature columns in file order plus the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub features: Vec<ColumnSchema>,
    pub target: String,
}

impl DatasetSchema {
    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Infer a column type from its raw cells.
///
/// A column is numeric when every non-empty cell parses as a float and at
/// least one cell is non-empty.
pub fn infer_column_type(values: &[&str]) -> ColumnType {
    let mut non_empty = values.iter().filter(|v| !v.is_empty()).peekable();
    if non_empty.peek().is_none() {
        return ColumnType::Categorical;
    }
    if non_empty.all(|v| v.parse::<f64>().is_ok()) {
        ColumnType::Numeric
    } else {
        ColumnType::Categorical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_numeric() {
        assert_eq!(infer_column_type(&["1", "2.5", "-3e2"]), ColumnType::Numeric);
    }

    #[test]
    fn test_infer_numeric_with_gaps() {
        assert_eq!(infer_column_type(&["1", "", "3"]), ColumnType::Numeric);
    }

    #[test]
    fn test_infer_categorical() {
        assert_eq!(infer_column_type(&["red", "2"]), ColumnType::Categorical);
        assert_eq!(infer_column_type(&["", ""]), ColumnType::Categorical);
    }
}
