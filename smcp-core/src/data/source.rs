//! Tabular dataset parsing.

use crate::data::dataset::{Dataset, FeatureRow, FeatureValue};
use crate::data::schema::{ColumnSchema, ColumnType, DatasetSchema, infer_column_type};
use crate::error::ValidationError;
use tracing::debug;

/// CSV dataset source. The header row names the columns.
#[derive(Debug, Clone)]
pub struct CsvSource {
    pub target_column: String,
    pub delimiter: u8,
}

impl CsvSource {
    pub fn new(target_column: impl Into<String>) -> Self {
        Self {
            target_column: target_column.into(),
            delimiter: b',',
        }
    }

    /// Use a different single-byte field delimiter.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = u8::try_from(delimiter).unwrap_or(b',');
        self
    }

    /// Parse raw CSV bytes into a typed dataset.
    ///
    /// Blank lines are skipped, rows of empty fields are not; row numbers in errors are 1-based and count
    /// data rows only.
    pub fn parse(&self, bytes: &[u8]) -> Result<Dataset, ValidationError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()
            .map_err(malformed)?
            .iter()
            .map(str::to_string)
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(ValidationError::EmptyDataset);
        }

        let target_idx = headers
            .iter()
            .position(|h| *h == self.target_column)
            .ok_or_else(|| ValidationError::MissingTargetColumn {
                column: self.target_column.clone(),
            })?;

        let feature_count = headers.len() - 1;
        let mut columns: Vec<Vec<String>> = vec![Vec::new(); feature_count];
        let mut target = Vec::new();

        for record in reader.records() {
            let record = record.map_err(malformed)?;
            // Whitespace-only lines; a row of empty fields is still a row.
            if record.len() == 1 && record[0].is_empty() {
                continue;
            }
            let row = target.len() + 1;
            if record.len() != headers.len() {
                return Err(ValidationError::InconsistentRowLength {
                    row,
                    expected: headers.len(),
                    found: record.len(),
                });
            }

            let mut feature = 0;
            for (i, cell) in record.iter().enumerate() {
                if i == target_idx {
                    if cell.is_empty() {
                        return Err(ValidationError::MissingTargetValue { row });
                    }
                    target.push(cell.to_string());
                } else {
                    columns[feature].push(cell.to_string());
                    feature += 1;
                }
            }
        }

        if target.is_empty() {
            return Err(ValidationError::EmptyDataset);
        }

        let feature_names = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != target_idx)
            .map(|(_, name)| name.clone());

        let mut schema_columns = Vec::with_capacity(feature_count);
        for (name, cells) in feature_names.zip(&columns) {
            let refs: Vec<&str> = cells.iter().map(String::as_str).collect();
            schema_columns.push(ColumnSchema {
                name,
                dtype: infer_column_type(&refs),
                missing: refs.iter().filter(|c| c.is_empty()).count(),
            });
        }

        let rows: Vec<FeatureRow> = (0..target.len())
            .map(|r| {
                schema_columns
                    .iter()
                    .zip(&columns)
                    .map(|(schema, cells)| typed_cell(schema.dtype, &cells[r]))
                    .collect()
            })
            .collect();

        debug!(
            rows = rows.len(),
            features = feature_count,
            target = %self.target_column,
            "Parsed dataset"
        );

        Ok(Dataset::new(
            DatasetSchema {
                features: schema_columns,
                target: self.target_column.clone(),
            },
            rows,
            target,
        ))
    }
}

fn typed_cell(dtype: ColumnType, raw: &str) -> FeatureValue {
    if raw.is_empty() {
        return FeatureValue::Missing;
    }
    match dtype {
        ColumnType::Numeric => raw
            .parse::<f64>()
            .map(FeatureValue::Numeric)
            .unwrap_or_else(|_| FeatureValue::Categorical(raw.to_string())),
        ColumnType::Categorical => FeatureValue::Categorical(raw.to_string()),
    }
}

fn malformed(err: csv::Error) -> ValidationError {
    ValidationError::MalformedDataset {
        reason: err.to_string(),
    }
}
