//! Per-file column statistics stored on every `Add` action.
//!
//! Stats drive pruning: UPDATE, DELETE and MERGE only open files whose
//! min/max/null counts leave room for a match. Missing entries mean
//! "unknown" and never prune.

use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};

use crate::{
    metadata::logical_schema::LogicalSchema,
    value::{Row, Value},
};

/// Column statistics for a single data file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    /// Number of rows in the file.
    pub num_records: u64,
    /// Smallest non-null value per column.
    #[serde(default)]
    pub min_values: BTreeMap<String, Value>,
    /// Largest non-null value per column.
    #[serde(default)]
    pub max_values: BTreeMap<String, Value>,
    /// Null count per column.
    #[serde(default)]
    pub null_count: BTreeMap<String, u64>,
}

impl FileStats {
    /// Compute stats for `rows` over the columns of `schema`.
    pub fn from_rows(schema: &LogicalSchema, rows: &[Row]) -> Self {
        let mut stats = FileStats {
            num_records: rows.len() as u64,
            ..FileStats::default()
        };

        for column in schema.column_names() {
            let mut nulls = 0u64;
            let mut min: Option<&Value> = None;
            let mut max: Option<&Value> = None;

            for row in rows {
                let v = row.get(column);
                if v.is_null() {
                    nulls += 1;
                    continue;
                }
                if min.is_none_or(|m| v.total_cmp(m) == Ordering::Less) {
                    min = Some(v);
                }
                if max.is_none_or(|m| v.total_cmp(m) == Ordering::Greater) {
                    max = Some(v);
                }
            }

            stats.null_count.insert(column.to_string(), nulls);
            if let (Some(min), Some(max)) = (min, max) {
                stats.min_values.insert(column.to_string(), min.clone());
                stats.max_values.insert(column.to_string(), max.clone());
            }
        }

        stats
    }

    /// Null count for `column`, if recorded.
    pub fn nulls(&self, column: &str) -> Option<u64> {
        self.null_count.get(column).copied()
    }

    /// Minimum for `column`, if recorded.
    pub fn min(&self, column: &str) -> Option<&Value> {
        self.min_values.get(column)
    }

    /// Maximum for `column`, if recorded.
    pub fn max(&self, column: &str) -> Option<&Value> {
        self.max_values.get(column)
    }

    /// True when every row of the file is NULL in `column`.
    pub fn all_null(&self, column: &str) -> bool {
        self.nulls(column) == Some(self.num_records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::logical_schema::{LogicalColumn, LogicalDataType};

    #[test]
    fn from_rows_tracks_min_max_and_nulls() -> Result<(), Box<dyn std::error::Error>> {
        let schema = LogicalSchema::new(vec![
            LogicalColumn::new("id", LogicalDataType::Int64, false),
            LogicalColumn::new("name", LogicalDataType::Utf8, true),
        ])?;
        let rows: Vec<Row> = vec![
            [("id", Value::from(3)), ("name", Value::from("c"))]
                .into_iter()
                .collect(),
            [("id", Value::from(1)), ("name", Value::Null)]
                .into_iter()
                .collect(),
            [("id", Value::from(2)), ("name", Value::from("a"))]
                .into_iter()
                .collect(),
        ];

        let stats = FileStats::from_rows(&schema, &rows);
        assert_eq!(stats.num_records, 3);
        assert_eq!(stats.min("id"), Some(&Value::Int(1)));
        assert_eq!(stats.max("id"), Some(&Value::Int(3)));
        assert_eq!(stats.min("name"), Some(&Value::from("a")));
        assert_eq!(stats.nulls("name"), Some(1));
        assert!(!stats.all_null("name"));
        Ok(())
    }

    #[test]
    fn all_null_column_has_no_bounds() -> Result<(), Box<dyn std::error::Error>> {
        let schema = LogicalSchema::new(vec![LogicalColumn::new(
            "salary",
            LogicalDataType::Float64,
            true,
        )])?;
        let rows: Vec<Row> = vec![[("salary", Value::Null)].into_iter().collect()];

        let stats = FileStats::from_rows(&schema, &rows);
        assert!(stats.all_null("salary"));
        assert_eq!(stats.min("salary"), None);
        Ok(())
    }
}
