//! Logical schema model recorded in table metadata.
//!
//! Schemas are ordered lists of `(name, data_type, nullable)` columns. The
//! model is deliberately small: it covers the scalar types the JSON-lines
//! executor can represent and nothing more.

use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::value::{Row, Value};

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalDataType {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// UTF-8 string.
    Utf8,
    /// Microseconds since the Unix epoch, UTC.
    Timestamp,
}

impl fmt::Display for LogicalDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogicalDataType::Bool => "Bool",
            LogicalDataType::Int32 => "Int32",
            LogicalDataType::Int64 => "Int64",
            LogicalDataType::Float64 => "Float64",
            LogicalDataType::Utf8 => "Utf8",
            LogicalDataType::Timestamp => "Timestamp",
        };
        f.write_str(s)
    }
}

/// A single logical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalColumn {
    /// Column name as stored in the schema.
    pub name: String,
    /// Logical data type for the column.
    pub data_type: LogicalDataType,
    /// Whether the column allows null values.
    #[serde(default)]
    pub nullable: bool,
}

impl LogicalColumn {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, data_type: LogicalDataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

impl fmt::Display for LogicalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{}?: {}", self.name, self.data_type)
        } else {
            write!(f, "{}: {}", self.name, self.data_type)
        }
    }
}

/// Ordered list of logical columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalSchema {
    columns: Vec<LogicalColumn>,
}

/// Errors raised while building a schema or conforming rows to it.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LogicalSchemaError {
    /// Two columns share a name.
    #[snafu(display("Duplicate column name in logical schema: {column}"))]
    DuplicateColumn {
        /// The repeated column name.
        column: String,
    },

    /// A column has an empty or whitespace-only name.
    #[snafu(display("Column names must be non-empty"))]
    EmptyColumnName,

    /// A schema must have at least one column.
    #[snafu(display("Logical schema must have at least one column"))]
    NoColumns,

    /// A row carries a column the schema does not define.
    #[snafu(display("Row has column {column} not present in the schema"))]
    UnknownRowColumn {
        /// Offending column.
        column: String,
    },

    /// A non-nullable column received NULL.
    #[snafu(display("Column {column} is not nullable"))]
    NullInNonNullable {
        /// Offending column.
        column: String,
    },

    /// A value does not fit the column type.
    #[snafu(display("Column {column} expects {expected}, got {actual} value {value}"))]
    ValueTypeMismatch {
        /// Offending column.
        column: String,
        /// Declared type.
        expected: LogicalDataType,
        /// Observed value kind.
        actual: &'static str,
        /// Observed value.
        value: Value,
    },

    /// NaN and infinities have no JSON encoding.
    #[snafu(display("Column {column} got non-finite float {value}"))]
    NonFiniteFloat {
        /// Offending column.
        column: String,
        /// Observed value.
        value: f64,
    },
}

impl LogicalSchema {
    /// Construct a validated logical schema (rejects duplicate or empty
    /// column names).
    pub fn new(columns: Vec<LogicalColumn>) -> Result<Self, LogicalSchemaError> {
        ensure!(!columns.is_empty(), NoColumnsSnafu);

        let mut seen = HashSet::new();
        for col in &columns {
            ensure!(!col.name.trim().is_empty(), EmptyColumnNameSnafu);
            if !seen.insert(col.name.as_str()) {
                return DuplicateColumnSnafu {
                    column: col.name.clone(),
                }
                .fail();
            }
        }

        Ok(Self { columns })
    }

    /// Borrow the logical columns.
    pub fn columns(&self) -> &[LogicalColumn] {
        &self.columns
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&LogicalColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// True when `name` is a column of this schema.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Column names in schema order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Validate `row` against the schema and return its canonical form.
    ///
    /// Missing columns become NULL, integer literals are widened into
    /// `Float64` columns, and every other mismatch is rejected.
    pub fn conform_row(&self, row: &Row) -> Result<Row, LogicalSchemaError> {
        if let Some(extra) = row.columns().find(|c| !self.has_column(c)) {
            return UnknownRowColumnSnafu { column: extra }.fail();
        }

        let mut out = Row::new();
        for col in &self.columns {
            let value = conform_value(col, row.get(&col.name))?;
            out.set(col.name.clone(), value);
        }
        Ok(out)
    }
}

impl fmt::Display for LogicalSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{col}")?;
        }
        write!(f, "}}")
    }
}

fn conform_value(col: &LogicalColumn, value: &Value) -> Result<Value, LogicalSchemaError> {
    let mismatch = || LogicalSchemaError::ValueTypeMismatch {
        column: col.name.clone(),
        expected: col.data_type,
        actual: value.type_name(),
        value: value.clone(),
    };

    match (col.data_type, value) {
        (_, Value::Null) => {
            ensure!(
                col.nullable,
                NullInNonNullableSnafu {
                    column: col.name.clone()
                }
            );
            Ok(Value::Null)
        }
        (LogicalDataType::Float64, Value::Float(x)) => {
            ensure!(
                x.is_finite(),
                NonFiniteFloatSnafu {
                    column: col.name.clone(),
                    value: *x,
                }
            );
            Ok(value.clone())
        }
        (LogicalDataType::Bool, Value::Bool(_))
        | (LogicalDataType::Int64, Value::Int(_))
        | (LogicalDataType::Timestamp, Value::Int(_))
        | (LogicalDataType::Utf8, Value::Utf8(_)) => Ok(value.clone()),
        (LogicalDataType::Int32, Value::Int(i)) => {
            if i32::try_from(*i).is_ok() {
                Ok(value.clone())
            } else {
                Err(mismatch())
            }
        }
        (LogicalDataType::Float64, Value::Int(i)) => Ok(Value::Float(*i as f64)),
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people_schema() -> LogicalSchema {
        LogicalSchema::new(vec![
            LogicalColumn::new("id", LogicalDataType::Int32, false),
            LogicalColumn::new("firstName", LogicalDataType::Utf8, true),
            LogicalColumn::new("salary", LogicalDataType::Float64, true),
        ])
        .expect("valid schema")
    }

    #[test]
    fn new_rejects_duplicates_and_empty_names() {
        let dup = LogicalSchema::new(vec![
            LogicalColumn::new("a", LogicalDataType::Int64, false),
            LogicalColumn::new("a", LogicalDataType::Utf8, false),
        ]);
        assert!(matches!(
            dup,
            Err(LogicalSchemaError::DuplicateColumn { column }) if column == "a"
        ));

        let empty = LogicalSchema::new(vec![LogicalColumn::new(" ", LogicalDataType::Bool, true)]);
        assert!(matches!(empty, Err(LogicalSchemaError::EmptyColumnName)));

        assert!(matches!(
            LogicalSchema::new(vec![]),
            Err(LogicalSchemaError::NoColumns)
        ));
    }

    #[test]
    fn conform_row_fills_nulls_and_widens_ints() -> Result<(), LogicalSchemaError> {
        let schema = people_schema();
        let row: Row = [("id", Value::from(1)), ("salary", Value::from(100))]
            .into_iter()
            .collect();

        let out = schema.conform_row(&row)?;
        assert_eq!(out.get("salary"), &Value::Float(100.0));
        assert!(out.contains("firstName"));
        assert!(out.get("firstName").is_null());
        Ok(())
    }

    #[test]
    fn conform_row_rejects_bad_values() {
        let schema = people_schema();

        let null_id: Row = [("id", Value::Null)].into_iter().collect();
        assert!(matches!(
            schema.conform_row(&null_id),
            Err(LogicalSchemaError::NullInNonNullable { .. })
        ));

        let big: Row = [("id", Value::Int(i64::from(i32::MAX) + 1))]
            .into_iter()
            .collect();
        assert!(matches!(
            schema.conform_row(&big),
            Err(LogicalSchemaError::ValueTypeMismatch { .. })
        ));

        let extra: Row = [("id", Value::from(1)), ("bogus", Value::from(true))]
            .into_iter()
            .collect();
        assert!(matches!(
            schema.conform_row(&extra),
            Err(LogicalSchemaError::UnknownRowColumn { column }) if column == "bogus"
        ));
    }

    #[test]
    fn conform_row_rejects_non_finite_floats() {
        let schema = people_schema();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let row: Row = [("id", Value::from(1)), ("salary", Value::Float(bad))]
                .into_iter()
                .collect();
            assert!(matches!(
                schema.conform_row(&row),
                Err(LogicalSchemaError::NonFiniteFloat { ref column, .. }) if column == "salary"
            ));
        }
    }

    #[test]
    fn display_marks_nullable_columns() {
        assert_eq!(
            people_schema().to_string(),
            "{id: Int32, firstName?: Utf8, salary?: Float64}"
        );
    }
}
