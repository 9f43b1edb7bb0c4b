//! Schema compatibility helpers (pure metadata).
//!
//! Appends do not evolve the schema: an INSERT that declares a schema must
//! declare exactly the table's schema. Only INSERT OVERWRITE and
//! CREATE OR REPLACE may install a different one.

use std::collections::HashMap;

use snafu::prelude::*;

use crate::{
    metadata::logical_schema::{LogicalColumn, LogicalDataType, LogicalSchema, LogicalSchemaError},
    value::Row,
};

/// Errors raised when an incoming schema is not compatible with the table.
#[derive(Debug, Snafu)]
pub enum SchemaCompatibilityError {
    /// The incoming schema is missing a column that exists in the table schema.
    #[snafu(display("Incoming schema is missing required column {column}"))]
    MissingColumn {
        /// The name of the missing column.
        column: String,
    },

    /// The incoming schema has an extra column that does not exist in the table schema.
    #[snafu(display("Incoming schema has extra column {column} not present in table schema"))]
    ExtraColumn {
        /// The name of the extra column.
        column: String,
    },

    /// Column exists in both schemas, but the logical type differs.
    #[snafu(display(
        "Type mismatch for column {column}: table has {table_type}, incoming has {incoming_type}"
    ))]
    TypeMismatch {
        /// The name of the column with mismatched type.
        column: String,
        /// The type in the table schema.
        table_type: LogicalDataType,
        /// The type in the incoming schema.
        incoming_type: LogicalDataType,
    },

    /// Column exists in both schemas, but the nullability differs.
    #[snafu(display(
        "Nullability mismatch for column {column}: table nullable={table_nullable}, \
         incoming nullable={incoming_nullable}"
    ))]
    NullabilityMismatch {
        /// The name of the column.
        column: String,
        /// Nullability in the table schema.
        table_nullable: bool,
        /// Nullability in the incoming schema.
        incoming_nullable: bool,
    },

    /// A row does not conform to the table schema.
    #[snafu(display("Row does not conform to the table schema: {source}"))]
    InvalidRow {
        /// Underlying per-row error.
        source: LogicalSchemaError,
    },
}

/// A convenience type alias for results of schema compatibility operations.
pub type SchemaResult<T> = Result<T, SchemaCompatibilityError>;

fn columns_by_name(schema: &LogicalSchema) -> HashMap<&str, &LogicalColumn> {
    schema
        .columns()
        .iter()
        .map(|col| (col.name.as_str(), col))
        .collect()
}

/// Enforce the "no schema evolution on append" rule.
///
/// - Every table column must appear in the incoming schema.
/// - No extra columns may appear in the incoming schema.
/// - For every column, logical type and nullability must match exactly.
///
/// Column order is not significant; rows are keyed by name.
pub fn ensure_schema_exact_match(
    table_schema: &LogicalSchema,
    incoming_schema: &LogicalSchema,
) -> SchemaResult<()> {
    let incoming_cols = columns_by_name(incoming_schema);

    for table_col in table_schema.columns() {
        let incoming = incoming_cols
            .get(table_col.name.as_str())
            .context(MissingColumnSnafu {
                column: table_col.name.clone(),
            })?;

        ensure!(
            incoming.data_type == table_col.data_type,
            TypeMismatchSnafu {
                column: table_col.name.clone(),
                table_type: table_col.data_type,
                incoming_type: incoming.data_type,
            }
        );

        ensure!(
            incoming.nullable == table_col.nullable,
            NullabilityMismatchSnafu {
                column: table_col.name.clone(),
                table_nullable: table_col.nullable,
                incoming_nullable: incoming.nullable,
            }
        );
    }

    if let Some(extra) = incoming_schema
        .columns()
        .iter()
        .find(|c| !table_schema.has_column(&c.name))
    {
        return ExtraColumnSnafu {
            column: extra.name.clone(),
        }
        .fail();
    }

    Ok(())
}

/// Conform every row to `schema` (see [`LogicalSchema::conform_row`]).
pub fn conform_rows(schema: &LogicalSchema, rows: &[Row]) -> SchemaResult<Vec<Row>> {
    rows.iter()
        .map(|row| schema.conform_row(row))
        .collect::<Result<Vec<_>, _>>()
        .context(InvalidRowSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(cols: &[(&str, LogicalDataType, bool)]) -> LogicalSchema {
        LogicalSchema::new(
            cols.iter()
                .map(|(n, t, nullable)| LogicalColumn::new(*n, *t, *nullable))
                .collect(),
        )
        .expect("valid schema")
    }

    #[test]
    fn identical_schemas_match_regardless_of_order() {
        let table = schema(&[
            ("id", LogicalDataType::Int32, false),
            ("name", LogicalDataType::Utf8, true),
        ]);
        let incoming = schema(&[
            ("name", LogicalDataType::Utf8, true),
            ("id", LogicalDataType::Int32, false),
        ]);
        assert!(ensure_schema_exact_match(&table, &incoming).is_ok());
    }

    #[test]
    fn missing_extra_and_type_changes_are_rejected() {
        let table = schema(&[
            ("id", LogicalDataType::Int32, false),
            ("name", LogicalDataType::Utf8, true),
        ]);

        let missing = schema(&[("id", LogicalDataType::Int32, false)]);
        assert!(matches!(
            ensure_schema_exact_match(&table, &missing),
            Err(SchemaCompatibilityError::MissingColumn { column }) if column == "name"
        ));

        let extra = schema(&[
            ("id", LogicalDataType::Int32, false),
            ("name", LogicalDataType::Utf8, true),
            ("age", LogicalDataType::Int32, true),
        ]);
        assert!(matches!(
            ensure_schema_exact_match(&table, &extra),
            Err(SchemaCompatibilityError::ExtraColumn { column }) if column == "age"
        ));

        let retyped = schema(&[
            ("id", LogicalDataType::Int64, false),
            ("name", LogicalDataType::Utf8, true),
        ]);
        assert!(matches!(
            ensure_schema_exact_match(&table, &retyped),
            Err(SchemaCompatibilityError::TypeMismatch { .. })
        ));

        let nullable = schema(&[
            ("id", LogicalDataType::Int32, true),
            ("name", LogicalDataType::Utf8, true),
        ]);
        assert!(matches!(
            ensure_schema_exact_match(&table, &nullable),
            Err(SchemaCompatibilityError::NullabilityMismatch { .. })
        ));
    }
}
