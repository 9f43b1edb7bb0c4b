use lakehouse_table_core::{
    TableError,
    metadata::LogicalSchemaError,
    storage::StorageError,
};

use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Invalid table location {table}: {source}"))]
    Storage {
        table: String,
        source: StorageError,
    },

    #[snafu(display(
        "Invalid --column '{spec}': {reason}. \
         Expected name:type with an optional trailing '?' for nullable, e.g. salary:int64?"
    ))]
    InvalidColumn { spec: String, reason: String },

    #[snafu(display("Invalid schema: {source}"))]
    InvalidSchema { source: LogicalSchemaError },

    #[snafu(display("Invalid --set '{spec}': expected column=<expression or JSON value>"))]
    InvalidAssignment { spec: String },

    #[snafu(display("Invalid {what}: {source}"))]
    InvalidJson {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Invalid --timestamp '{value}': {source}. Use RFC 3339, e.g. 2025-01-01T00:00:00Z"))]
    InvalidTimestamp {
        value: String,
        source: chrono::ParseError,
    },

    #[snafu(display("Failed to read {path}"))]
    ReadInput {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to render output: {source}"))]
    RenderOutput { source: serde_json::Error },

    #[snafu(display(
        "Failed to open table at {table}: {source}. \
         Ensure the path holds a lakehouse table (a _lakehouse_log directory with commits)."
    ))]
    OpenTable {
        table: String,
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    #[snafu(display("{operation} failed for table {table}: {source}"))]
    Operation {
        operation: &'static str,
        table: String,
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },
}
