//! Error types and SNAFU context selectors for `table`.
//!
//! This module centralizes the `TableError` enum used by the public API and
//! exposes context selectors (via `#[snafu(visibility(pub(crate)))]`) so the
//! planners in sibling modules can attach error context without re-exporting
//! everything at the crate root. Keep new variants here to ensure consistent
//! user-facing messages.

use snafu::prelude::*;

use crate::{
    exec::DataFileError,
    expr::ExprError,
    metadata::{LogicalSchemaError, SchemaCompatibilityError},
    storage::StorageError,
    transaction_log::{CommitError, VersionSpec, snapshot::SnapshotError},
};

/// Errors from table operations.
///
/// Each variant carries enough context for callers to surface actionable
/// messages to users or decide whether to retry at a higher level (for
/// example, `WriteConflict` names the conflicting version and files).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// A snapshot or restore target is out of range or below the log
    /// retention floor.
    #[snafu(display(
        "Version not found: {requested} (table head is {head}, oldest readable version is {})",
        floor.map_or_else(|| "none".to_string(), |f| f.to_string())
    ))]
    VersionNotFound {
        /// What was asked for.
        requested: VersionSpec,
        /// Oldest reconstructible version.
        floor: Option<u64>,
        /// Head at the time of the request.
        head: u64,
    },

    /// Concurrent writers kept invalidating this transaction until the retry
    /// budget ran out.
    #[snafu(display(
        "Write conflict after {attempts} attempts: version {version} touched {files:?}{}",
        if *metadata_changed { " and replaced the table metadata" } else { "" }
    ))]
    WriteConflict {
        /// Version whose commit conflicted on the last attempt.
        version: u64,
        /// Files that commit touched inside this transaction's footprint.
        files: Vec<String>,
        /// The conflicting commit replaced the schema.
        metadata_changed: bool,
        /// Planning attempts made.
        attempts: u32,
    },

    /// Incoming data does not match the table schema.
    #[snafu(display("Schema mismatch: {source}"))]
    SchemaMismatch {
        /// Underlying schema compatibility error.
        source: SchemaCompatibilityError,
    },

    /// More than one source row matched the same target row under a clause
    /// that changes it.
    #[snafu(display(
        "MERGE matched target row {target_row} in {path} with {matches} source rows; \
         the source must contain at most one match per target row"
    ))]
    AmbiguousMergeMatch {
        /// File holding the target row.
        path: String,
        /// Rendered target row.
        target_row: String,
        /// Number of matching source rows.
        matches: usize,
    },

    /// VACUUM retention below the safety floor without an override.
    #[snafu(display(
        "Refusing to VACUUM with retention of {retention_hours}h: below the safety floor of \
         {minimum_hours}h. Snapshots inside the gap could lose files. Pass an explicit override \
         or disable the retention duration check to proceed."
    ))]
    UnsafeVacuum {
        /// Requested retention.
        retention_hours: u64,
        /// Configured safety floor.
        minimum_hours: u64,
    },

    /// A file the operation needs was already physically deleted (by VACUUM).
    ///
    /// Reads and RESTORE fail with this. VACUUM itself does not: a
    /// candidate that is already gone is listed in
    /// [`VacuumReport::vanished`](crate::retention::VacuumReport::vanished).
    #[snafu(display("File {path} referenced by version {version} has been removed from storage"))]
    StaleFileReference {
        /// Path as recorded in the log.
        path: String,
        /// Version that references it.
        version: u64,
    },

    /// Any error coming from the transaction log / commit machinery
    /// (for example, storage failures or corrupt commits).
    #[snafu(display("Transaction log error: {source}"))]
    TransactionLog {
        /// Underlying transaction log / commit error.
        #[snafu(source, backtrace)]
        source: CommitError,
    },

    /// Storage error while accessing table files outside the log.
    #[snafu(display("Storage error while accessing table data: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// Reading or writing a data file failed.
    #[snafu(display("Data file error: {source}"))]
    DataFile {
        /// Underlying executor error.
        source: DataFileError,
    },

    /// Evaluating a predicate or assignment failed.
    #[snafu(display("Expression error: {source}"))]
    Expression {
        /// Underlying evaluation error.
        source: ExprError,
    },

    /// The schema given to CREATE is invalid.
    #[snafu(display("Invalid schema: {source}"))]
    InvalidSchema {
        /// Underlying schema error.
        source: LogicalSchemaError,
    },

    /// Attempting to open a location that holds no table.
    #[snafu(display("No table at {location}: the transaction log has no commits"))]
    EmptyTable {
        /// Table location.
        location: String,
    },

    /// Attempt to create a table where commits already exist.
    #[snafu(display("Table already exists at {location}; current version is {current_version}"))]
    AlreadyExists {
        /// Table location.
        location: String,
        /// Current head.
        current_version: u64,
    },

    /// An expression, assignment or option names a column the schema lacks.
    #[snafu(display("Unknown column {column} in {context}"))]
    UnknownColumn {
        /// Column name.
        column: String,
        /// Where it was referenced.
        context: &'static str,
    },

    /// MERGE specification is unusable.
    #[snafu(display("Invalid MERGE: {reason}"))]
    InvalidMerge {
        /// What is wrong.
        reason: String,
    },

    /// OPTIMIZE options are unusable.
    #[snafu(display("Invalid OPTIMIZE: {reason}"))]
    InvalidOptimize {
        /// What is wrong.
        reason: String,
    },
}

impl TableError {
    /// Map a data-file error, turning a missing file into
    /// [`TableError::StaleFileReference`] at `version`.
    pub(crate) fn from_data_file(source: DataFileError, version: u64) -> Self {
        match source {
            DataFileError::Missing { path, .. } => TableError::StaleFileReference { path, version },
            source => TableError::DataFile { source },
        }
    }
}

impl From<SnapshotError> for TableError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::VersionNotFound {
                requested,
                floor,
                head,
            } => TableError::VersionNotFound {
                requested,
                floor,
                head,
            },
            SnapshotError::Log { source } => TableError::TransactionLog { source },
        }
    }
}
