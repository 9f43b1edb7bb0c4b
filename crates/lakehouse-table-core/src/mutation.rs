//! Planning data-changing operations.
//!
//! Every write is planned against one snapshot and produces a
//! [`MutationPlan`]: the files it removes, the new files it already wrote,
//! an optional metadata replacement, and the [`TxnFootprint`] the conflict
//! detector checks if another writer commits first. Planning never touches
//! the log; a plan that is abandoned leaves only unreferenced data files
//! behind, which VACUUM reclaims.
//!
//! Only files that could logically change are rewritten: candidates are
//! pruned with file statistics, and a candidate in which no row actually
//! changes is left untouched.
pub(crate) mod insert;
pub mod merge;
pub(crate) mod rewrite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    exec::{DataFileIo, write_rows_split},
    expr::Expr,
    metadata::{LogicalSchema, SchemaCompatibilityError, TableMeta},
    storage::TableLocation,
    table::error::{DataFileSnafu, SchemaMismatchSnafu, TableError, UnknownColumnSnafu},
    transaction_log::{
        AddFile, LogAction, Operation, OperationMetrics, PendingCommit, RemoveFile, TableState,
        TxnFootprint,
    },
    value::Row,
};

pub use merge::{MatchedAction, MatchedClause, MergeSpec, NotMatchedAction, NotMatchedClause};

/// `column = value` in UPDATE SET and MERGE clauses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Target column.
    pub column: String,
    /// New value, evaluated against the row before any assignment applies.
    pub value: Expr,
}

impl Assignment {
    /// `column = value`
    pub fn new(column: impl Into<String>, value: Expr) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// Rows handed to INSERT, INSERT OVERWRITE or CREATE OR REPLACE.
///
/// When `schema` is set, INSERT requires it to equal the table schema and
/// INSERT OVERWRITE installs it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    /// Declared schema of the rows, if any.
    pub schema: Option<LogicalSchema>,
    /// The rows.
    pub rows: Vec<Row>,
}

impl RowBatch {
    /// Rows with a declared schema.
    pub fn with_schema(schema: LogicalSchema, rows: Vec<Row>) -> Self {
        Self {
            schema: Some(schema),
            rows,
        }
    }
}

impl From<Vec<Row>> for RowBatch {
    fn from(rows: Vec<Row>) -> Self {
        Self { schema: None, rows }
    }
}

/// What a planner needs to know about the table it plans against.
#[derive(Clone, Copy)]
pub(crate) struct PlanContext<'a> {
    pub location: &'a TableLocation,
    pub io: &'a dyn DataFileIo,
    pub snapshot: &'a TableState,
    pub now: DateTime<Utc>,
}

impl PlanContext<'_> {
    pub(crate) fn schema(&self) -> &LogicalSchema {
        self.snapshot.table_meta.schema()
    }

    pub(crate) fn target_file_size(&self) -> u64 {
        self.snapshot.table_meta.properties().target_file_size
    }

    pub(crate) async fn read_rows(&self, file: &AddFile) -> Result<Vec<Row>, TableError> {
        self.io
            .read_rows(self.location, file)
            .await
            .map_err(|e| TableError::from_data_file(e, self.snapshot.version))
    }

    /// Write `rows` (already conformed to `schema`) as size-targeted files.
    pub(crate) async fn write_rows(
        &self,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<Vec<AddFile>, TableError> {
        write_rows_split(self.io, self.location, schema, rows, self.target_file_size())
            .await
            .context(DataFileSnafu)
    }

    /// Conform one rewritten row to the table schema.
    pub(crate) fn conform(&self, row: &Row) -> Result<Row, TableError> {
        self.schema()
            .conform_row(row)
            .map_err(|source| SchemaCompatibilityError::InvalidRow { source })
            .context(SchemaMismatchSnafu)
    }

    /// Fail unless every column in `columns` belongs to the table schema.
    pub(crate) fn check_columns<'c>(
        &self,
        columns: impl IntoIterator<Item = &'c str>,
        context: &'static str,
    ) -> Result<(), TableError> {
        for column in columns {
            ensure!(
                self.schema().has_column(column),
                UnknownColumnSnafu { column, context }
            );
        }
        Ok(())
    }
}

/// The planned effect of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPlan {
    /// Operation tag and parameters.
    pub operation: Operation,
    /// What the conflict detector checks.
    pub footprint: TxnFootprint,
    /// Files leaving the table.
    pub removes: Vec<RemoveFile>,
    /// Files joining the table (already written).
    pub adds: Vec<AddFile>,
    /// Replacement metadata, if the operation changes it.
    pub new_meta: Option<TableMeta>,
    /// Row counters; file counters are filled in when committing.
    pub metrics: OperationMetrics,
    /// Commit even when there are no actions (RESTORE always records
    /// itself).
    pub commit_if_empty: bool,
}

impl MutationPlan {
    /// An empty plan read at `read_version`.
    pub fn new(operation: Operation, read_version: u64) -> Self {
        Self {
            operation,
            footprint: TxnFootprint {
                read_version,
                reads_metadata: true,
                ..TxnFootprint::default()
            },
            removes: Vec::new(),
            adds: Vec::new(),
            new_meta: None,
            metrics: OperationMetrics::default(),
            commit_if_empty: false,
        }
    }

    /// Version the plan was made against.
    pub fn read_version(&self) -> u64 {
        self.footprint.read_version
    }

    /// True when committing would change nothing.
    pub fn is_noop(&self) -> bool {
        !self.commit_if_empty
            && self.removes.is_empty()
            && self.adds.is_empty()
            && self.new_meta.is_none()
    }

    /// Record that `file` was read while planning.
    pub(crate) fn note_read(&mut self, file: &AddFile) {
        self.footprint.read_files.insert(file.path.clone());
    }

    /// Remove `file` from the table.
    pub(crate) fn remove(&mut self, file: &AddFile, now: DateTime<Utc>, data_change: bool) {
        self.footprint.read_files.insert(file.path.clone());
        self.footprint.write_removes.insert(file.path.clone());
        self.removes.push(file.to_remove(now, data_change));
    }

    /// Actions in commit order: metadata, removes, adds.
    pub fn actions(&self) -> Vec<LogAction> {
        let mut actions = Vec::with_capacity(self.removes.len() + self.adds.len() + 1);
        if let Some(meta) = &self.new_meta {
            actions.push(LogAction::UpdateTableMeta(meta.clone()));
        }
        actions.extend(self.removes.iter().cloned().map(LogAction::Remove));
        actions.extend(self.adds.iter().cloned().map(LogAction::Add));
        actions
    }

    /// The commit payload for this plan.
    pub fn to_pending(&self) -> PendingCommit {
        let mut metrics = self.metrics.clone();
        metrics.num_added_files = self.adds.len() as u64;
        metrics.num_removed_files = self.removes.len() as u64;
        metrics.num_added_bytes = self.adds.iter().map(|a| a.size_bytes).sum();
        metrics.num_removed_bytes = self.removes.iter().filter_map(|r| r.size_bytes).sum();

        PendingCommit::new(self.operation.clone(), self.actions(), self.read_version())
            .with_metrics(metrics)
    }
}
