//! Table layer.
//!
//! [`Table`] is the user-facing API surface. It is a cheap, clonable handle
//! over a location: it holds no table state of its own. Every operation
//! reads a fresh snapshot from the log, plans against it, and commits
//! through the optimistic loop in `commit`, returning an explicit
//! [`CommitOutcome`].
//!
//! The handle's methods are spread over the modules that implement them:
//! writes in [`crate::mutation`], OPTIMIZE in [`crate::optimize`], VACUUM
//! and RESTORE in [`crate::retention`], reads and history in `read`,
//! clones in `clone`.
mod clone;
pub(crate) mod commit;
pub mod error;
mod options;
mod read;

use std::sync::Arc;

use log::info;
use snafu::prelude::*;

use crate::{
    clock::{Clock, SystemClock},
    exec::{DataFileIo, JsonLinesFileIo, write_rows_split},
    expr::Expr,
    metadata::{LogicalSchema, TableMeta, conform_rows},
    mutation::{Assignment, MergeSpec, RowBatch},
    storage::TableLocation,
    table::{
        commit::Intent,
        error::{
            AlreadyExistsSnafu, DataFileSnafu, EmptyTableSnafu, SchemaMismatchSnafu,
            TransactionLogSnafu,
        },
    },
    transaction_log::{
        CommitError, LogAction, Operation, OperationKind, OperationMetrics, PendingCommit,
        SnapshotBuilder, TableState, TransactionLogStore,
    },
    value::Row,
};

pub use error::TableError;
pub use options::{CommitOutcome, CreateOptions, DEFAULT_MAX_COMMIT_RETRIES, TableOptions};
pub use read::{HistoryEntry, TableDetail};

/// Handle to a table at one location.
#[derive(Debug, Clone)]
pub struct Table {
    location: TableLocation,
    snapshots: SnapshotBuilder,
    io: Arc<dyn DataFileIo>,
    options: TableOptions,
}

impl Table {
    /// A handle on `location` with the system clock, the JSON-lines
    /// executor and default options. Nothing is read until an operation
    /// runs.
    pub fn new(location: TableLocation) -> Self {
        Self::with_parts(location, Arc::new(SystemClock), Arc::new(JsonLinesFileIo))
    }

    fn with_parts(
        location: TableLocation,
        clock: Arc<dyn Clock>,
        io: Arc<dyn DataFileIo>,
    ) -> Self {
        let log = TransactionLogStore::with_clock(location.clone(), clock);
        Self {
            location,
            snapshots: SnapshotBuilder::new(log),
            io,
            options: TableOptions::default(),
        }
    }

    /// Same handle with a different clock (commit timestamps, VACUUM
    /// thresholds).
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        let options = self.options;
        Self {
            options,
            ..Self::with_parts(self.location, clock, self.io)
        }
    }

    /// Same handle with a different data file executor.
    pub fn with_io(mut self, io: Arc<dyn DataFileIo>) -> Self {
        self.io = io;
        self
    }

    /// Same handle with different options.
    pub fn with_options(mut self, options: TableOptions) -> Self {
        self.options = options;
        self
    }

    /// Open an existing table with default settings.
    pub async fn open(location: TableLocation) -> Result<Self, TableError> {
        let table = Self::new(location);
        table.latest().await?;
        Ok(table)
    }

    /// Table root.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    /// Handle options.
    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    /// The commit log.
    pub fn log(&self) -> &TransactionLogStore {
        self.snapshots.log()
    }

    /// The snapshot cache.
    pub fn snapshots(&self) -> &SnapshotBuilder {
        &self.snapshots
    }

    /// The data file executor.
    pub fn io(&self) -> &Arc<dyn DataFileIo> {
        &self.io
    }

    /// Latest committed version (0 when no table exists yet).
    pub async fn version(&self) -> Result<u64, TableError> {
        self.log()
            .load_current_version()
            .await
            .context(TransactionLogSnafu)
    }

    /// Snapshot at the head, failing with `EmptyTable` before CREATE.
    pub(crate) async fn latest(&self) -> Result<Arc<TableState>, TableError> {
        let head = self.version().await?;
        ensure!(
            head > 0,
            EmptyTableSnafu {
                location: self.location.to_string(),
            }
        );
        Ok(self.snapshots.snapshot_at_version(head).await?)
    }

    /// CREATE TABLE: commit version 1 with `schema` and no data.
    pub async fn create(
        &self,
        schema: LogicalSchema,
        options: CreateOptions,
    ) -> Result<CommitOutcome, TableError> {
        self.create_with_rows(schema, &options, &RowBatch::default())
            .await
    }

    /// CREATE OR REPLACE TABLE.
    ///
    /// Creates the table when the location is empty. Otherwise replaces
    /// schema and properties and removes every current file in one
    /// `REPLACE TABLE` commit; earlier versions stay readable.
    pub async fn create_or_replace(
        &self,
        schema: LogicalSchema,
        options: CreateOptions,
        batch: impl Into<RowBatch>,
    ) -> Result<CommitOutcome, TableError> {
        let batch = batch.into();
        if self.version().await? == 0 {
            match self.create_with_rows(schema.clone(), &options, &batch).await {
                Ok(outcome) => return Ok(outcome),
                // Lost the race to create; replace what the winner made.
                Err(TableError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.execute(Intent::Replace {
            schema: &schema,
            options: &options,
            batch: &batch,
        })
        .await
    }

    async fn create_with_rows(
        &self,
        schema: LogicalSchema,
        options: &CreateOptions,
        batch: &RowBatch,
    ) -> Result<CommitOutcome, TableError> {
        let current_version = self.version().await?;
        ensure!(
            current_version == 0,
            AlreadyExistsSnafu {
                location: self.location.to_string(),
                current_version,
            }
        );

        let mut meta = TableMeta::new(schema, self.log().clock().now())
            .with_properties(options.properties.clone());
        if let Some(description) = &options.description {
            meta = meta.with_description(description.clone());
        }

        let rows = conform_rows(meta.schema(), &batch.rows).context(SchemaMismatchSnafu)?;
        let adds = write_rows_split(
            self.io.as_ref(),
            &self.location,
            meta.schema(),
            &rows,
            meta.properties().target_file_size,
        )
        .await
        .context(DataFileSnafu)?;

        let metrics = OperationMetrics {
            num_added_files: adds.len() as u64,
            num_added_bytes: adds.iter().map(|a| a.size_bytes).sum(),
            num_inserted_rows: rows.len() as u64,
            ..OperationMetrics::default()
        };
        let mut actions = vec![LogAction::UpdateTableMeta(meta.clone())];
        actions.extend(adds.into_iter().map(LogAction::Add));
        let pending = PendingCommit::new(
            Operation::new(OperationKind::CreateTable).with_param("schema", meta.schema()),
            actions,
            0,
        )
        .with_metrics(metrics);

        match self.log().commit_with_expected_version(0, pending).await {
            Ok(commit) => {
                info!("created table at {} (version {})", self.location, commit.version);
                Ok(CommitOutcome {
                    version: commit.version,
                    committed: true,
                    attempts: 1,
                    metrics: commit.metrics,
                })
            }
            Err(CommitError::Conflict { found, .. }) => AlreadyExistsSnafu {
                location: self.location.to_string(),
                current_version: found,
            }
            .fail(),
            Err(source) => Err(TableError::TransactionLog { source }),
        }
    }

    /// INSERT: append rows. An INSERT never conflicts with other appends.
    pub async fn insert(&self, batch: impl Into<RowBatch>) -> Result<CommitOutcome, TableError> {
        let batch = batch.into();
        self.execute(Intent::Insert(&batch)).await
    }

    /// INSERT OVERWRITE: replace all rows, optionally installing the
    /// batch's declared schema.
    pub async fn insert_overwrite(
        &self,
        batch: impl Into<RowBatch>,
    ) -> Result<CommitOutcome, TableError> {
        let batch = batch.into();
        self.execute(Intent::Overwrite(&batch)).await
    }

    /// UPDATE ... SET ... [WHERE predicate].
    pub async fn update(
        &self,
        predicate: Option<&Expr>,
        assignments: &[Assignment],
    ) -> Result<CommitOutcome, TableError> {
        self.execute(Intent::Update {
            predicate,
            assignments,
        })
        .await
    }

    /// DELETE [WHERE predicate].
    pub async fn delete(&self, predicate: Option<&Expr>) -> Result<CommitOutcome, TableError> {
        self.execute(Intent::Delete { predicate }).await
    }

    /// MERGE `source` into the table.
    pub async fn merge(
        &self,
        source: &[Row],
        spec: &MergeSpec,
    ) -> Result<CommitOutcome, TableError> {
        self.execute(Intent::Merge { source, spec }).await
    }
}
