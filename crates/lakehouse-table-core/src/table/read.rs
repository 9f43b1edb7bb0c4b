//! Read-side operations: time travel, scans, history and detail.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::prelude::*;

use crate::{
    expr::{EvalContext, Expr, pruning::may_match},
    metadata::{LogicalSchema, TableProperties},
    table::{
        Table,
        error::{ExpressionSnafu, TableError, TransactionLogSnafu},
    },
    transaction_log::{Operation, OperationMetrics, TableState, VersionSpec},
    value::Row,
};

/// One line of DESCRIBE HISTORY.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Commit version.
    pub version: u64,
    /// Commit timestamp.
    pub timestamp: DateTime<Utc>,
    /// Operation tag and parameters.
    pub operation: Operation,
    /// Version the writer planned against.
    pub read_version: u64,
    /// Counters recorded with the commit.
    pub metrics: OperationMetrics,
}

/// DESCRIBE DETAIL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDetail {
    /// Table root.
    pub location: String,
    /// Head version.
    pub version: u64,
    /// Oldest version time travel can reach.
    pub min_readable_version: Option<u64>,
    /// When the table was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the head commit.
    pub last_modified: DateTime<Utc>,
    /// Live file count.
    pub num_files: usize,
    /// Bytes referenced by live files.
    pub size_in_bytes: u64,
    /// Rows in live files.
    pub num_records: u64,
    /// Current schema.
    pub schema: LogicalSchema,
    /// Current properties.
    pub properties: TableProperties,
    /// Description, if any.
    pub description: Option<String>,
    /// On-disk format version.
    pub format_version: u32,
}

impl Table {
    /// Snapshot for `spec` (VERSION AS OF / TIMESTAMP AS OF).
    pub async fn snapshot_at(&self, spec: VersionSpec) -> Result<Arc<TableState>, TableError> {
        match spec {
            VersionSpec::Latest => self.latest().await,
            spec => Ok(self.snapshots.snapshot(spec).await?),
        }
    }

    /// Every row of the snapshot for `spec`.
    pub async fn scan(&self, spec: VersionSpec) -> Result<Vec<Row>, TableError> {
        self.scan_where(spec, None).await
    }

    /// Rows of the snapshot for `spec` for which `predicate` is TRUE. Files
    /// whose statistics rule the predicate out are not opened.
    pub async fn scan_where(
        &self,
        spec: VersionSpec,
        predicate: Option<&Expr>,
    ) -> Result<Vec<Row>, TableError> {
        let snapshot = self.snapshot_at(spec).await?;
        let mut out = Vec::new();
        for file in snapshot.live_files() {
            if predicate.is_some_and(|p| !may_match(p, &file.stats)) {
                continue;
            }
            let rows = self
                .io
                .read_rows(&self.location, file)
                .await
                .map_err(|e| TableError::from_data_file(e, snapshot.version))?;
            for row in rows {
                let keep = match predicate {
                    None => true,
                    Some(p) => p
                        .eval_predicate(&EvalContext::target(&row))
                        .context(ExpressionSnafu)?,
                };
                if keep {
                    out.push(row);
                }
            }
        }
        Ok(out)
    }

    /// DESCRIBE HISTORY: commits newest first, at most `limit` of them.
    ///
    /// Versions whose commit files were pruned are not listed.
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>, TableError> {
        let listing = self.log().list_log().await.context(TransactionLogSnafu)?;
        let limit = limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for &version in listing.commits.iter().rev().take(limit) {
            let commit = self
                .log()
                .load_commit(version)
                .await
                .context(TransactionLogSnafu)?;
            out.push(HistoryEntry {
                version: commit.version,
                timestamp: commit.timestamp,
                operation: commit.operation,
                read_version: commit.base_version,
                metrics: commit.metrics,
            });
        }
        Ok(out)
    }

    /// DESCRIBE DETAIL for the head.
    pub async fn detail(&self) -> Result<TableDetail, TableError> {
        let state = self.latest().await?;
        let floor = self
            .log()
            .retention_floor()
            .await
            .context(TransactionLogSnafu)?;
        let meta = &state.table_meta;
        Ok(TableDetail {
            location: self.location.to_string(),
            version: state.version,
            min_readable_version: floor,
            created_at: meta.created_at(),
            last_modified: state.timestamp,
            num_files: state.num_files(),
            size_in_bytes: state.total_bytes(),
            num_records: state.num_records(),
            schema: meta.schema().clone(),
            properties: meta.properties().clone(),
            description: meta.description().map(str::to_string),
            format_version: meta.format_version(),
        })
    }
}
