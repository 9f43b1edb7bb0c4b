//! Log actions and commit payload definitions.
//!
//! Each commit file stores a [`Commit`] containing ordered [`LogAction`] values
//! that mutate table state: adding/removing data files or replacing table
//! metadata. Alongside the actions a commit records *what* produced it (an
//! [`Operation`]) and how much it changed ([`OperationMetrics`]), which is
//! what `history()` reports.
use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::{FileStats, TableMeta};

/// A data file becoming part of the table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AddFile {
    /// Path relative to the table root, or absolute for files owned by
    /// another table (shallow clones).
    pub path: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// When the file was written.
    pub modification_time: DateTime<Utc>,
    /// Column statistics used for pruning.
    pub stats: FileStats,
    /// False for pure re-layouts (OPTIMIZE) that do not change table content.
    pub data_change: bool,
}

impl AddFile {
    /// Row count recorded in the stats.
    pub fn num_records(&self) -> u64 {
        self.stats.num_records
    }

    /// The matching tombstone for this file.
    pub fn to_remove(&self, deletion_timestamp: DateTime<Utc>, data_change: bool) -> RemoveFile {
        RemoveFile {
            path: self.path.clone(),
            deletion_timestamp,
            size_bytes: Some(self.size_bytes),
            data_change,
        }
    }
}

/// A data file leaving the table. The file stays on disk until VACUUM.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoveFile {
    /// Path exactly as it appeared in the matching `Add`.
    pub path: String,
    /// When the removal was planned.
    pub deletion_timestamp: DateTime<Utc>,
    /// Size of the removed file, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// False for pure re-layouts (OPTIMIZE).
    pub data_change: bool,
}

/// An action recorded in a commit.
///
/// Each commit contains a sequence of actions that are applied in order to
/// evolve table state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum LogAction {
    /// Add or replace a data file, keyed by path.
    Add(AddFile),

    /// Remove a data file by path. Removing an absent path is a no-op.
    Remove(RemoveFile),

    /// Replace table-level metadata (full replacement).
    UpdateTableMeta(TableMeta),
}

impl LogAction {
    /// Path touched by a file action.
    pub fn file_path(&self) -> Option<&str> {
        match self {
            LogAction::Add(a) => Some(&a.path),
            LogAction::Remove(r) => Some(&r.path),
            LogAction::UpdateTableMeta(_) => None,
        }
    }
}

/// What produced a commit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Table creation.
    #[serde(rename = "CREATE TABLE")]
    CreateTable,
    /// CREATE OR REPLACE on an existing table.
    #[serde(rename = "REPLACE TABLE")]
    ReplaceTable,
    /// First commit of a shallow or deep clone.
    #[serde(rename = "CLONE")]
    Clone,
    /// Append.
    #[serde(rename = "INSERT")]
    Insert,
    /// Replace all rows.
    #[serde(rename = "INSERT OVERWRITE")]
    InsertOverwrite,
    /// Predicate update.
    #[serde(rename = "UPDATE")]
    Update,
    /// Predicate delete.
    #[serde(rename = "DELETE")]
    Delete,
    /// Upsert from a source relation.
    #[serde(rename = "MERGE")]
    Merge,
    /// Compaction / clustering.
    #[serde(rename = "OPTIMIZE")]
    Optimize,
    /// Roll the live file set back to an earlier version.
    #[serde(rename = "RESTORE")]
    Restore,
    /// VACUUM began deleting files.
    #[serde(rename = "VACUUM START")]
    VacuumStart,
    /// VACUUM finished.
    #[serde(rename = "VACUUM END")]
    VacuumEnd,
}

impl OperationKind {
    /// Display name, as stored in the log.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateTable => "CREATE TABLE",
            OperationKind::ReplaceTable => "REPLACE TABLE",
            OperationKind::Clone => "CLONE",
            OperationKind::Insert => "INSERT",
            OperationKind::InsertOverwrite => "INSERT OVERWRITE",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::Merge => "MERGE",
            OperationKind::Optimize => "OPTIMIZE",
            OperationKind::Restore => "RESTORE",
            OperationKind::VacuumStart => "VACUUM START",
            OperationKind::VacuumEnd => "VACUUM END",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation tag plus its user-visible parameters (predicate, retention,
/// restored version and so on), rendered as strings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    /// Operation tag.
    pub kind: OperationKind,
    /// Parameters, for history display only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl Operation {
    /// An operation without parameters.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            parameters: BTreeMap::new(),
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.parameters.insert(key.into(), value.to_string());
        self
    }
}

/// Counters describing a commit's effect.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperationMetrics {
    /// Number of `Add` actions.
    pub num_added_files: u64,
    /// Number of `Remove` actions.
    pub num_removed_files: u64,
    /// Bytes referenced by `Add` actions.
    pub num_added_bytes: u64,
    /// Bytes referenced by `Remove` actions.
    pub num_removed_bytes: u64,
    /// Rows newly inserted.
    pub num_inserted_rows: u64,
    /// Rows rewritten with new values.
    pub num_updated_rows: u64,
    /// Rows dropped.
    pub num_deleted_rows: u64,
    /// Rows carried unchanged into rewritten files.
    pub num_copied_rows: u64,
    /// Files physically deleted (VACUUM END only).
    pub num_deleted_files: u64,
}

/// A single, immutable commit in the metadata log.
///
/// Commits are written to files such as `_lakehouse_log/0000000001.json`.
/// The version field must match the file name; `base_version` records what
/// the writer believed was the current version when the commit was prepared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    /// The version number of this commit (monotonic, starting from 1).
    pub version: u64,

    /// The version that the writer read its snapshot at. After a rebase this
    /// is older than `version - 1`.
    pub base_version: u64,

    /// Commit creation timestamp, stored as RFC3339 UTC. Strictly increasing
    /// across versions.
    pub timestamp: DateTime<Utc>,

    /// What produced this commit.
    pub operation: Operation,

    /// Ordered list of actions that describe how table state changes in this commit.
    pub actions: Vec<LogAction>,

    /// Counters reported by history.
    #[serde(default)]
    pub metrics: OperationMetrics,
}

impl Commit {
    /// Iterate over every file path touched by this commit.
    pub fn touched_paths(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().filter_map(LogAction::file_path)
    }

    /// True when this commit replaces the table metadata.
    pub fn changes_metadata(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a, LogAction::UpdateTableMeta(_)))
    }
}

/// Everything a writer hands to the log store; version and timestamp are
/// assigned at commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommit {
    /// What produced the commit.
    pub operation: Operation,
    /// Ordered actions.
    pub actions: Vec<LogAction>,
    /// Counters.
    pub metrics: OperationMetrics,
    /// Version the writer planned against.
    pub read_version: u64,
}

impl PendingCommit {
    /// A pending commit planned at `read_version`.
    pub fn new(operation: Operation, actions: Vec<LogAction>, read_version: u64) -> Self {
        Self {
            operation,
            actions,
            metrics: OperationMetrics::default(),
            read_version,
        }
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: OperationMetrics) -> Self {
        self.metrics = metrics;
        self
    }
}
