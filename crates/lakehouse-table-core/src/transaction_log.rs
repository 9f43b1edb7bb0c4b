//! Append-only transaction log and the table state derived from it.
//!
//! This module implements the Delta-inspired metadata layer for
//! `lakehouse-table` and defines the logical model written to and read from
//! the `_lakehouse_log/` directory.
//!
//! - A simple append-only commit log stored as JSON files under
//!   `_lakehouse_log/` (for example, `_lakehouse_log/0000000001.json`).
//! - A `CURRENT` pointer that tracks the latest committed table version.
//!   It is advisory: the head is confirmed by probing for newer commit
//!   files, so a crash between the two writes never hides a commit.
//! - Optimistic concurrency based on version guards: exactly one writer can
//!   create any given version, losers get [`CommitError::Conflict`].
//! - A [`TableState`] materialized by replaying commits, a cached
//!   [`SnapshotBuilder`] over it, periodic checkpoints, and the
//!   [`ConflictDetector`] that decides whether a losing writer may rebase.
//!
//! The log is designed to be:
//!
//! - **Append-only**: commits never mutate existing files.
//! - **Monotonically versioned**: versions are `u64` values that only
//!   increase, and commit timestamps increase with them.
//! - **Human-inspectable**: JSON commits and a small set of actions
//!   make it easy to debug with basic tools.
//!
//! ## On-disk layout (high level)
//!
//! ```text
//! table_root/
//!   _lakehouse_log/
//!     CURRENT                          # latest committed version (e.g. "3\n")
//!     0000000001.json                  # Commit version 1 (CREATE TABLE)
//!     0000000002.json                  # Commit version 2
//!     0000000010.checkpoint.json       # materialized state at version 10
//!   data/                              # data files (part-<uuid>.jsonl)
//! ```
//!
//! Each `*.json` commit file contains a single [`Commit`] value, for example:
//!
//! ```json
//! {
//!   "version": 2,
//!   "base_version": 1,
//!   "timestamp": "2025-01-01T00:00:00Z",
//!   "operation": { "kind": "INSERT" },
//!   "actions": [
//!     {
//!       "Add": {
//!         "path": "data/part-6f1c.jsonl",
//!         "size_bytes": 812,
//!         "modification_time": "2025-01-01T00:00:00Z",
//!         "stats": { "num_records": 12, "min_values": {}, "max_values": {}, "null_count": {} },
//!         "data_change": true
//!       }
//!     }
//!   ],
//!   "metrics": { "num_added_files": 1, "num_inserted_rows": 12 }
//! }
//! ```
pub mod actions;
pub mod conflict;
pub mod log_store;
pub mod snapshot;
pub mod table_state;

pub use actions::{
    AddFile, Commit, LogAction, Operation, OperationKind, OperationMetrics, PendingCommit,
    RemoveFile,
};
pub use conflict::{ConflictDetector, ConflictReport, TxnFootprint};
pub use log_store::TransactionLogStore;
pub use snapshot::{SnapshotBuilder, VersionSpec};
pub use table_state::TableState;

use snafu::{Backtrace, prelude::*};

use crate::storage::StorageError;

/// Errors that can occur while reading or writing the commit log.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommitError {
    /// The caller's expected version is no longer the head.
    #[snafu(display("Commit conflict: expected version {expected}, but head is {found}"))]
    Conflict {
        /// The version the caller expected to be current.
        expected: u64,
        /// The head observed (or the version another writer claimed).
        found: u64,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Underlying storage error while working with the log or CURRENT file.
    ///
    /// Backtraces are delegated to the inner StorageError.
    #[snafu(display("Storage error while accessing commit log: {source}"))]
    Storage {
        /// Underlying storage error returned by the storage backend.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// The log or CURRENT file is in an unexpected / malformed state.
    #[snafu(display("Corrupt log state: {msg}"))]
    CorruptState {
        /// A description of the corrupt state.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },
}

impl CommitError {
    /// True when the error is a missing commit or checkpoint file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommitError::Storage { source } if source.is_not_found())
    }
}
