//! Async helpers for persisting and reading the transaction log.
//!
//! This module owns all on-disk interactions with `_lakehouse_log/`:
//! - Tracking the `CURRENT` pointer and interpreting the "no file" case as
//!   version `0` (no table yet).
//! - Confirming the head by probing past `CURRENT`, so a writer that crashed
//!   after creating its commit file but before moving `CURRENT` does not
//!   leave a hidden version behind.
//! - Writing zero-padded commit files with create-new semantics so each
//!   version is created exactly once.
//! - Mapping storage-layer failures into [`CommitError`] variants so callers
//!   can differentiate between conflicts, storage errors, and corrupt state.
//!
//! Higher-level planning (which actions to commit, whether a lost race can be
//! rebased) lives in the table layer and the conflict detector.
use std::{path::Path, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use snafu::{Backtrace, prelude::*};

use crate::{
    clock::{Clock, SystemClock},
    storage::{
        self, StorageError, TableLocation,
        layout::{self, LogFileKind},
    },
    transaction_log::{
        CommitError, ConflictSnafu, CorruptStateSnafu, StorageSnafu,
        actions::{Commit, PendingCommit},
    },
};

/// Helper for reading and writing the commit log under a table root.
///
/// Layout:
///   <root>/_lakehouse_log/0000000001.json
///   <root>/_lakehouse_log/0000000002.json
///   <root>/_lakehouse_log/CURRENT
#[derive(Debug, Clone)]
pub struct TransactionLogStore {
    location: TableLocation,
    clock: Arc<dyn Clock>,
}

/// Commit and checkpoint versions present in the log directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogListing {
    /// Commit versions, ascending.
    pub commits: Vec<u64>,
    /// Checkpoint versions, ascending.
    pub checkpoints: Vec<u64>,
}

impl TransactionLogStore {
    /// Create a new TransactionLogStore rooted at a table directory, using
    /// the system clock for commit timestamps.
    pub fn new(location: TableLocation) -> Self {
        Self::with_clock(location, Arc::new(SystemClock))
    }

    /// Create a store that stamps commits with `clock`.
    pub fn with_clock(location: TableLocation, clock: Arc<dyn Clock>) -> Self {
        Self { location, clock }
    }

    /// Get the TableLocation of the LogStore.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    /// Clock used to stamp commits.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn write_atomic_rel(&self, rel: &Path, contents: &[u8]) -> Result<(), CommitError> {
        storage::write_atomic(self.location.as_ref(), rel, contents)
            .await
            .context(StorageSnafu)
    }

    async fn read_to_string_rel(&self, rel: &Path) -> Result<String, CommitError> {
        storage::read_to_string(self.location.as_ref(), rel)
            .await
            .context(StorageSnafu)
    }

    async fn commit_exists(&self, version: u64) -> Result<bool, CommitError> {
        let rel = layout::commit_rel_path(version);
        match storage::file_entry(self.location.as_ref(), &rel).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(source) => Err(CommitError::Storage { source }),
        }
    }

    /// Load a single commit by version.
    ///
    /// - On storage-layer failures (including a missing file), returns
    ///   `CommitError::Storage`.
    /// - On JSON parse failures or a version that disagrees with the file
    ///   name, returns `CommitError::CorruptState`.
    pub async fn load_commit(&self, version: u64) -> Result<Commit, CommitError> {
        let rel = layout::commit_rel_path(version);
        let json = self.read_to_string_rel(&rel).await?;

        let commit: Commit = serde_json::from_str(&json).map_err(|e| CommitError::CorruptState {
            msg: format!("failed to parse commit {version}: {e}"),
            backtrace: Backtrace::capture(),
        })?;

        ensure!(
            commit.version == version,
            CorruptStateSnafu {
                msg: format!(
                    "commit file for version {version} records version {}",
                    commit.version
                ),
            }
        );

        Ok(commit)
    }

    /// Load commits `from..=to` in version order.
    pub async fn load_commits(&self, from: u64, to: u64) -> Result<Vec<Commit>, CommitError> {
        let mut out = Vec::with_capacity(to.saturating_sub(from).saturating_add(1) as usize);
        for version in from..=to {
            out.push(self.load_commit(version).await?);
        }
        Ok(out)
    }

    /// Read the CURRENT pointer as written.
    ///
    /// Behavior:
    /// - If CURRENT does not exist, treat as a fresh table and return 0.
    /// - If CURRENT contains invalid or empty content, return CorruptState.
    pub async fn load_current_pointer(&self) -> Result<u64, CommitError> {
        let rel = layout::current_rel_path();

        let contents = match storage::read_to_string(self.location.as_ref(), &rel).await {
            Ok(s) => s,
            Err(StorageError::NotFound { .. }) => return Ok(0),
            Err(source) => return Err(CommitError::Storage { source }),
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return CorruptStateSnafu {
                msg: format!("CURRENT has empty content at {rel:?}"),
            }
            .fail();
        }
        trimmed
            .parse::<u64>()
            .map_err(|e| CommitError::CorruptState {
                msg: format!("CURRENT has invalid content {trimmed:?}: {e}"),
                backtrace: Backtrace::capture(),
            })
    }

    /// Resolve the head version.
    ///
    /// Starts from CURRENT and probes forward while the next commit file
    /// exists. Returns 0 when no commit exists yet.
    pub async fn load_current_version(&self) -> Result<u64, CommitError> {
        let pointer = self.load_current_pointer().await?;

        let mut head = pointer;
        while self.commit_exists(head + 1).await? {
            head += 1;
        }

        if head != pointer {
            warn!(
                "CURRENT at {} points to version {pointer}, but commits exist up to {head}",
                self.location
            );
        }
        Ok(head)
    }

    /// List commit and checkpoint versions present on disk.
    pub async fn list_log(&self) -> Result<LogListing, CommitError> {
        let entries = storage::list_files(self.location.as_ref(), &layout::log_rel_dir())
            .await
            .context(StorageSnafu)?;

        let mut listing = LogListing::default();
        for entry in entries {
            let Some(name) = entry.rel_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match layout::parse_log_file_name(name) {
                Some(LogFileKind::Commit(v)) => listing.commits.push(v),
                Some(LogFileKind::Checkpoint(v)) => listing.checkpoints.push(v),
                None => {}
            }
        }
        listing.commits.sort_unstable();
        listing.checkpoints.sort_unstable();
        Ok(listing)
    }

    /// Oldest version that can still be reconstructed.
    ///
    /// A version is reconstructible when every commit from the nearest
    /// checkpoint (or from version 1) up to it is present. Returns `None`
    /// for an empty log.
    pub async fn retention_floor(&self) -> Result<Option<u64>, CommitError> {
        let listing = self.list_log().await?;
        let Some(&first_commit) = listing.commits.first() else {
            return Ok(None);
        };

        if first_commit <= 1 {
            return Ok(Some(first_commit.max(1)));
        }

        // Commits below `first_commit` were removed; only versions covered by
        // a checkpoint at or after the gap can be rebuilt.
        let floor = listing
            .checkpoints
            .iter()
            .copied()
            .find(|&cp| cp + 1 >= first_commit)
            .unwrap_or(first_commit);
        Ok(Some(floor))
    }

    /// Commit a new version with an optimistic concurrency guard.
    ///
    /// ## Concurrency semantics
    ///
    /// - The head check is advisory and subject to races. The actual guard is
    ///   the create-new of the commit file: if another writer wins the race,
    ///   this returns `CommitError::Conflict` with `found = expected + 1`.
    ///
    /// ## Timestamps
    ///
    /// Commit timestamps are `max(clock.now(), previous + 1ms)` so that
    /// timestamp time travel always resolves to a single version.
    ///
    /// ## Crash recovery
    ///
    /// If the commit file is created but updating CURRENT fails, the commit
    /// is still durable: [`Self::load_current_version`] probes past CURRENT
    /// and the next commit rewrites the pointer.
    pub async fn commit_with_expected_version(
        &self,
        expected: u64,
        pending: PendingCommit,
    ) -> Result<Commit, CommitError> {
        // 1) Advisory guard on the head.
        let current = self.load_current_version().await?;
        if current != expected {
            return ConflictSnafu {
                expected,
                found: current,
            }
            .fail();
        }

        // 2) Compute next version with overflow guard
        let version = expected.checked_add(1).context(CorruptStateSnafu {
            msg: "version counter overflow".to_string(),
        })?;

        // 3) Build commit payload
        let timestamp = self.next_timestamp(expected).await?;
        let commit = Commit {
            version,
            base_version: pending.read_version,
            timestamp,
            operation: pending.operation,
            actions: pending.actions,
            metrics: pending.metrics,
        };

        let json = serde_json::to_vec(&commit).map_err(|e| CommitError::CorruptState {
            msg: format!("failed to serialize commit {version}: {e}"),
            backtrace: Backtrace::capture(),
        })?;

        // 4) Claim the version. Losing the race is a conflict, not a storage
        //    failure.
        let commit_rel = layout::commit_rel_path(version);
        match storage::write_new(self.location.as_ref(), &commit_rel, &json).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists { .. }) => {
                return ConflictSnafu {
                    expected,
                    found: version,
                }
                .fail();
            }
            Err(source) => return Err(CommitError::Storage { source }),
        }

        // 5) Update CURRENT via atomic write (temp + rename).
        let current_contents = format!("{version}\n");
        if let Err(e) = self
            .write_atomic_rel(&layout::current_rel_path(), current_contents.as_bytes())
            .await
        {
            // The commit file is the source of truth; readers probe past a
            // stale pointer.
            warn!("commit {version} is durable but CURRENT was not updated: {e}");
        }

        debug!(
            "committed version {version} ({}) at {}",
            commit.operation.kind, self.location
        );
        Ok(commit)
    }

    async fn next_timestamp(&self, previous_version: u64) -> Result<DateTime<Utc>, CommitError> {
        let now = self.clock.now();
        if previous_version == 0 {
            return Ok(now);
        }
        match self.load_commit(previous_version).await {
            Ok(prev) => Ok(now.max(prev.timestamp + Duration::milliseconds(1))),
            Err(e) if e.is_not_found() => Ok(now),
            Err(e) => Err(e),
        }
    }
}
