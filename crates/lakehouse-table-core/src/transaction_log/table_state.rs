//! Reconstructing table state by replaying log commits.
//!
//! `TableState` materializes the metadata stored in `_lakehouse_log/`: the
//! live file set, the table metadata, and the version/timestamp they
//! correspond to. Replay is a pure left fold over commits, so
//! `state(V2) == fold(state(V1), commits (V1, V2])` for any `V1 < V2`, which
//! is what lets snapshots and checkpoints start from an intermediate state.
//!
//! Checkpoints are serialized `TableState` values written with an atomic
//! replace under `_lakehouse_log/<version>.checkpoint.json`. They are an
//! optimization only: a missing or unreadable checkpoint falls back to
//! replaying commits.
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

use crate::{
    metadata::TableMeta,
    storage::{self, layout},
    transaction_log::{
        CommitError, CorruptStateSnafu, StorageSnafu, TransactionLogStore,
        actions::{AddFile, Commit, LogAction},
    },
};

/// In-memory view of table metadata and live files at one version.
///
/// Invariant:
/// - `table_meta` and `files` are the result of applying all commits from
///   version 1 through `version` in order.
/// - `timestamp` is the commit timestamp of `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableState {
    /// Version this state corresponds to.
    pub version: u64,
    /// Commit timestamp of `version`.
    pub timestamp: DateTime<Utc>,
    /// Table-level metadata reconstructed from the log.
    pub table_meta: TableMeta,
    /// Live files keyed by path.
    pub files: BTreeMap<String, AddFile>,
}

impl TableState {
    /// Bootstrap from the first commit of a table, which must carry the
    /// table metadata.
    pub fn from_first_commit(commit: &Commit) -> Result<Self, CommitError> {
        let table_meta = commit
            .actions
            .iter()
            .rev()
            .find_map(|a| match a {
                LogAction::UpdateTableMeta(meta) => Some(meta.clone()),
                _ => None,
            })
            .context(CorruptStateSnafu {
                msg: format!(
                    "commit {} must carry table metadata to start a table",
                    commit.version
                ),
            })?;

        let mut state = TableState {
            version: commit.version,
            timestamp: commit.timestamp,
            table_meta,
            files: BTreeMap::new(),
        };
        state.apply_actions(&commit.actions);
        Ok(state)
    }

    /// Apply the next commit in sequence.
    ///
    /// Add inserts or replaces by path, Remove deletes by path (a no-op when
    /// the path is absent) and UpdateTableMeta replaces the metadata; actions
    /// apply in order.
    pub fn apply_commit(&mut self, commit: &Commit) -> Result<(), CommitError> {
        ensure!(
            commit.version == self.version + 1,
            CorruptStateSnafu {
                msg: format!(
                    "cannot apply commit {} on top of state at version {}",
                    commit.version, self.version
                ),
            }
        );
        self.apply_actions(&commit.actions);
        self.version = commit.version;
        self.timestamp = commit.timestamp;
        Ok(())
    }

    fn apply_actions(&mut self, actions: &[LogAction]) {
        for action in actions {
            match action {
                LogAction::Add(add) => {
                    self.files.insert(add.path.clone(), add.clone());
                }
                LogAction::Remove(remove) => {
                    self.files.remove(&remove.path);
                }
                LogAction::UpdateTableMeta(meta) => {
                    self.table_meta = meta.clone();
                }
            }
        }
    }

    /// Live files in path order.
    pub fn live_files(&self) -> impl Iterator<Item = &AddFile> {
        self.files.values()
    }

    /// Paths of the live files.
    pub fn live_paths(&self) -> BTreeSet<String> {
        self.files.keys().cloned().collect()
    }

    /// Live file by path.
    pub fn file(&self, path: &str) -> Option<&AddFile> {
        self.files.get(path)
    }

    /// Number of live files.
    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Total bytes across live files.
    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size_bytes).sum()
    }

    /// Total rows across live files.
    pub fn num_records(&self) -> u64 {
        self.files.values().map(AddFile::num_records).sum()
    }
}

/// Fold `commits` onto `base` (or onto nothing, in which case the first
/// commit must be version 1).
pub fn replay(base: Option<TableState>, commits: &[Commit]) -> Result<TableState, CommitError> {
    let mut iter = commits.iter();
    let mut state = match base {
        Some(state) => state,
        None => {
            let first = iter.next().context(CorruptStateSnafu {
                msg: "cannot replay an empty commit sequence".to_string(),
            })?;
            ensure!(
                first.version == 1,
                CorruptStateSnafu {
                    msg: format!("replay must start at version 1, got {}", first.version),
                }
            );
            TableState::from_first_commit(first)?
        }
    };

    for commit in iter {
        state.apply_commit(commit)?;
    }
    Ok(state)
}

impl TransactionLogStore {
    /// Rebuild the TableState at the head by replaying the log.
    ///
    /// Returns `CommitError::CorruptState` when the log is empty.
    pub async fn rebuild_table_state(&self) -> Result<TableState, CommitError> {
        let head = self.load_current_version().await?;
        ensure!(
            head > 0,
            CorruptStateSnafu {
                msg: "Cannot rebuild TableState: the log has no commits".to_string(),
            }
        );
        self.rebuild_table_state_at(head).await
    }

    /// Rebuild the TableState at `version`, starting from the newest usable
    /// checkpoint at or below it.
    pub async fn rebuild_table_state_at(&self, version: u64) -> Result<TableState, CommitError> {
        let listing = self.list_log().await?;
        for &cp in listing.checkpoints.iter().rev().filter(|&&cp| cp <= version) {
            match self.load_checkpoint(cp).await {
                Ok(state) => return self.replay_from(Some(state), version).await,
                Err(e) => warn!("ignoring unreadable checkpoint {cp}: {e}"),
            }
        }
        self.replay_from(None, version).await
    }

    /// Apply commits `(base.version, target]` onto `base`, or `1..=target`
    /// when there is no base.
    pub async fn replay_from(
        &self,
        base: Option<TableState>,
        target: u64,
    ) -> Result<TableState, CommitError> {
        let from = base.as_ref().map_or(1, |s| s.version + 1);
        debug!("replaying commits {from}..={target} at {}", self.location());
        let commits = if from <= target {
            self.load_commits(from, target).await?
        } else {
            Vec::new()
        };
        replay(base, &commits)
    }

    /// Persist `state` as a checkpoint.
    pub async fn write_checkpoint(&self, state: &TableState) -> Result<(), CommitError> {
        let json = serde_json::to_vec(state).map_err(|e| CommitError::CorruptState {
            msg: format!("failed to serialize checkpoint {}: {e}", state.version),
            backtrace: Backtrace::capture(),
        })?;
        storage::write_atomic(
            self.location().as_ref(),
            &layout::checkpoint_rel_path(state.version),
            &json,
        )
        .await
        .context(StorageSnafu)?;
        debug!("wrote checkpoint at version {}", state.version);
        Ok(())
    }

    /// Load the checkpoint written for `version`.
    pub async fn load_checkpoint(&self, version: u64) -> Result<TableState, CommitError> {
        let json = storage::read_to_string(
            self.location().as_ref(),
            &layout::checkpoint_rel_path(version),
        )
        .await
        .context(StorageSnafu)?;

        let state: TableState =
            serde_json::from_str(&json).map_err(|e| CommitError::CorruptState {
                msg: format!("failed to parse checkpoint {version}: {e}"),
                backtrace: Backtrace::capture(),
            })?;
        ensure!(
            state.version == version,
            CorruptStateSnafu {
                msg: format!(
                    "checkpoint for version {version} records version {}",
                    state.version
                ),
            }
        );
        Ok(state)
    }
}
