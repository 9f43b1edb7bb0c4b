//! Deciding whether a writer that lost a version race may rebase.
//!
//! A transaction is described by its [`TxnFootprint`]: the version it read,
//! the files it read, the files it removes, and whether it depends on the
//! table metadata or on the complete file set. Every commit that landed in
//! `(read_version, head]` is checked against that footprint. If none touches
//! it, the transaction's actions are still valid and can be committed
//! unchanged on top of the new head; otherwise the caller must re-plan.
use std::collections::BTreeSet;

use log::debug;

use crate::{
    metadata::TableMeta,
    transaction_log::{
        CommitError, TransactionLogStore,
        actions::{Commit, LogAction},
    },
};

/// Read/write footprint of a planned transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnFootprint {
    /// Version the plan was made against.
    pub read_version: u64,
    /// Live files whose contents influenced the plan.
    pub read_files: BTreeSet<String>,
    /// Files the plan removes.
    pub write_removes: BTreeSet<String>,
    /// The plan depends on the schema (conflicts with metadata changes).
    pub reads_metadata: bool,
    /// The plan depends on the complete live file set (conflicts with any
    /// concurrent data-changing Add).
    pub reads_whole_table: bool,
}

impl TxnFootprint {
    /// A footprint that only appends new files.
    pub fn blind_append(read_version: u64) -> Self {
        Self {
            read_version,
            reads_metadata: true,
            ..Self::default()
        }
    }

    fn touches(&self, path: &str) -> bool {
        self.read_files.contains(path) || self.write_removes.contains(path)
    }
}

/// Result of checking a footprint against the commits that won the race.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictReport {
    /// No concurrent commit touches the footprint; rebase onto `head`.
    Rebase {
        /// New head to commit on top of.
        head: u64,
        /// Table metadata at `head`, if any concurrent commit replaced it.
        latest_meta: Option<TableMeta>,
    },
    /// A concurrent commit invalidated the plan.
    Conflict {
        /// First conflicting version.
        version: u64,
        /// Paths that commit touched inside the footprint.
        files: Vec<String>,
        /// The conflicting commit replaced the table metadata.
        metadata_changed: bool,
    },
}

/// Stateless conflict checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Check `footprint` against the commits in `(footprint.read_version, head]`.
    pub async fn check(
        log: &TransactionLogStore,
        footprint: &TxnFootprint,
        head: u64,
    ) -> Result<ConflictReport, CommitError> {
        let commits = if head > footprint.read_version {
            log.load_commits(footprint.read_version + 1, head).await?
        } else {
            Vec::new()
        };
        Ok(Self::check_commits(footprint, &commits, head))
    }

    /// Pure form of [`Self::check`] over already-loaded commits.
    pub fn check_commits(
        footprint: &TxnFootprint,
        commits: &[Commit],
        head: u64,
    ) -> ConflictReport {
        let mut latest_meta = None;

        for commit in commits {
            let mut files = Vec::new();
            let mut metadata_changed = false;

            for action in &commit.actions {
                match action {
                    LogAction::UpdateTableMeta(meta) => {
                        metadata_changed = true;
                        latest_meta = Some(meta.clone());
                    }
                    LogAction::Add(add) => {
                        if footprint.touches(&add.path)
                            || (footprint.reads_whole_table && add.data_change)
                        {
                            files.push(add.path.clone());
                        }
                    }
                    LogAction::Remove(remove) => {
                        if footprint.touches(&remove.path) {
                            files.push(remove.path.clone());
                        }
                    }
                }
            }

            if !files.is_empty() || (metadata_changed && footprint.reads_metadata) {
                debug!(
                    "commit {} ({}) conflicts with plan read at {}: files={files:?} metadata={metadata_changed}",
                    commit.version, commit.operation.kind, footprint.read_version
                );
                return ConflictReport::Conflict {
                    version: commit.version,
                    files,
                    metadata_changed,
                };
            }
        }

        ConflictReport::Rebase { head, latest_meta }
    }
}
