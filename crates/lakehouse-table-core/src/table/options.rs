//! Handle-level options and operation outcomes.
use crate::{metadata::TableProperties, transaction_log::OperationMetrics};

/// Default number of planning attempts before giving up with a write
/// conflict.
pub const DEFAULT_MAX_COMMIT_RETRIES: u32 = 10;

/// Options carried by a [`crate::table::Table`] handle.
///
/// These are explicit values rather than session state: two handles on the
/// same location may use different options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    /// How many times a transaction is re-planned after losing a race to a
    /// conflicting commit.
    pub max_commit_retries: u32,
    /// Refuse VACUUM retention below the safety floor unless the operation
    /// passes an explicit override.
    pub retention_duration_check: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            max_commit_retries: DEFAULT_MAX_COMMIT_RETRIES,
            retention_duration_check: true,
        }
    }
}

/// Settings for CREATE and CREATE OR REPLACE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Persistent table properties.
    pub properties: TableProperties,
    /// Free-form description shown by `detail`.
    pub description: Option<String>,
}

/// Result of a data-changing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Version written, or the version read when nothing was committed.
    pub version: u64,
    /// False when the operation turned out to change nothing.
    pub committed: bool,
    /// Planning attempts made, including the successful one.
    pub attempts: u32,
    /// Counters recorded in the commit.
    pub metrics: OperationMetrics,
}

impl CommitOutcome {
    pub(crate) fn unchanged(version: u64, attempts: u32) -> Self {
        Self {
            version,
            committed: false,
            attempts,
            metrics: OperationMetrics::default(),
        }
    }
}
