//! Retention management: VACUUM and RESTORE.
//!
//! Removing a file from the table only unreferences it; the bytes stay in
//! storage so older snapshots remain readable. VACUUM physically deletes
//! unreferenced files once they fall out of the retention window. RESTORE
//! goes the other way and re-references the files of an older version,
//! which only works while VACUUM has not reaped them.
pub(crate) mod restore;
pub mod vacuum;

use snafu::prelude::*;

use crate::{
    table::{
        Table,
        error::{TableError, TransactionLogSnafu},
    },
    transaction_log::{Commit, CommitError, Operation, OperationMetrics, PendingCommit},
};

pub use vacuum::{VacuumOptions, VacuumReport};

/// Retry budget for commits without file actions, which never conflict.
const MAX_BOOKKEEPING_ATTEMPTS: u32 = 100;

impl Table {
    /// Commit an action-less bookkeeping record on top of whatever the head
    /// is.
    pub(crate) async fn commit_bookkeeping(
        &self,
        operation: Operation,
        metrics: OperationMetrics,
    ) -> Result<Commit, TableError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let head = self.version().await?;
            let pending = PendingCommit::new(operation.clone(), Vec::new(), head)
                .with_metrics(metrics.clone());
            match self.log().commit_with_expected_version(head, pending).await {
                Ok(commit) => return Ok(commit),
                Err(CommitError::Conflict { .. }) if attempts < MAX_BOOKKEEPING_ATTEMPTS => {}
                Err(e) => return Err(e).context(TransactionLogSnafu),
            }
        }
    }
}
