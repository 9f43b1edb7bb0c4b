//! RESTORE: make an older version current again.
//!
//! The restore commit is the delta between the head and the target: files
//! live at the target but not at the head are re-added, files live at the
//! head but not at the target are removed, and the target's metadata is
//! reinstated if it differs. Re-added files must still exist in storage.
use snafu::prelude::*;

use crate::{
    mutation::{MutationPlan, PlanContext},
    storage,
    table::{
        CommitOutcome, Table,
        commit::Intent,
        error::{StorageSnafu, TableError},
    },
    transaction_log::{AddFile, Operation, OperationKind, TableState, VersionSpec},
};

pub(crate) async fn plan_restore(
    ctx: PlanContext<'_>,
    target: &TableState,
) -> Result<MutationPlan, TableError> {
    let operation = Operation::new(OperationKind::Restore)
        .with_param("version", target.version)
        .with_param("timestamp", target.timestamp.to_rfc3339());
    let mut plan = MutationPlan::new(operation, ctx.snapshot.version);
    plan.footprint.reads_whole_table = true;
    plan.commit_if_empty = true;

    for (path, add) in &target.files {
        if let Some(current) = ctx.snapshot.file(path) {
            plan.note_read(current);
            continue;
        }
        match storage::file_entry(ctx.location.storage(), &ctx.location.resolve(path)).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(TableError::StaleFileReference {
                    path: path.clone(),
                    version: target.version,
                });
            }
            Err(e) => return Err(e).context(StorageSnafu),
        }
        plan.metrics.num_inserted_rows += add.num_records();
        plan.adds.push(AddFile {
            data_change: true,
            ..add.clone()
        });
    }

    for file in ctx.snapshot.live_files() {
        if !target.files.contains_key(&file.path) {
            plan.remove(file, ctx.now, true);
            plan.metrics.num_deleted_rows += file.num_records();
        }
    }

    if target.table_meta != ctx.snapshot.table_meta {
        plan.new_meta = Some(target.table_meta.clone());
    }
    Ok(plan)
}

impl Table {
    /// RESTORE TABLE TO VERSION AS OF / TIMESTAMP AS OF `spec`.
    ///
    /// Always records a `RESTORE` commit, even when the head already equals
    /// the target.
    pub async fn restore(&self, spec: VersionSpec) -> Result<CommitOutcome, TableError> {
        let target = self.snapshot_at(spec).await?;
        self.execute(Intent::Restore(&target)).await
    }
}
