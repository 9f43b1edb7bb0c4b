//! VACUUM: delete data files no snapshot in the retention window needs.
//!
//! With retention `R` and threshold `T = now - R`, the protected set is the
//! union of the live files of every version from the one in effect at `T`
//! through the head. That set equals the live files at the boundary version
//! plus every file added after it, which is how it is computed.
//!
//! A file under `data/` is deleted when it is not protected and its
//! modification time is before `T`. The time check also keeps files that
//! an in-flight writer has produced but not yet committed. Right before
//! each delete the head is re-read; files added by commits that landed in
//! the meantime join the protected set.
use std::{collections::BTreeSet, path::Path};

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use snafu::prelude::*;

use crate::{
    storage::{self, layout},
    table::{
        Table,
        error::{StorageSnafu, TableError, TransactionLogSnafu, UnsafeVacuumSnafu},
    },
    transaction_log::{
        LogAction, Operation, OperationKind, OperationMetrics, VersionSpec,
        snapshot::SnapshotError,
    },
};

/// Options for [`Table::vacuum`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumOptions {
    /// Retention window; defaults to the table's
    /// `deleted_file_retention_hours`.
    pub retention_hours: Option<u64>,
    /// List what would be deleted without deleting or committing anything.
    pub dry_run: bool,
    /// Accept a retention below the table's safety floor.
    pub allow_unsafe_retention: bool,
}

impl VacuumOptions {
    /// Vacuum with an explicit retention window.
    pub fn retain_hours(hours: u64) -> Self {
        Self {
            retention_hours: Some(hours),
            ..Self::default()
        }
    }
}

/// What a VACUUM found and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacuumReport {
    /// Retention applied.
    pub retention_hours: u64,
    /// Files modified before this instant were eligible.
    pub threshold: DateTime<Utc>,
    /// Oldest version whose files were protected.
    pub boundary_version: u64,
    /// Eligible paths at planning time.
    pub candidates: Vec<String>,
    /// Paths actually deleted (empty for a dry run).
    pub deleted: Vec<String>,
    /// Candidates a concurrent commit re-referenced before deletion.
    pub skipped: Vec<String>,
    /// Candidates already gone from storage when their turn came.
    pub vanished: Vec<String>,
    /// True for a dry run, which deletes and commits nothing.
    pub dry_run: bool,
}

/// A planned VACUUM: the report so far plus what deletion re-checks
/// against.
#[derive(Debug)]
pub(crate) struct VacuumPlan {
    report: VacuumReport,
    protected: BTreeSet<String>,
    checked_head: u64,
}

impl Table {
    /// VACUUM [RETAIN n HOURS] [DRY RUN].
    pub async fn vacuum(&self, options: VacuumOptions) -> Result<VacuumReport, TableError> {
        let plan = self.plan_vacuum(options).await?;
        if options.dry_run {
            info!(
                "VACUUM DRY RUN at {}: {} files eligible",
                self.location(),
                plan.report.candidates.len()
            );
            return Ok(plan.report);
        }
        self.run_vacuum(plan).await
    }

    /// Check the retention window and collect candidates. Touches nothing.
    pub(crate) async fn plan_vacuum(
        &self,
        options: VacuumOptions,
    ) -> Result<VacuumPlan, TableError> {
        let head_state = self.latest().await?;
        let minimum_hours = head_state.table_meta.properties().deleted_file_retention_hours;
        let retention_hours = options.retention_hours.unwrap_or(minimum_hours);
        let checks_enabled =
            self.options().retention_duration_check && !options.allow_unsafe_retention;
        ensure!(
            retention_hours >= minimum_hours || !checks_enabled,
            UnsafeVacuumSnafu {
                retention_hours,
                minimum_hours,
            }
        );
        if retention_hours < minimum_hours {
            warn!(
                "VACUUM at {} with retention {retention_hours}h below the {minimum_hours}h floor",
                self.location()
            );
        }

        let now = self.log().clock().now();
        let threshold = i64::try_from(retention_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let boundary_version = self.boundary_version(threshold).await?;

        let mut protected = self
            .snapshots()
            .snapshot_at_version(boundary_version)
            .await?
            .live_paths();
        let mut checked_head = boundary_version;
        self.protect_added_since(&mut protected, &mut checked_head)
            .await?;

        let entries = storage::list_files(self.location().storage(), &layout::data_rel_dir())
            .await
            .context(StorageSnafu)?;
        let candidates: Vec<String> = entries
            .into_iter()
            .filter(|e| e.modified < threshold)
            .map(|e| e.rel_path.to_string_lossy().into_owned())
            .filter(|p| self.location().owns(p) && !protected.contains(p))
            .collect();

        Ok(VacuumPlan {
            report: VacuumReport {
                retention_hours,
                threshold,
                boundary_version,
                candidates,
                deleted: Vec::new(),
                skipped: Vec::new(),
                vanished: Vec::new(),
                dry_run: options.dry_run,
            },
            protected,
            checked_head,
        })
    }

    /// Record `VACUUM START`, delete the planned candidates that are still
    /// unreferenced, and record `VACUUM END`.
    pub(crate) async fn run_vacuum(&self, plan: VacuumPlan) -> Result<VacuumReport, TableError> {
        let VacuumPlan {
            mut report,
            mut protected,
            mut checked_head,
        } = plan;
        let retention_hours = report.retention_hours;

        let start = Operation::new(OperationKind::VacuumStart)
            .with_param("retentionHours", retention_hours)
            .with_param("numFilesToDelete", report.candidates.len());
        self.commit_bookkeeping(start, OperationMetrics::default())
            .await?;

        for path in &report.candidates {
            self.protect_added_since(&mut protected, &mut checked_head)
                .await?;
            if protected.contains(path) {
                report.skipped.push(path.clone());
                continue;
            }
            match storage::delete_file(self.location().storage(), Path::new(path)).await {
                Ok(()) => report.deleted.push(path.clone()),
                Err(e) if e.is_not_found() => {
                    warn!("{path} vanished before VACUUM deleted it");
                    report.vanished.push(path.clone());
                }
                Err(source) => return Err(TableError::Storage { source }),
            }
        }

        let end = Operation::new(OperationKind::VacuumEnd).with_param("status", "COMPLETED");
        let metrics = OperationMetrics {
            num_deleted_files: report.deleted.len() as u64,
            ..OperationMetrics::default()
        };
        self.commit_bookkeeping(end, metrics).await?;
        info!(
            "VACUUM at {}: deleted {} of {} eligible files",
            self.location(),
            report.deleted.len(),
            report.candidates.len()
        );
        Ok(report)
    }

    /// Version in effect at `threshold`; the oldest readable version when
    /// the threshold predates it.
    async fn boundary_version(&self, threshold: DateTime<Utc>) -> Result<u64, TableError> {
        match self
            .snapshots()
            .resolve_version(VersionSpec::Timestamp(threshold))
            .await
        {
            Ok(version) => Ok(version),
            Err(SnapshotError::VersionNotFound {
                floor: Some(floor),
                ..
            }) => Ok(floor),
            Err(e) => Err(e.into()),
        }
    }

    /// Add every path added by commits in `(checked_head, head]` to
    /// `protected`, then advance `checked_head`.
    async fn protect_added_since(
        &self,
        protected: &mut BTreeSet<String>,
        checked_head: &mut u64,
    ) -> Result<(), TableError> {
        let head = self.version().await?;
        if head <= *checked_head {
            return Ok(());
        }
        let commits = self
            .log()
            .load_commits(*checked_head + 1, head)
            .await
            .context(TransactionLogSnafu)?;
        for commit in commits {
            for action in commit.actions {
                if let LogAction::Add(add) = action {
                    protected.insert(add.path);
                }
            }
        }
        *checked_head = head;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        clock::ManualClock,
        expr::{col, lit},
        metadata::{LogicalColumn, LogicalDataType, LogicalSchema},
        storage::TableLocation,
        table::CreateOptions,
        value::{Row, Value},
    };
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn unsafe_zero() -> VacuumOptions {
        VacuumOptions {
            allow_unsafe_retention: true,
            ..VacuumOptions::retain_hours(0)
        }
    }

    /// One file added at v2 and unreferenced at v3, an hour before `now`.
    async fn unreferenced_file(
        tmp: &TempDir,
    ) -> Result<(Table, String), Box<dyn std::error::Error>> {
        let clock = ManualClock::new(Utc::now());
        let table = Table::new(TableLocation::local(tmp.path()))
            .with_clock(Arc::new(clock.clone()));
        let schema = LogicalSchema::new(vec![LogicalColumn::new(
            "id",
            LogicalDataType::Int64,
            false,
        )])?;
        table.create(schema, CreateOptions::default()).await?;
        let row: Row = [("id", Value::from(1i64))].into_iter().collect();
        table.insert(vec![row]).await?;
        let path = table
            .snapshot_at(VersionSpec::Version(2))
            .await?
            .live_paths()
            .into_iter()
            .next()
            .ok_or("insert wrote no file")?;
        table.delete(Some(&col("id").eq(lit(1i64)))).await?;
        clock.advance(Duration::hours(1));
        Ok((table, path))
    }

    #[tokio::test]
    async fn candidate_revived_after_planning_is_kept() -> TestResult {
        let tmp = TempDir::new()?;
        let (table, path) = unreferenced_file(&tmp).await?;

        let plan = table.plan_vacuum(unsafe_zero()).await?;
        assert_eq!(plan.report.candidates, vec![path.clone()]);

        // A RESTORE lands between planning and deletion and re-adds the file.
        table.restore(VersionSpec::Version(2)).await?;

        let report = table.run_vacuum(plan).await?;
        assert_eq!(report.skipped, vec![path.clone()]);
        assert!(report.deleted.is_empty());
        assert!(tmp.path().join(&path).exists());
        assert_eq!(table.scan(VersionSpec::Latest).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn candidate_gone_before_deletion_is_reported() -> TestResult {
        let tmp = TempDir::new()?;
        let (table, path) = unreferenced_file(&tmp).await?;

        let plan = table.plan_vacuum(unsafe_zero()).await?;
        std::fs::remove_file(tmp.path().join(&path))?;

        let report = table.run_vacuum(plan).await?;
        assert_eq!(report.vanished, vec![path]);
        assert!(report.deleted.is_empty());
        assert_eq!(table.version().await?, 5);
        Ok(())
    }
}
