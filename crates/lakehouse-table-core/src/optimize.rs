//! OPTIMIZE: compaction and clustering.
//!
//! Compaction bin-packs small files into files near the target size.
//! Clustering (`ZORDER BY`) rewrites every live file with rows ordered by a
//! multi-column Z-order key so that later predicates on any of the columns
//! prune well.
//!
//! Both produce one `OPTIMIZE` commit in which every action has
//! `data_change = false`: the table's rows do not change, only their
//! layout. The commit's read set is exactly its input files, so a concurrent
//! UPDATE, DELETE or MERGE of an input forces a re-plan, while concurrent
//! appends do not.
pub mod zorder;

use std::collections::BTreeSet;

use log::info;
use snafu::prelude::*;

use crate::{
    exec::write_rows_split,
    mutation::{MutationPlan, PlanContext},
    table::{
        CommitOutcome, Table,
        commit::Intent,
        error::{DataFileSnafu, InvalidOptimizeSnafu, TableError},
    },
    transaction_log::{AddFile, Operation, OperationKind},
};

pub use zorder::MAX_ZORDER_COLUMNS;

/// Options for [`Table::optimize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeOptions {
    /// Output file size; defaults to the table's `target_file_size`.
    pub target_file_size: Option<u64>,
    /// Files at or above this size are left alone by compaction; defaults to
    /// three quarters of the target.
    pub min_file_size: Option<u64>,
    /// Clustering columns (`ZORDER BY`). Empty means plain compaction.
    pub zorder_by: Vec<String>,
}

impl OptimizeOptions {
    /// Cluster by `columns`.
    pub fn zorder(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            zorder_by: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Greedy bin-packing in input order: a bin closes when the next file would
/// push it past `target`. Single-file bins are dropped.
pub(crate) fn bin_pack<'a>(files: &[&'a AddFile], target: u64) -> Vec<Vec<&'a AddFile>> {
    let mut bins = Vec::new();
    let mut current: Vec<&AddFile> = Vec::new();
    let mut current_bytes = 0u64;

    for &file in files {
        if !current.is_empty() && current_bytes + file.size_bytes > target {
            bins.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += file.size_bytes;
        current.push(file);
    }
    bins.push(current);
    bins.retain(|bin| bin.len() > 1);
    bins
}

pub(crate) async fn plan_optimize(
    ctx: PlanContext<'_>,
    options: &OptimizeOptions,
) -> Result<MutationPlan, TableError> {
    let target = options
        .target_file_size
        .unwrap_or(ctx.target_file_size());
    ensure!(
        target > 0,
        InvalidOptimizeSnafu {
            reason: "target file size must be positive",
        }
    );
    ensure!(
        options.zorder_by.len() <= MAX_ZORDER_COLUMNS,
        InvalidOptimizeSnafu {
            reason: format!(
                "ZORDER BY takes at most {MAX_ZORDER_COLUMNS} columns, got {}",
                options.zorder_by.len()
            ),
        }
    );
    let distinct: BTreeSet<&str> = options.zorder_by.iter().map(String::as_str).collect();
    ensure!(
        distinct.len() == options.zorder_by.len(),
        InvalidOptimizeSnafu {
            reason: "ZORDER BY lists a column twice",
        }
    );
    ctx.check_columns(distinct, "ZORDER BY")?;

    let mut operation =
        Operation::new(OperationKind::Optimize).with_param("targetFileSize", target);
    if !options.zorder_by.is_empty() {
        operation = operation.with_param("zOrderBy", options.zorder_by.join(","));
    }
    let mut plan = MutationPlan::new(operation, ctx.snapshot.version);

    let bins = if options.zorder_by.is_empty() {
        let min = options.min_file_size.unwrap_or(target / 4 * 3);
        let small: Vec<&AddFile> = ctx
            .snapshot
            .live_files()
            .filter(|f| f.size_bytes < min)
            .collect();
        bin_pack(&small, target)
    } else {
        let all: Vec<&AddFile> = ctx.snapshot.live_files().collect();
        if all.len() < 2 { Vec::new() } else { vec![all] }
    };

    for bin in bins {
        let mut rows = Vec::new();
        for file in &bin {
            rows.extend(ctx.read_rows(file).await?);
            plan.remove(file, ctx.now, false);
        }
        let rows = zorder::zorder_sort(rows, &options.zorder_by);
        let adds = write_rows_split(ctx.io, ctx.location, ctx.schema(), &rows, target)
            .await
            .context(DataFileSnafu)?;
        plan.adds.extend(adds.into_iter().map(|add| AddFile {
            data_change: false,
            ..add
        }));
        plan.metrics.num_copied_rows += rows.len() as u64;
    }
    Ok(plan)
}

impl Table {
    /// OPTIMIZE [ZORDER BY ...].
    ///
    /// Returns without committing when there is nothing to compact.
    pub async fn optimize(&self, options: &OptimizeOptions) -> Result<CommitOutcome, TableError> {
        let outcome = self.execute(Intent::Optimize(options)).await?;
        if outcome.committed {
            info!(
                "OPTIMIZE at {}: {} files compacted into {}",
                self.location(),
                outcome.metrics.num_removed_files,
                outcome.metrics.num_added_files
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FileStats;
    use chrono::Utc;

    fn file(path: &str, size: u64) -> AddFile {
        AddFile {
            path: path.to_string(),
            size_bytes: size,
            modification_time: Utc::now(),
            stats: FileStats::default(),
            data_change: true,
        }
    }

    fn paths(bins: &[Vec<&AddFile>]) -> Vec<Vec<String>> {
        bins.iter()
            .map(|b| b.iter().map(|f| f.path.clone()).collect())
            .collect()
    }

    #[test]
    fn bins_close_before_exceeding_target_and_singletons_are_dropped() {
        let files = [
            file("a", 40),
            file("b", 40),
            file("c", 40),
            file("d", 90),
            file("e", 10),
        ];
        let refs: Vec<&AddFile> = files.iter().collect();
        let bins = bin_pack(&refs, 100);
        assert_eq!(
            paths(&bins),
            vec![vec!["a".to_string(), "b".to_string()], vec!["d".to_string(), "e".to_string()]]
        );
    }

    #[test]
    fn nothing_to_pack() {
        assert!(bin_pack(&[], 100).is_empty());
        let one = file("a", 1);
        assert!(bin_pack(&[&one], 100).is_empty());
    }
}
