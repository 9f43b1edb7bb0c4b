//! Optimistic commit loop shared by every data-changing operation.
//!
//! 1. Read the latest snapshot and plan against it.
//! 2. Try to claim `read_version + 1`.
//! 3. On losing the race, check the winners against the plan's footprint:
//!    - disjoint: retry the same actions on top of the new head;
//!    - overlapping: throw the plan away and plan again from step 1.
//!
//! Re-planning is bounded by [`TableOptions::max_commit_retries`]; rebasing
//! is cheap and bounded separately.
//!
//! [`TableOptions::max_commit_retries`]: crate::table::TableOptions
use log::{debug, info, warn};
use snafu::prelude::*;

use crate::{
    expr::Expr,
    metadata::LogicalSchema,
    mutation::{
        Assignment, MergeSpec, MutationPlan, PlanContext, RowBatch, insert, merge, rewrite,
    },
    optimize::{self, OptimizeOptions},
    retention::restore,
    table::{
        CommitOutcome, CreateOptions, Table,
        error::{TableError, TransactionLogSnafu},
    },
    transaction_log::{
        Commit, CommitError, ConflictDetector, ConflictReport, PendingCommit, TableState,
        TxnFootprint,
    },
    value::Row,
};

/// What the caller wants done; planned afresh on every attempt.
pub(crate) enum Intent<'a> {
    Insert(&'a RowBatch),
    Overwrite(&'a RowBatch),
    Replace {
        schema: &'a LogicalSchema,
        options: &'a CreateOptions,
        batch: &'a RowBatch,
    },
    Update {
        predicate: Option<&'a Expr>,
        assignments: &'a [Assignment],
    },
    Delete {
        predicate: Option<&'a Expr>,
    },
    Merge {
        source: &'a [Row],
        spec: &'a MergeSpec,
    },
    Optimize(&'a OptimizeOptions),
    Restore(&'a TableState),
}

impl Intent<'_> {
    async fn plan(&self, ctx: PlanContext<'_>) -> Result<MutationPlan, TableError> {
        match self {
            Intent::Insert(batch) => insert::plan_insert(ctx, batch).await,
            Intent::Overwrite(batch) => insert::plan_overwrite(ctx, batch).await,
            Intent::Replace {
                schema,
                options,
                batch,
            } => insert::plan_replace(ctx, schema, options, batch).await,
            Intent::Update {
                predicate,
                assignments,
            } => rewrite::plan_update(ctx, *predicate, assignments).await,
            Intent::Delete { predicate } => rewrite::plan_delete(ctx, *predicate).await,
            Intent::Merge { source, spec } => merge::plan_merge(ctx, source, spec).await,
            Intent::Optimize(options) => optimize::plan_optimize(ctx, options).await,
            Intent::Restore(target) => restore::plan_restore(ctx, target).await,
        }
    }
}

const MAX_REBASES: u32 = 100;

enum Attempt {
    Committed(Commit),
    Conflicted(ConflictReport),
}

impl Table {
    /// Plan and commit `intent`, retrying per the handle's options.
    pub(crate) async fn execute(&self, intent: Intent<'_>) -> Result<CommitOutcome, TableError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let snapshot = self.latest().await?;
            let ctx = PlanContext {
                location: &self.location,
                io: self.io.as_ref(),
                snapshot: &snapshot,
                now: self.log().clock().now(),
            };
            let plan = intent.plan(ctx).await?;
            if plan.is_noop() {
                debug!(
                    "{} at version {} changes nothing; skipping commit",
                    plan.operation.kind, snapshot.version
                );
                return Ok(CommitOutcome::unchanged(snapshot.version, attempts));
            }

            match self
                .commit_rebasing(&plan.footprint, plan.to_pending())
                .await?
            {
                Attempt::Committed(commit) => {
                    info!(
                        "committed {} as version {} at {}",
                        commit.operation.kind, commit.version, self.location
                    );
                    self.maybe_checkpoint(commit.version).await;
                    return Ok(CommitOutcome {
                        version: commit.version,
                        committed: true,
                        attempts,
                        metrics: commit.metrics,
                    });
                }
                Attempt::Conflicted(ConflictReport::Conflict {
                    version,
                    files,
                    metadata_changed,
                }) => {
                    if attempts > self.options.max_commit_retries {
                        return Err(TableError::WriteConflict {
                            version,
                            files,
                            metadata_changed,
                            attempts,
                        });
                    }
                    warn!(
                        "{} read at {} conflicts with version {version}; re-planning",
                        plan.operation.kind,
                        plan.read_version()
                    );
                }
                Attempt::Conflicted(ConflictReport::Rebase { .. }) => {}
            }
        }
    }

    /// Commit `pending`, rebasing over non-conflicting winners.
    async fn commit_rebasing(
        &self,
        footprint: &TxnFootprint,
        pending: PendingCommit,
    ) -> Result<Attempt, TableError> {
        let log = self.log();
        let mut expected = footprint.read_version;
        let mut rebases = 0u32;
        loop {
            match log
                .commit_with_expected_version(expected, pending.clone())
                .await
            {
                Ok(commit) => return Ok(Attempt::Committed(commit)),
                Err(CommitError::Conflict { .. }) => {}
                Err(source) => return Err(TableError::TransactionLog { source }),
            }

            let head = log.load_current_version().await.context(TransactionLogSnafu)?;
            let report = ConflictDetector::check(log, footprint, head)
                .await
                .context(TransactionLogSnafu)?;
            match report {
                ConflictReport::Rebase { head, .. } => {
                    if rebases == MAX_REBASES {
                        // Nothing conflicts, but the head keeps moving; report
                        // the last winner.
                        return Ok(Attempt::Conflicted(ConflictReport::Conflict {
                            version: head,
                            files: Vec::new(),
                            metadata_changed: false,
                        }));
                    }
                    rebases += 1;
                    debug!("rebasing plan read at {} onto {head}", footprint.read_version);
                    expected = head;
                }
                conflict => return Ok(Attempt::Conflicted(conflict)),
            }
        }
    }

    /// Write a checkpoint when `version` lands on the configured interval.
    async fn maybe_checkpoint(&self, version: u64) {
        let state = match self.snapshots.snapshot_at_version(version).await {
            Ok(state) => state,
            Err(e) => {
                warn!("could not build state {version} for checkpointing: {e}");
                return;
            }
        };
        let interval = state.table_meta.properties().checkpoint_interval;
        if interval == 0 || version % interval != 0 {
            return;
        }
        if let Err(e) = self.log().write_checkpoint(&state).await {
            warn!("failed to write checkpoint {version}: {e}");
        }
    }
}
