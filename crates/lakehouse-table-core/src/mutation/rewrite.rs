//! UPDATE and DELETE: copy-on-write rewrites of the files that change.
use snafu::prelude::*;

use crate::{
    expr::{EvalContext, Expr, pruning::may_match},
    mutation::{Assignment, MutationPlan, PlanContext},
    table::error::{ExpressionSnafu, TableError},
    transaction_log::{AddFile, Operation, OperationKind},
    value::Row,
};

fn matches(predicate: Option<&Expr>, row: &Row) -> Result<bool, TableError> {
    match predicate {
        None => Ok(true),
        Some(p) => p
            .eval_predicate(&EvalContext::target(row))
            .context(ExpressionSnafu),
    }
}

fn candidates<'s>(ctx: &PlanContext<'s>, predicate: Option<&Expr>) -> Vec<&'s AddFile> {
    ctx.snapshot
        .live_files()
        .filter(|f| predicate.is_none_or(|p| may_match(p, &f.stats)))
        .collect()
}

/// Apply `assignments` to `row`. Every right-hand side sees the row as it
/// was before the first assignment.
pub(crate) fn apply_assignments(
    assignments: &[Assignment],
    ctx: &EvalContext<'_>,
    base: &Row,
) -> Result<Row, TableError> {
    let mut out = base.clone();
    for a in assignments {
        let value = a.value.eval(ctx).context(ExpressionSnafu)?;
        out.set(a.column.clone(), value);
    }
    Ok(out)
}

pub(crate) async fn plan_update(
    ctx: PlanContext<'_>,
    predicate: Option<&Expr>,
    assignments: &[Assignment],
) -> Result<MutationPlan, TableError> {
    ctx.check_columns(assignments.iter().map(|a| a.column.as_str()), "UPDATE SET")?;
    for a in assignments {
        ctx.check_columns(a.value.target_columns(), "UPDATE SET")?;
    }
    if let Some(p) = predicate {
        ctx.check_columns(p.target_columns(), "UPDATE WHERE")?;
    }

    let mut operation = Operation::new(OperationKind::Update);
    if let Some(p) = predicate {
        operation = operation.with_param("predicate", p);
    }
    let mut plan = MutationPlan::new(operation, ctx.snapshot.version);
    let schema = ctx.schema();

    for file in candidates(&ctx, predicate) {
        plan.note_read(file);
        let rows = ctx.read_rows(file).await?;
        let mut updated = 0u64;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if matches(predicate, &row)? {
                let new_row = apply_assignments(assignments, &EvalContext::target(&row), &row)?;
                out.push(ctx.conform(&new_row)?);
                updated += 1;
            } else {
                out.push(row);
            }
        }
        if updated == 0 {
            continue;
        }

        plan.remove(file, ctx.now, true);
        plan.adds.extend(ctx.write_rows(schema, &out).await?);
        plan.metrics.num_updated_rows += updated;
        plan.metrics.num_copied_rows += out.len() as u64 - updated;
    }
    Ok(plan)
}

pub(crate) async fn plan_delete(
    ctx: PlanContext<'_>,
    predicate: Option<&Expr>,
) -> Result<MutationPlan, TableError> {
    if let Some(p) = predicate {
        ctx.check_columns(p.target_columns(), "DELETE WHERE")?;
    }

    let mut operation = Operation::new(OperationKind::Delete);
    if let Some(p) = predicate {
        operation = operation.with_param("predicate", p);
    }
    let mut plan = MutationPlan::new(operation, ctx.snapshot.version);

    for file in candidates(&ctx, predicate) {
        // Without a predicate whole files go; no need to open them.
        if predicate.is_none() {
            plan.remove(file, ctx.now, true);
            plan.metrics.num_deleted_rows += file.num_records();
            continue;
        }

        plan.note_read(file);
        let rows = ctx.read_rows(file).await?;
        let total = rows.len() as u64;
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if !matches(predicate, &row)? {
                kept.push(row);
            }
        }
        let deleted = total - kept.len() as u64;
        if deleted == 0 {
            continue;
        }

        plan.remove(file, ctx.now, true);
        plan.adds.extend(ctx.write_rows(ctx.schema(), &kept).await?);
        plan.metrics.num_deleted_rows += deleted;
        plan.metrics.num_copied_rows += kept.len() as u64;
    }
    Ok(plan)
}
