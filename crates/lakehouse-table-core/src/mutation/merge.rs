//! MERGE: upsert a source row set into the table.
//!
//! Every target row in a candidate file is joined against the source rows
//! with the `ON` condition. For a matched pair the first `WHEN MATCHED`
//! clause whose condition holds decides the row's fate; source rows that
//! matched nothing go through the `WHEN NOT MATCHED` clauses the same way.
//! Only files in which some row is updated or deleted are rewritten.
//!
//! Candidate files are pruned with the equality conjuncts of `ON`: for each
//! `target.k = source.s` term the source values of `s` bound the range of
//! `k` a matching file must overlap.
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    expr::{EvalContext, Expr, col, lit, pruning::may_match},
    mutation::{Assignment, MutationPlan, PlanContext, rewrite::apply_assignments},
    table::error::{AmbiguousMergeMatchSnafu, ExpressionSnafu, InvalidMergeSnafu, TableError},
    transaction_log::{Operation, OperationKind},
    value::{Row, Value},
};

/// What happens to a matched target row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedAction {
    /// `UPDATE SET column = expr, ...`
    Update(Vec<Assignment>),
    /// `UPDATE SET *`: copy every table column from the source row.
    UpdateAll,
    /// `DELETE`
    Delete,
}

/// `WHEN MATCHED [AND condition] THEN action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedClause {
    /// Extra condition over the target and source rows.
    #[serde(default)]
    pub condition: Option<Expr>,
    /// Action to apply.
    pub action: MatchedAction,
}

/// What happens to a source row with no match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotMatchedAction {
    /// `INSERT (column, ...) VALUES (expr, ...)`; unlisted columns are NULL.
    Insert(Vec<Assignment>),
    /// `INSERT *`: copy every table column from the source row.
    InsertAll,
}

/// `WHEN NOT MATCHED [AND condition] THEN action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotMatchedClause {
    /// Extra condition over the source row.
    #[serde(default)]
    pub condition: Option<Expr>,
    /// Action to apply.
    pub action: NotMatchedAction,
}

/// The join condition and clauses of a MERGE.
///
/// Clauses are tried in order; the first whose condition holds wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeSpec {
    /// Join condition between target and source rows.
    pub on: Expr,
    /// `WHEN MATCHED` clauses.
    #[serde(default)]
    pub when_matched: Vec<MatchedClause>,
    /// `WHEN NOT MATCHED` clauses.
    #[serde(default)]
    pub when_not_matched: Vec<NotMatchedClause>,
}

impl MergeSpec {
    /// A MERGE joining on `on`, with no clauses yet.
    pub fn new(on: Expr) -> Self {
        Self {
            on,
            when_matched: Vec::new(),
            when_not_matched: Vec::new(),
        }
    }

    /// Add `WHEN MATCHED [AND condition] THEN UPDATE SET ...`.
    pub fn when_matched_update(
        mut self,
        condition: Option<Expr>,
        assignments: Vec<Assignment>,
    ) -> Self {
        self.when_matched.push(MatchedClause {
            condition,
            action: MatchedAction::Update(assignments),
        });
        self
    }

    /// Add `WHEN MATCHED [AND condition] THEN UPDATE SET *`.
    pub fn when_matched_update_all(mut self, condition: Option<Expr>) -> Self {
        self.when_matched.push(MatchedClause {
            condition,
            action: MatchedAction::UpdateAll,
        });
        self
    }

    /// Add `WHEN MATCHED [AND condition] THEN DELETE`.
    pub fn when_matched_delete(mut self, condition: Option<Expr>) -> Self {
        self.when_matched.push(MatchedClause {
            condition,
            action: MatchedAction::Delete,
        });
        self
    }

    /// Add `WHEN NOT MATCHED [AND condition] THEN INSERT ...`.
    pub fn when_not_matched_insert(
        mut self,
        condition: Option<Expr>,
        assignments: Vec<Assignment>,
    ) -> Self {
        self.when_not_matched.push(NotMatchedClause {
            condition,
            action: NotMatchedAction::Insert(assignments),
        });
        self
    }

    /// Add `WHEN NOT MATCHED [AND condition] THEN INSERT *`.
    pub fn when_not_matched_insert_all(mut self, condition: Option<Expr>) -> Self {
        self.when_not_matched.push(NotMatchedClause {
            condition,
            action: NotMatchedAction::InsertAll,
        });
        self
    }

    fn validate(&self, ctx: &PlanContext<'_>) -> Result<(), TableError> {
        ensure!(
            !self.when_matched.is_empty() || !self.when_not_matched.is_empty(),
            InvalidMergeSnafu {
                reason: "at least one WHEN clause is required",
            }
        );
        ctx.check_columns(self.on.target_columns(), "MERGE ON")?;

        for clause in &self.when_matched {
            if let Some(c) = &clause.condition {
                ctx.check_columns(c.target_columns(), "WHEN MATCHED")?;
            }
            if let MatchedAction::Update(assignments) = &clause.action {
                ctx.check_columns(assignments.iter().map(|a| a.column.as_str()), "UPDATE SET")?;
                for a in assignments {
                    ctx.check_columns(a.value.target_columns(), "UPDATE SET")?;
                }
            }
        }

        for clause in &self.when_not_matched {
            let mut exprs: Vec<&Expr> = clause.condition.iter().collect();
            if let NotMatchedAction::Insert(assignments) = &clause.action {
                ctx.check_columns(assignments.iter().map(|a| a.column.as_str()), "INSERT")?;
                exprs.extend(assignments.iter().map(|a| &a.value));
            }
            if let Some(column) = exprs.iter().flat_map(|e| e.target_columns()).next() {
                return InvalidMergeSnafu {
                    reason: format!(
                        "WHEN NOT MATCHED clauses cannot reference target column {column}"
                    ),
                }
                .fail();
            }
        }
        Ok(())
    }
}

/// Range of the non-null source values of `column`, if they are mutually
/// comparable. `Some(None)` means every value is NULL.
fn source_range(source: &[Row], column: &str) -> Option<Option<(Value, Value)>> {
    let mut range: Option<(&Value, &Value)> = None;
    for value in source.iter().map(|r| r.get(column)).filter(|v| !v.is_null()) {
        range = Some(match range {
            None => (value, value),
            Some((lo, hi)) => {
                let lo_cmp = value.compare(lo)?;
                let hi_cmp = value.compare(hi)?;
                (
                    if lo_cmp == Ordering::Less { value } else { lo },
                    if hi_cmp == Ordering::Greater { value } else { hi },
                )
            }
        });
    }
    Some(range.map(|(lo, hi)| (lo.clone(), hi.clone())))
}

/// A target-only predicate every matching target row satisfies, or `None`
/// when `on` gives nothing to prune with.
pub(crate) fn target_filter(on: &Expr, source: &[Row]) -> Option<Expr> {
    let mut terms = Vec::new();
    for term in on.conjuncts() {
        if term.source_columns().is_empty() {
            if !term.target_columns().is_empty() {
                terms.push(term.clone());
            }
            continue;
        }
        let (t, s) = match term {
            Expr::Eq(a, b) => match (a.as_ref(), b.as_ref()) {
                (Expr::Column(t), Expr::Source(s)) | (Expr::Source(s), Expr::Column(t)) => (t, s),
                _ => continue,
            },
            _ => continue,
        };
        match source_range(source, s) {
            None => {}
            // NULL never equals anything.
            Some(None) => terms.push(lit(false)),
            Some(Some((lo, hi))) => {
                terms.push(col(t.clone()).gt_eq(lit(lo)).and(col(t.clone()).lt_eq(lit(hi))));
            }
        }
    }
    terms.into_iter().reduce(Expr::and)
}

fn clause_holds(condition: Option<&Expr>, ctx: &EvalContext<'_>) -> Result<bool, TableError> {
    match condition {
        None => Ok(true),
        Some(c) => c.eval_predicate(ctx).context(ExpressionSnafu),
    }
}

fn copy_from_source(ctx: &PlanContext<'_>, source: &Row) -> Row {
    ctx.schema()
        .column_names()
        .map(|c| (c, source.get(c).clone()))
        .collect()
}

pub(crate) async fn plan_merge(
    ctx: PlanContext<'_>,
    source: &[Row],
    spec: &MergeSpec,
) -> Result<MutationPlan, TableError> {
    spec.validate(&ctx)?;

    let operation = Operation::new(OperationKind::Merge)
        .with_param("predicate", &spec.on)
        .with_param("matchedClauses", spec.when_matched.len())
        .with_param("notMatchedClauses", spec.when_not_matched.len())
        .with_param("sourceRows", source.len());
    let mut plan = MutationPlan::new(operation, ctx.snapshot.version);
    // Inserts rely on no other writer adding a matching target row.
    plan.footprint.reads_whole_table = !spec.when_not_matched.is_empty();
    if source.is_empty() {
        return Ok(plan);
    }

    let filter = target_filter(&spec.on, source);
    let candidates: Vec<_> = ctx
        .snapshot
        .live_files()
        .filter(|f| filter.as_ref().is_none_or(|p| may_match(p, &f.stats)))
        .collect();

    let mut source_matched = vec![false; source.len()];
    for file in candidates {
        plan.note_read(file);
        let rows = ctx.read_rows(file).await?;
        let mut out = Vec::with_capacity(rows.len());
        let (mut updated, mut deleted) = (0u64, 0u64);

        for row in rows {
            let mut matches = 0usize;
            let mut firing = Vec::new();
            for (i, s) in source.iter().enumerate() {
                let joined = EvalContext::joined(&row, s);
                if !spec.on.eval_predicate(&joined).context(ExpressionSnafu)? {
                    continue;
                }
                matches += 1;
                source_matched[i] = true;
                for clause in &spec.when_matched {
                    if clause_holds(clause.condition.as_ref(), &joined)? {
                        firing.push((s, clause));
                        break;
                    }
                }
            }

            ensure!(
                firing.len() <= 1,
                AmbiguousMergeMatchSnafu {
                    path: file.path.clone(),
                    target_row: serde_json::to_string(&row).unwrap_or_else(|_| format!("{row:?}")),
                    matches,
                }
            );

            match firing.pop() {
                None => out.push(row),
                Some((s, clause)) => match &clause.action {
                    MatchedAction::Update(assignments) => {
                        let joined = EvalContext::joined(&row, s);
                        let new_row = apply_assignments(assignments, &joined, &row)?;
                        out.push(ctx.conform(&new_row)?);
                        updated += 1;
                    }
                    MatchedAction::UpdateAll => {
                        out.push(ctx.conform(&copy_from_source(&ctx, s))?);
                        updated += 1;
                    }
                    MatchedAction::Delete => deleted += 1,
                },
            }
        }

        if updated + deleted == 0 {
            continue;
        }
        plan.remove(file, ctx.now, true);
        plan.adds.extend(ctx.write_rows(ctx.schema(), &out).await?);
        plan.metrics.num_updated_rows += updated;
        plan.metrics.num_deleted_rows += deleted;
        plan.metrics.num_copied_rows += out.len() as u64 - updated;
    }

    let mut inserts = Vec::new();
    for (s, _) in source.iter().zip(&source_matched).filter(|(_, m)| !**m) {
        let sctx = EvalContext::source(s);
        for clause in &spec.when_not_matched {
            if !clause_holds(clause.condition.as_ref(), &sctx)? {
                continue;
            }
            let row = match &clause.action {
                NotMatchedAction::Insert(assignments) => {
                    apply_assignments(assignments, &sctx, &Row::new())?
                }
                NotMatchedAction::InsertAll => copy_from_source(&ctx, s),
            };
            inserts.push(ctx.conform(&row)?);
            break;
        }
    }
    plan.adds.extend(ctx.write_rows(ctx.schema(), &inserts).await?);
    plan.metrics.num_inserted_rows = inserts.len() as u64;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::src;

    fn source(ids: &[Value]) -> Vec<Row> {
        ids.iter().map(|v| [("id", v.clone())].into_iter().collect()).collect()
    }

    #[test]
    fn equality_terms_become_source_ranges() {
        let on = col("id").eq(src("id"));
        let rows = source(&[Value::Int(7), Value::Null, Value::Int(3), Value::Int(5)]);
        assert_eq!(
            target_filter(&on, &rows),
            Some(col("id").gt_eq(lit(3i64)).and(col("id").lt_eq(lit(7i64))))
        );
    }

    #[test]
    fn all_null_keys_prune_everything_and_target_terms_are_kept() {
        let on = src("id")
            .eq(col("id"))
            .and(col("region").eq(lit("eu")));
        let rows = source(&[Value::Null]);
        assert_eq!(
            target_filter(&on, &rows),
            Some(lit(false).and(col("region").eq(lit("eu"))))
        );
    }

    #[test]
    fn non_equi_or_incomparable_keys_do_not_prune() {
        let rows = source(&[Value::Int(1), Value::from("x")]);
        assert_eq!(target_filter(&col("id").eq(src("id")), &rows), None);
        assert_eq!(target_filter(&col("id").lt(src("id")), &rows), None);
    }

    #[test]
    fn merge_spec_reads_from_json() {
        let json = r#"{
            "on": {"eq": [{"column": "id"}, {"source": "id"}]},
            "when_matched": [{"action": "update_all"}],
            "when_not_matched": [{"action": "insert_all"}]
        }"#;
        let spec: MergeSpec = serde_json::from_str(json).expect("valid merge json");
        assert_eq!(
            spec,
            MergeSpec::new(col("id").eq(src("id")))
                .when_matched_update_all(None)
                .when_not_matched_insert_all(None)
        );
    }
}
