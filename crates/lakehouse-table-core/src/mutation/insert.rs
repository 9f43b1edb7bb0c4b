//! INSERT and INSERT OVERWRITE planning.
use snafu::prelude::*;

use crate::{
    metadata::{LogicalSchema, TableMeta, conform_rows, ensure_schema_exact_match},
    mutation::{MutationPlan, PlanContext, RowBatch},
    table::{
        CreateOptions,
        error::{SchemaMismatchSnafu, TableError},
    },
    transaction_log::{Operation, OperationKind, TxnFootprint},
};

/// Append `batch` as new files. An empty batch plans nothing.
pub(crate) async fn plan_insert(
    ctx: PlanContext<'_>,
    batch: &RowBatch,
) -> Result<MutationPlan, TableError> {
    let schema = ctx.schema();
    if let Some(incoming) = &batch.schema {
        ensure_schema_exact_match(schema, incoming).context(SchemaMismatchSnafu)?;
    }
    let rows = conform_rows(schema, &batch.rows).context(SchemaMismatchSnafu)?;

    let operation = Operation::new(OperationKind::Insert).with_param("mode", "Append");
    let mut plan = MutationPlan::new(operation, ctx.snapshot.version);
    plan.footprint = TxnFootprint::blind_append(ctx.snapshot.version);
    plan.adds = ctx.write_rows(schema, &rows).await?;
    plan.metrics.num_inserted_rows = rows.len() as u64;
    Ok(plan)
}

/// Replace the whole table content with `batch`.
///
/// A declared schema different from the table's is installed along with the
/// data; otherwise the current schema stays. An empty batch truncates.
pub(crate) async fn plan_overwrite(
    ctx: PlanContext<'_>,
    batch: &RowBatch,
) -> Result<MutationPlan, TableError> {
    let current = &ctx.snapshot.table_meta;
    let new_meta = match &batch.schema {
        Some(schema) if schema != current.schema() => Some(current.with_schema(schema.clone())),
        _ => None,
    };
    let schema = new_meta
        .as_ref()
        .map_or(current.schema(), |meta| meta.schema());
    let rows = conform_rows(schema, &batch.rows).context(SchemaMismatchSnafu)?;

    let operation = Operation::new(OperationKind::InsertOverwrite)
        .with_param("mode", "Overwrite")
        .with_param("schemaChanged", new_meta.is_some());
    let mut plan = MutationPlan::new(operation, ctx.snapshot.version);
    plan.footprint.reads_whole_table = true;

    for file in ctx.snapshot.live_files() {
        plan.remove(file, ctx.now, true);
        plan.metrics.num_deleted_rows += file.num_records();
    }
    plan.adds = ctx.write_rows(schema, &rows).await?;
    plan.metrics.num_inserted_rows = rows.len() as u64;
    plan.new_meta = new_meta;
    Ok(plan)
}

/// CREATE OR REPLACE on an existing table: new schema and properties, every
/// current file removed, `batch` as the new content. History is kept, and
/// so is the description unless a new one is given.
pub(crate) async fn plan_replace(
    ctx: PlanContext<'_>,
    schema: &LogicalSchema,
    options: &CreateOptions,
    batch: &RowBatch,
) -> Result<MutationPlan, TableError> {
    let current = &ctx.snapshot.table_meta;
    let mut meta = TableMeta::new(schema.clone(), current.created_at())
        .with_properties(options.properties.clone());
    if let Some(description) = options.description.as_deref().or(current.description()) {
        meta = meta.with_description(description);
    }
    let rows = conform_rows(schema, &batch.rows).context(SchemaMismatchSnafu)?;

    let mut plan = MutationPlan::new(
        Operation::new(OperationKind::ReplaceTable).with_param("schema", schema),
        ctx.snapshot.version,
    );
    plan.footprint.reads_whole_table = true;
    for file in ctx.snapshot.live_files() {
        plan.remove(file, ctx.now, true);
        plan.metrics.num_deleted_rows += file.num_records();
    }
    plan.adds = ctx.write_rows(schema, &rows).await?;
    plan.metrics.num_inserted_rows = rows.len() as u64;
    plan.new_meta = Some(meta);
    Ok(plan)
}
