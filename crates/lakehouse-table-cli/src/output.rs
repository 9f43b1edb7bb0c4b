//! Rendering of operation results to stdout.
use lakehouse_table_core::{
    retention::VacuumReport,
    table::{CommitOutcome, HistoryEntry, TableDetail},
    value::Row,
};
use snafu::ResultExt;

use crate::error::{CliResult, RenderOutputSnafu};

pub fn print_outcome(operation: &str, outcome: &CommitOutcome) -> CliResult<()> {
    if outcome.committed {
        let metrics = serde_json::to_string(&outcome.metrics).context(RenderOutputSnafu)?;
        println!("{operation} committed version {}", outcome.version);
        println!("{metrics}");
    } else {
        println!(
            "{operation}: nothing to commit (table at version {})",
            outcome.version
        );
    }
    Ok(())
}

pub fn print_rows(rows: &[Row]) -> CliResult<()> {
    for row in rows {
        println!("{}", serde_json::to_string(row).context(RenderOutputSnafu)?);
    }
    Ok(())
}

pub fn print_history(entries: &[HistoryEntry]) -> CliResult<()> {
    for entry in entries {
        println!("{}", serde_json::to_string(entry).context(RenderOutputSnafu)?);
    }
    Ok(())
}

pub fn print_detail(detail: &TableDetail) -> CliResult<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(detail).context(RenderOutputSnafu)?
    );
    Ok(())
}

pub fn print_vacuum(report: &VacuumReport) {
    if report.dry_run {
        println!(
            "VACUUM DRY RUN: {} files would be deleted (retention {}h, threshold {})",
            report.candidates.len(),
            report.retention_hours,
            report.threshold.to_rfc3339()
        );
        for path in &report.candidates {
            println!("{path}");
        }
        return;
    }
    println!(
        "VACUUM deleted {} files (retention {}h, threshold {})",
        report.deleted.len(),
        report.retention_hours,
        report.threshold.to_rfc3339()
    );
    for path in &report.deleted {
        println!("{path}");
    }
    if !report.skipped.is_empty() {
        eprintln!(
            "{} files were re-referenced by concurrent commits and kept",
            report.skipped.len()
        );
    }
    if !report.vanished.is_empty() {
        eprintln!(
            "{} files were already gone from storage",
            report.vanished.len()
        );
    }
}
