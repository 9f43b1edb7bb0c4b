//! CLI tool for managing lakehouse tables.

mod error;
mod input;
mod output;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use lakehouse_table_core::{
    Table, TableError,
    metadata::TableProperties,
    optimize::OptimizeOptions,
    retention::VacuumOptions,
    storage::TableLocation,
    table::{CreateOptions, TableOptions},
};
use log::debug;
use snafu::{IntoError, ResultExt};

use crate::{
    error::{CliError, CliResult, OpenTableSnafu, OperationSnafu, StorageSnafu},
    input::{
        parse_assignment, parse_expr, parse_schema, read_merge_spec, read_rows, version_spec,
    },
    output::{print_detail, print_history, print_outcome, print_rows, print_vacuum},
};

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a table (CREATE TABLE, or CREATE OR REPLACE TABLE with --replace)
    Create {
        #[arg(long)]
        table: PathBuf,

        /// Repeatable column spec: name:type, '?' suffix for nullable
        /// (types: bool, int32, int64, float64, utf8, timestamp)
        #[arg(long = "column", required = true)]
        columns: Vec<String>,

        #[arg(long)]
        description: Option<String>,

        /// Replace an existing table instead of failing
        #[arg(long, default_value_t = false)]
        replace: bool,

        /// Optional JSON-lines file of initial rows
        #[arg(long)]
        rows: Option<PathBuf>,

        /// Safety floor for VACUUM retention, in hours
        #[arg(long = "retention-hours")]
        retention_hours: Option<u64>,

        /// Target data file size in bytes
        #[arg(long = "target-file-size")]
        target_file_size: Option<u64>,

        /// Checkpoint every N commits (0 disables checkpoints)
        #[arg(long = "checkpoint-interval")]
        checkpoint_interval: Option<u64>,
    },

    /// Append rows from a JSON-lines file
    Insert {
        #[arg(long)]
        table: PathBuf,

        #[arg(long)]
        rows: PathBuf,

        /// Replace the table contents (INSERT OVERWRITE)
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },

    /// UPDATE ... SET ... [WHERE ...]
    Update {
        #[arg(long)]
        table: PathBuf,

        /// Repeatable: column=<JSON value or expression>
        #[arg(long = "set", required = true)]
        set: Vec<String>,

        /// Predicate as a JSON expression
        #[arg(long = "where")]
        predicate: Option<String>,
    },

    /// DELETE FROM ... [WHERE ...]
    Delete {
        #[arg(long)]
        table: PathBuf,

        /// Predicate as a JSON expression; omitted deletes every row
        #[arg(long = "where")]
        predicate: Option<String>,
    },

    /// MERGE INTO the table from a JSON-lines source
    Merge {
        #[arg(long)]
        table: PathBuf,

        #[arg(long)]
        source: PathBuf,

        /// JSON file with the ON condition and WHEN clauses
        #[arg(long)]
        spec: PathBuf,
    },

    /// Compact small files, optionally clustering with ZORDER BY
    Optimize {
        #[arg(long)]
        table: PathBuf,

        /// Repeatable clustering column
        #[arg(long = "zorder")]
        zorder: Vec<String>,

        #[arg(long = "target-file-size")]
        target_file_size: Option<u64>,

        #[arg(long = "min-file-size")]
        min_file_size: Option<u64>,
    },

    /// Delete unreferenced data files older than the retention window
    Vacuum {
        #[arg(long)]
        table: PathBuf,

        /// Retention in hours (default: the table's retention property)
        #[arg(long = "retain-hours")]
        retain_hours: Option<u64>,

        #[arg(long = "dry-run", default_value_t = false)]
        dry_run: bool,

        /// Accept a retention below the table's safety floor
        #[arg(long = "allow-unsafe", default_value_t = false)]
        allow_unsafe: bool,

        /// Disable the retention duration check for this handle
        #[arg(long = "no-retention-check", default_value_t = false)]
        no_retention_check: bool,
    },

    /// RESTORE the table to an earlier version or timestamp
    Restore {
        #[arg(long)]
        table: PathBuf,

        #[arg(long, conflicts_with = "timestamp", required_unless_present = "timestamp")]
        version: Option<u64>,

        /// RFC 3339 timestamp
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Print rows as JSON lines, optionally time travelling
    Scan {
        #[arg(long)]
        table: PathBuf,

        #[arg(long, conflicts_with = "timestamp")]
        version: Option<u64>,

        #[arg(long)]
        timestamp: Option<String>,

        /// Predicate as a JSON expression
        #[arg(long = "where")]
        predicate: Option<String>,
    },

    /// DESCRIBE HISTORY, newest first
    History {
        #[arg(long)]
        table: PathBuf,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// DESCRIBE DETAIL
    Detail {
        #[arg(long)]
        table: PathBuf,
    },

    /// Clone a snapshot of the table into a new location
    Clone {
        #[arg(long)]
        table: PathBuf,

        #[arg(long)]
        target: PathBuf,

        /// Reference the source files instead of copying them
        #[arg(long, default_value_t = false)]
        shallow: bool,

        #[arg(long, conflicts_with = "timestamp")]
        version: Option<u64>,

        #[arg(long)]
        timestamp: Option<String>,
    },
}

#[derive(Debug, Parser)]
#[command(name = "lhtable", version, about = "Transactional tables over plain files")]
struct Cli {
    /// Re-plan a conflicting write at most this many times
    #[arg(long = "max-commit-retries", global = true)]
    max_commit_retries: Option<u32>,

    #[command(subcommand)]
    cmd: Command,
}

fn table_location(table: &Path) -> CliResult<TableLocation> {
    TableLocation::parse(table.to_string_lossy().as_ref()).context(StorageSnafu {
        table: table.display().to_string(),
    })
}

async fn open_table(table: &Path, options: TableOptions) -> CliResult<Table> {
    let location = table_location(table)?;
    let handle = Table::open(location).await.context(OpenTableSnafu {
        table: table.display().to_string(),
    })?;
    Ok(handle.with_options(options))
}

fn failed(operation: &'static str, table: &Path) -> impl FnOnce(TableError) -> CliError {
    let table = table.display().to_string();
    move |source| OperationSnafu { operation, table }.into_error(source)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_create(
    table: &Path,
    columns: &[String],
    description: Option<String>,
    replace: bool,
    rows: Option<&Path>,
    retention_hours: Option<u64>,
    target_file_size: Option<u64>,
    checkpoint_interval: Option<u64>,
) -> CliResult<()> {
    let schema = parse_schema(columns)?;
    let defaults = TableProperties::default();
    let options = CreateOptions {
        properties: TableProperties {
            deleted_file_retention_hours: retention_hours
                .unwrap_or(defaults.deleted_file_retention_hours),
            target_file_size: target_file_size.unwrap_or(defaults.target_file_size),
            checkpoint_interval: checkpoint_interval.unwrap_or(defaults.checkpoint_interval),
        },
        description,
    };
    let rows = match rows {
        Some(path) => read_rows(path).await?,
        None => Vec::new(),
    };

    let handle = Table::new(table_location(table)?);
    let outcome = if replace {
        handle
            .create_or_replace(schema, options, rows)
            .await
            .map_err(failed("CREATE OR REPLACE TABLE", table))?
    } else {
        let outcome = handle
            .create(schema, options)
            .await
            .map_err(failed("CREATE TABLE", table))?;
        if rows.is_empty() {
            outcome
        } else {
            handle
                .insert(rows)
                .await
                .map_err(failed("INSERT", table))?
        }
    };

    println!(
        "Created table at {} (version {})",
        table.display(),
        outcome.version
    );
    Ok(())
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let mut options = TableOptions::default();
    if let Some(retries) = cli.max_commit_retries {
        options.max_commit_retries = retries;
    }
    debug!("running {:?}", cli.cmd);

    match cli.cmd {
        Command::Create {
            table,
            columns,
            description,
            replace,
            rows,
            retention_hours,
            target_file_size,
            checkpoint_interval,
        } => {
            cmd_create(
                &table,
                &columns,
                description,
                replace,
                rows.as_deref(),
                retention_hours,
                target_file_size,
                checkpoint_interval,
            )
            .await
        }

        Command::Insert {
            table,
            rows,
            overwrite,
        } => {
            let handle = open_table(&table, options).await?;
            let rows = read_rows(&rows).await?;
            if overwrite {
                let outcome = handle
                    .insert_overwrite(rows)
                    .await
                    .map_err(failed("INSERT OVERWRITE", &table))?;
                print_outcome("INSERT OVERWRITE", &outcome)
            } else {
                let outcome = handle
                    .insert(rows)
                    .await
                    .map_err(failed("INSERT", &table))?;
                print_outcome("INSERT", &outcome)
            }
        }

        Command::Update {
            table,
            set,
            predicate,
        } => {
            let handle = open_table(&table, options).await?;
            let assignments = set
                .iter()
                .map(|s| parse_assignment(s))
                .collect::<CliResult<Vec<_>>>()?;
            let predicate = predicate
                .as_deref()
                .map(|p| parse_expr("--where", p))
                .transpose()?;
            let outcome = handle
                .update(predicate.as_ref(), &assignments)
                .await
                .map_err(failed("UPDATE", &table))?;
            print_outcome("UPDATE", &outcome)
        }

        Command::Delete { table, predicate } => {
            let handle = open_table(&table, options).await?;
            let predicate = predicate
                .as_deref()
                .map(|p| parse_expr("--where", p))
                .transpose()?;
            let outcome = handle
                .delete(predicate.as_ref())
                .await
                .map_err(failed("DELETE", &table))?;
            print_outcome("DELETE", &outcome)
        }

        Command::Merge {
            table,
            source,
            spec,
        } => {
            let handle = open_table(&table, options).await?;
            let source = read_rows(&source).await?;
            let spec = read_merge_spec(&spec).await?;
            let outcome = handle
                .merge(&source, &spec)
                .await
                .map_err(failed("MERGE", &table))?;
            print_outcome("MERGE", &outcome)
        }

        Command::Optimize {
            table,
            zorder,
            target_file_size,
            min_file_size,
        } => {
            let handle = open_table(&table, options).await?;
            let optimize = OptimizeOptions {
                target_file_size,
                min_file_size,
                zorder_by: zorder,
            };
            let outcome = handle
                .optimize(&optimize)
                .await
                .map_err(failed("OPTIMIZE", &table))?;
            print_outcome("OPTIMIZE", &outcome)
        }

        Command::Vacuum {
            table,
            retain_hours,
            dry_run,
            allow_unsafe,
            no_retention_check,
        } => {
            options.retention_duration_check = !no_retention_check;
            let handle = open_table(&table, options).await?;
            let vacuum = VacuumOptions {
                retention_hours: retain_hours,
                dry_run,
                allow_unsafe_retention: allow_unsafe,
            };
            let report = handle
                .vacuum(vacuum)
                .await
                .map_err(failed("VACUUM", &table))?;
            print_vacuum(&report);
            Ok(())
        }

        Command::Restore {
            table,
            version,
            timestamp,
        } => {
            let handle = open_table(&table, options).await?;
            let spec = version_spec(version, timestamp.as_deref())?;
            let outcome = handle
                .restore(spec)
                .await
                .map_err(failed("RESTORE", &table))?;
            print_outcome("RESTORE", &outcome)
        }

        Command::Scan {
            table,
            version,
            timestamp,
            predicate,
        } => {
            let handle = open_table(&table, options).await?;
            let spec = version_spec(version, timestamp.as_deref())?;
            let predicate = predicate
                .as_deref()
                .map(|p| parse_expr("--where", p))
                .transpose()?;
            let rows = handle
                .scan_where(spec, predicate.as_ref())
                .await
                .map_err(failed("SCAN", &table))?;
            print_rows(&rows)
        }

        Command::History { table, limit } => {
            let handle = open_table(&table, options).await?;
            let entries = handle
                .history(limit)
                .await
                .map_err(failed("DESCRIBE HISTORY", &table))?;
            print_history(&entries)
        }

        Command::Detail { table } => {
            let handle = open_table(&table, options).await?;
            let detail = handle
                .detail()
                .await
                .map_err(failed("DESCRIBE DETAIL", &table))?;
            print_detail(&detail)
        }

        Command::Clone {
            table,
            target,
            shallow,
            version,
            timestamp,
        } => {
            let handle = open_table(&table, options).await?;
            let spec = version_spec(version, timestamp.as_deref())?;
            let target_location = table_location(&target)?;
            let (kind, result) = if shallow {
                ("SHALLOW CLONE", handle.shallow_clone(target_location, spec).await)
            } else {
                ("DEEP CLONE", handle.deep_clone(target_location, spec).await)
            };
            result.map_err(failed(kind, &table))?;
            println!(
                "{kind} of {} at {spec} written to {}",
                table.display(),
                target.display()
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
