//! Parsing of command-line values and input files.
use std::path::Path;

use chrono::{DateTime, Utc};
use lakehouse_table_core::{
    expr::{Expr, lit},
    metadata::{LogicalColumn, LogicalDataType, LogicalSchema},
    mutation::{Assignment, MergeSpec},
    transaction_log::VersionSpec,
    value::{Row, Value},
};
use snafu::ResultExt;
use tokio::fs;

use crate::error::{
    CliResult, InvalidAssignmentSnafu, InvalidColumnSnafu, InvalidJsonSnafu, InvalidSchemaSnafu,
    InvalidTimestampSnafu, ReadInputSnafu,
};

fn parse_data_type(spec: &str, name: &str) -> CliResult<LogicalDataType> {
    let data_type = match name.to_ascii_lowercase().as_str() {
        "bool" | "boolean" => LogicalDataType::Bool,
        "int" | "int32" => LogicalDataType::Int32,
        "bigint" | "long" | "int64" => LogicalDataType::Int64,
        "double" | "float" | "float64" => LogicalDataType::Float64,
        "string" | "utf8" => LogicalDataType::Utf8,
        "timestamp" => LogicalDataType::Timestamp,
        other => {
            return InvalidColumnSnafu {
                spec,
                reason: format!("unknown type {other}"),
            }
            .fail();
        }
    };
    Ok(data_type)
}

/// `name:type` or `name:type?`.
pub fn parse_column(spec: &str) -> CliResult<LogicalColumn> {
    let Some((name, ty)) = spec.split_once(':') else {
        return InvalidColumnSnafu {
            spec,
            reason: "missing ':'",
        }
        .fail();
    };
    let (ty, nullable) = match ty.strip_suffix('?') {
        Some(ty) => (ty, true),
        None => (ty, false),
    };
    let data_type = parse_data_type(spec, ty.trim())?;
    Ok(LogicalColumn::new(name.trim(), data_type, nullable))
}

pub fn parse_schema(columns: &[String]) -> CliResult<LogicalSchema> {
    let columns = columns
        .iter()
        .map(|c| parse_column(c))
        .collect::<CliResult<Vec<_>>>()?;
    LogicalSchema::new(columns).context(InvalidSchemaSnafu)
}

pub fn parse_expr(what: &str, json: &str) -> CliResult<Expr> {
    serde_json::from_str(json).context(InvalidJsonSnafu { what })
}

/// `column=<value>` where the value is either an expression in its JSON
/// form or a plain JSON scalar taken as a literal.
pub fn parse_assignment(spec: &str) -> CliResult<Assignment> {
    let Some((column, value)) = spec.split_once('=') else {
        return InvalidAssignmentSnafu { spec }.fail();
    };
    let column = column.trim();
    if column.is_empty() {
        return InvalidAssignmentSnafu { spec }.fail();
    }
    let value = match serde_json::from_str::<Expr>(value) {
        Ok(expr) => expr,
        Err(_) => lit(
            serde_json::from_str::<Value>(value).context(InvalidJsonSnafu {
                what: format!("--set value for {column}"),
            })?,
        ),
    };
    Ok(Assignment::new(column, value))
}

pub fn version_spec(version: Option<u64>, timestamp: Option<&str>) -> CliResult<VersionSpec> {
    match (version, timestamp) {
        (Some(v), _) => Ok(VersionSpec::Version(v)),
        (None, Some(ts)) => {
            let parsed = DateTime::parse_from_rfc3339(ts)
                .context(InvalidTimestampSnafu { value: ts })?;
            Ok(VersionSpec::Timestamp(parsed.with_timezone(&Utc)))
        }
        (None, None) => Ok(VersionSpec::Latest),
    }
}

async fn read_file(path: &Path) -> CliResult<String> {
    fs::read_to_string(path).await.context(ReadInputSnafu {
        path: path.display().to_string(),
    })
}

/// One JSON object per non-blank line.
pub async fn read_rows(path: &Path) -> CliResult<Vec<Row>> {
    let text = read_file(path).await?;
    let mut rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(line).context(InvalidJsonSnafu {
            what: format!("row on line {} of {}", i + 1, path.display()),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

pub async fn read_merge_spec(path: &Path) -> CliResult<MergeSpec> {
    let text = read_file(path).await?;
    serde_json::from_str(&text).context(InvalidJsonSnafu {
        what: format!("MERGE spec in {}", path.display()),
    })
}
