#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::Utc;
use lakehouse_table_core::{
    Table,
    clock::ManualClock,
    exec::{DataFileError, DataFileIo, JsonLinesFileIo},
    metadata::{LogicalColumn, LogicalDataType, LogicalSchema},
    storage::TableLocation,
    table::CreateOptions,
    transaction_log::{AddFile, VersionSpec},
    value::{Row, Value},
};
use tempfile::TempDir;
use tokio::sync::Notify;

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn people_schema() -> TestResult<LogicalSchema> {
    Ok(LogicalSchema::new(vec![
        LogicalColumn::new("id", LogicalDataType::Int64, false),
        LogicalColumn::new("name", LogicalDataType::Utf8, true),
        LogicalColumn::new("salary", LogicalDataType::Int64, true),
    ])?)
}

pub fn person(id: i64, name: &str, salary: Option<i64>) -> Row {
    [
        ("id", Value::from(id)),
        ("name", Value::from(name)),
        ("salary", salary.map_or(Value::Null, Value::from)),
    ]
    .into_iter()
    .collect()
}

/// A people table under `tmp/name`, driven by a manual clock that starts at
/// the current wall-clock time.
pub async fn people_table(tmp: &TempDir, name: &str) -> TestResult<(Table, ManualClock)> {
    let clock = ManualClock::new(Utc::now());
    let table = Table::new(TableLocation::local(tmp.path().join(name)))
        .with_clock(Arc::new(clock.clone()));
    table
        .create(people_schema()?, CreateOptions::default())
        .await?;
    Ok((table, clock))
}

pub async fn live_paths(table: &Table, spec: VersionSpec) -> TestResult<BTreeSet<String>> {
    Ok(table.snapshot_at(spec).await?.live_paths())
}

/// Rows of a snapshot ordered by id.
pub async fn sorted_rows(table: &Table, spec: VersionSpec) -> TestResult<Vec<Row>> {
    let mut rows = table.scan(spec).await?;
    rows.sort_by(|a, b| a.get("id").total_cmp(b.get("id")));
    Ok(rows)
}

/// Parks the first data file write until [`PausingIo::resume`] is called,
/// so another handle can commit while a plan is in flight. Later writes go
/// straight through.
#[derive(Debug)]
pub struct PausingIo {
    inner: JsonLinesFileIo,
    armed: AtomicBool,
    paused: Notify,
    resumed: Notify,
}

impl PausingIo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: JsonLinesFileIo,
            armed: AtomicBool::new(true),
            paused: Notify::new(),
            resumed: Notify::new(),
        })
    }

    /// Wait until a writer is parked.
    pub async fn wait_paused(&self) {
        self.paused.notified().await;
    }

    pub fn resume(&self) {
        self.resumed.notify_one();
    }
}

#[async_trait::async_trait]
impl DataFileIo for PausingIo {
    async fn read_rows(
        &self,
        location: &TableLocation,
        file: &AddFile,
    ) -> Result<Vec<Row>, DataFileError> {
        self.inner.read_rows(location, file).await
    }

    async fn write_rows(
        &self,
        location: &TableLocation,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<AddFile, DataFileError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.paused.notify_one();
            self.resumed.notified().await;
        }
        self.inner.write_rows(location, schema, rows).await
    }

    fn estimate_row_size(&self, row: &Row) -> u64 {
        self.inner.estimate_row_size(row)
    }
}
