#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use chrono::Duration;
use lakehouse_table_core::{
    Table, TableError,
    exec::{DataFileError, DataFileIo, JsonLinesFileIo},
    expr::{col, lit},
    metadata::LogicalSchema,
    mutation::Assignment,
    storage::TableLocation,
    table::TableOptions,
    transaction_log::{AddFile, VersionSpec, table_state::replay},
    value::Row,
};
use tempfile::TempDir;
use tokio::sync::Barrier;

use common::{PausingIo, TestResult, live_paths, people_table, person, sorted_rows};

/// Builds a table with a mix of inserts, updates and deletes; returns the
/// handle and its head.
async fn busy_table(tmp: &TempDir) -> TestResult<(Table, u64)> {
    let (table, clock) = people_table(tmp, "busy").await?;
    for id in 1..=4 {
        clock.advance(Duration::minutes(1));
        table
            .insert(vec![person(id, &format!("p{id}"), Some(id * 100))])
            .await?;
    }
    clock.advance(Duration::minutes(1));
    table
        .update(
            Some(&col("id").eq(lit(2i64))),
            &[Assignment::new("salary", col("salary").add(lit(1i64)))],
        )
        .await?;
    clock.advance(Duration::minutes(1));
    table.delete(Some(&col("id").eq(lit(3i64)))).await?;
    let head = table.version().await?;
    Ok((table, head))
}

#[tokio::test]
async fn later_snapshots_equal_earlier_ones_plus_the_commits_between() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, head) = busy_table(&tmp).await?;
    assert_eq!(head, 7);

    for v1 in 1..head {
        for v2 in v1 + 1..=head {
            let base = table.snapshot_at(VersionSpec::Version(v1)).await?;
            let commits = table.log().load_commits(v1 + 1, v2).await?;
            let derived = replay(Some((*base).clone()), &commits)?;
            let direct = table.snapshot_at(VersionSpec::Version(v2)).await?;
            assert_eq!(&derived, direct.as_ref(), "v1={v1} v2={v2}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn replaying_the_log_twice_gives_identical_state() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, head) = busy_table(&tmp).await?;

    let commits = table.log().load_commits(1, head).await?;
    let first = replay(None, &commits)?;
    let second = replay(None, &commits)?;
    assert_eq!(first, second);

    let rebuilt = table.log().rebuild_table_state().await?;
    assert_eq!(rebuilt, first);

    table.snapshots().clear_cache();
    let fresh = table.snapshot_at(VersionSpec::Latest).await?;
    assert_eq!(fresh.as_ref(), &first);
    Ok(())
}

#[tokio::test]
async fn restore_makes_an_old_version_current_and_grows_history_by_one() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, head) = busy_table(&tmp).await?;
    let before = table.history(None).await?.len();

    let outcome = table.restore(VersionSpec::Version(3)).await?;
    assert!(outcome.committed);
    assert_eq!(outcome.version, head + 1);

    assert_eq!(
        live_paths(&table, VersionSpec::Latest).await?,
        live_paths(&table, VersionSpec::Version(3)).await?
    );
    assert_eq!(
        sorted_rows(&table, VersionSpec::Latest).await?,
        vec![person(1, "p1", Some(100)), person(2, "p2", Some(200))]
    );

    let history = table.history(None).await?;
    assert_eq!(history.len(), before + 1);
    assert_eq!(history[0].operation.kind.as_str(), "RESTORE");

    // Restoring to the current state still records a commit.
    let again = table.restore(VersionSpec::Latest).await?;
    assert!(again.committed);
    assert_eq!(table.history(None).await?.len(), before + 2);
    Ok(())
}

#[tokio::test]
async fn time_travel_outside_the_log_is_version_not_found() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, head) = busy_table(&tmp).await?;

    let err = table
        .snapshot_at(VersionSpec::Version(head + 1))
        .await
        .expect_err("future version");
    assert!(matches!(err, TableError::VersionNotFound { .. }));

    let created = table.snapshot_at(VersionSpec::Version(1)).await?.timestamp;
    let err = table
        .snapshot_at(VersionSpec::Timestamp(created - Duration::seconds(1)))
        .await
        .expect_err("before the table existed");
    assert!(matches!(err, TableError::VersionNotFound { .. }));

    let at_creation = table.snapshot_at(VersionSpec::Timestamp(created)).await?;
    assert_eq!(at_creation.version, 1);
    Ok(())
}

/// Holds each writer at its first data file write until both writers have
/// planned, so they read the same version.
#[derive(Debug)]
struct GatedIo {
    inner: JsonLinesFileIo,
    gate: Barrier,
}

#[async_trait::async_trait]
impl DataFileIo for GatedIo {
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
        self.gate.wait().await;
        self.inner.write_rows(location, schema, rows).await
    }

    fn estimate_row_size(&self, row: &Row) -> u64 {
        self.inner.estimate_row_size(row)
    }
}

/// Two rows in two files, plus two gated handles that give up on the first
/// real conflict.
async fn racing_writers(tmp: &TempDir) -> TestResult<(Table, Table, Table)> {
    let (table, _clock) = people_table(tmp, "race").await?;
    table.insert(vec![person(1, "a", Some(10))]).await?;
    table.insert(vec![person(2, "b", Some(20))]).await?;

    let io: Arc<dyn DataFileIo> = Arc::new(GatedIo {
        inner: JsonLinesFileIo,
        gate: Barrier::new(2),
    });
    let options = TableOptions {
        max_commit_retries: 0,
        ..TableOptions::default()
    };
    let writer = |t: &Table| t.clone().with_io(io.clone()).with_options(options);
    Ok((writer(&table), writer(&table), table))
}

#[tokio::test]
async fn disjoint_writers_at_the_same_version_both_commit() -> TestResult {
    let tmp = TempDir::new()?;
    let (a, b, table) = racing_writers(&tmp).await?;
    let bump = [Assignment::new("salary", col("salary").add(lit(1i64)))];
    let only_1 = col("id").eq(lit(1i64));
    let only_2 = col("id").eq(lit(2i64));

    let (ra, rb) = tokio::join!(a.update(Some(&only_1), &bump), b.update(Some(&only_2), &bump));
    let (ra, rb) = (ra?, rb?);
    assert!(ra.committed && rb.committed);
    assert_ne!(ra.version, rb.version);
    assert_eq!(ra.version.max(rb.version), 5);

    assert_eq!(
        sorted_rows(&table, VersionSpec::Latest).await?,
        vec![person(1, "a", Some(11)), person(2, "b", Some(21))]
    );
    Ok(())
}

#[tokio::test]
async fn overlapping_writers_at_the_same_version_one_wins() -> TestResult {
    let tmp = TempDir::new()?;
    let (a, b, table) = racing_writers(&tmp).await?;
    let only_1 = col("id").eq(lit(1i64));
    let set_a = [Assignment::new("salary", lit(111i64))];
    let set_b = [Assignment::new("salary", lit(222i64))];

    let (ra, rb) = tokio::join!(
        a.update(Some(&only_1), &set_a),
        b.update(Some(&only_1), &set_b),
    );
    let (winner, err) = match (ra, rb) {
        (Ok(w), Err(e)) | (Err(e), Ok(w)) => (w, e),
        (ra, rb) => panic!("expected exactly one winner, got {ra:?} and {rb:?}"),
    };
    assert_eq!(winner.version, 4);
    match err {
        TableError::WriteConflict { version, files, .. } => {
            assert_eq!(version, 4);
            assert_eq!(files.len(), 1);
        }
        other => panic!("expected WriteConflict, got {other:?}"),
    }
    assert_eq!(table.version().await?, 4);
    Ok(())
}

#[tokio::test]
async fn update_replans_when_an_overlapping_update_lands_mid_plan() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, _clock) = people_table(&tmp, "replan").await?;
    table.insert(vec![person(1, "a", Some(10))]).await?;

    let io = PausingIo::new();
    let writer = table.clone().with_io(io.clone());
    let only_1 = col("id").eq(lit(1i64));
    let bump = [Assignment::new("salary", col("salary").add(lit(1i64)))];
    let overwrite = [Assignment::new("salary", lit(999i64))];

    let (bumped, competing) = tokio::join!(writer.update(Some(&only_1), &bump), async {
        io.wait_paused().await;
        let outcome = table.update(Some(&only_1), &overwrite).await;
        io.resume();
        outcome
    });
    assert_eq!(competing?.version, 3);

    // The first plan read salary=10; the re-plan reads the winner's 999.
    let bumped = bumped?;
    assert!(bumped.committed);
    assert_eq!(bumped.attempts, 2);
    assert_eq!(bumped.version, 4);
    assert_eq!(
        sorted_rows(&table, VersionSpec::Latest).await?,
        vec![person(1, "a", Some(1000))]
    );
    Ok(())
}
