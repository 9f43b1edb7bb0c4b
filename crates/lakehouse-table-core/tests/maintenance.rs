#![allow(missing_docs)]

mod common;

use std::{collections::BTreeSet, sync::Arc};

use chrono::{Duration, Utc};
use lakehouse_table_core::{
    Table, TableError,
    clock::ManualClock,
    expr::{col, lit},
    metadata::{LogicalColumn, LogicalDataType, LogicalSchema},
    optimize::OptimizeOptions,
    retention::VacuumOptions,
    storage::TableLocation,
    table::{CreateOptions, TableOptions},
    transaction_log::{LogAction, VersionSpec},
    value::{Row, Value},
};
use tempfile::TempDir;

use common::{PausingIo, TestResult, live_paths, people_table, person, sorted_rows};

fn only(paths: BTreeSet<String>) -> TestResult<String> {
    let mut it = paths.into_iter();
    match (it.next(), it.next()) {
        (Some(p), None) => Ok(p),
        _ => Err("expected exactly one path".into()),
    }
}

/// Live sets {A,B} at v3, {B,C} at v5 and {C,D} at v7, each generation 100h
/// after the previous one. Returns the handle, clock and paths A..D.
async fn three_generations(tmp: &TempDir) -> TestResult<(Table, ManualClock, [String; 4])> {
    let (table, clock) = people_table(tmp, "gens").await?;

    table.insert(vec![person(1, "a", None)]).await?;
    let a = only(live_paths(&table, VersionSpec::Latest).await?)?;
    table.insert(vec![person(2, "b", None)]).await?;
    let b = only(&live_paths(&table, VersionSpec::Latest).await? - &BTreeSet::from([a.clone()]))?;

    clock.advance(Duration::hours(100));
    table.delete(Some(&col("id").eq(lit(1i64)))).await?;
    table.insert(vec![person(3, "c", None)]).await?;
    let c = only(&live_paths(&table, VersionSpec::Latest).await? - &BTreeSet::from([b.clone()]))?;

    clock.advance(Duration::hours(100));
    table.delete(Some(&col("id").eq(lit(2i64)))).await?;
    table.insert(vec![person(4, "d", None)]).await?;
    let d = only(&live_paths(&table, VersionSpec::Latest).await? - &BTreeSet::from([c.clone()]))?;

    assert_eq!(table.version().await?, 7);
    Ok((table, clock, [a, b, c, d]))
}

fn exists(tmp: &TempDir, path: &str) -> bool {
    tmp.path().join("gens").join(path).exists()
}

#[tokio::test]
async fn vacuum_keeps_every_file_a_retained_snapshot_needs() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, clock, [a, b, c, d]) = three_generations(&tmp).await?;

    // now = T0 + 300h, threshold = T0 + 132h: v5 ({B,C}) is the oldest
    // snapshot inside the window.
    clock.advance(Duration::hours(100));

    let dry = table
        .vacuum(VacuumOptions {
            dry_run: true,
            ..VacuumOptions::retain_hours(168)
        })
        .await?;
    assert_eq!(dry.boundary_version, 5);
    assert_eq!(dry.candidates, vec![a.clone()]);
    assert!(dry.deleted.is_empty());
    assert_eq!(table.version().await?, 7);
    assert!(exists(&tmp, &a));

    let report = table.vacuum(VacuumOptions::retain_hours(168)).await?;
    assert_eq!(report.deleted, vec![a.clone()]);
    assert!(!exists(&tmp, &a));
    for kept in [&b, &c, &d] {
        assert!(exists(&tmp, kept), "{kept} must survive");
    }

    // START and END bookkeeping commits.
    assert_eq!(table.version().await?, 9);
    let kinds: Vec<String> = table
        .history(Some(2))
        .await?
        .into_iter()
        .map(|h| h.operation.kind.to_string())
        .collect();
    assert_eq!(kinds, vec!["VACUUM END", "VACUUM START"]);

    // Every snapshot inside the window still reads.
    for v in 5..=9 {
        table.scan(VersionSpec::Version(v)).await?;
    }
    assert_eq!(
        sorted_rows(&table, VersionSpec::Version(5)).await?,
        vec![person(2, "b", None), person(3, "c", None)]
    );
    Ok(())
}

#[tokio::test]
async fn reading_or_restoring_past_the_window_reports_stale_files() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, clock, [a, ..]) = three_generations(&tmp).await?;
    clock.advance(Duration::hours(100));
    table.vacuum(VacuumOptions::retain_hours(168)).await?;

    let err = table
        .scan(VersionSpec::Version(3))
        .await
        .expect_err("A was vacuumed");
    assert!(matches!(err, TableError::StaleFileReference { ref path, version: 3 } if *path == a));

    let head = table.version().await?;
    let err = table
        .restore(VersionSpec::Version(3))
        .await
        .expect_err("A was vacuumed");
    match err {
        TableError::StaleFileReference { path, version } => {
            assert_eq!(path, a);
            assert_eq!(version, 3);
        }
        other => panic!("expected StaleFileReference, got {other:?}"),
    }
    assert_eq!(table.version().await?, head);

    // Versions whose files survived restore fine.
    table.restore(VersionSpec::Version(5)).await?;
    assert_eq!(
        live_paths(&table, VersionSpec::Latest).await?,
        live_paths(&table, VersionSpec::Version(5)).await?
    );
    Ok(())
}

#[tokio::test]
async fn short_retention_needs_an_explicit_override() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, _clock, [a, ..]) = three_generations(&tmp).await?;

    let err = table
        .vacuum(VacuumOptions::retain_hours(0))
        .await
        .expect_err("below the floor");
    match err {
        TableError::UnsafeVacuum {
            retention_hours,
            minimum_hours,
        } => {
            assert_eq!(retention_hours, 0);
            assert_eq!(minimum_hours, 168);
        }
        other => panic!("expected UnsafeVacuum, got {other:?}"),
    }
    assert!(exists(&tmp, &a));

    let report = table
        .vacuum(VacuumOptions {
            allow_unsafe_retention: true,
            dry_run: true,
            ..VacuumOptions::retain_hours(0)
        })
        .await?;
    assert!(report.dry_run);

    // Disabling the check on the handle has the same effect.
    let unchecked = table.clone().with_options(TableOptions {
        retention_duration_check: false,
        ..TableOptions::default()
    });
    let report = unchecked.vacuum(VacuumOptions::retain_hours(0)).await?;
    let deleted: BTreeSet<String> = report.deleted.into_iter().collect();
    assert!(deleted.contains(&a));
    assert!(live_paths(&table, VersionSpec::Latest)
        .await?
        .iter()
        .all(|p| exists(&tmp, p)));
    Ok(())
}

#[tokio::test]
async fn optimize_compacts_small_files_without_changing_data() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, _clock) = people_table(&tmp, "compact").await?;
    for id in 1..=5 {
        table.insert(vec![person(id, "x", Some(id))]).await?;
    }
    let before_rows = sorted_rows(&table, VersionSpec::Latest).await?;
    let before_files = table.snapshot_at(VersionSpec::Latest).await?.num_files();
    assert_eq!(before_files, 5);

    let outcome = table.optimize(&OptimizeOptions::default()).await?;
    assert!(outcome.committed);
    assert_eq!(outcome.metrics.num_removed_files, 5);

    let after = table.snapshot_at(VersionSpec::Latest).await?;
    assert!(after.num_files() < before_files);
    assert!(after.live_files().all(|f| f.size_bytes > 0 && !f.data_change));
    assert_eq!(sorted_rows(&table, VersionSpec::Latest).await?, before_rows);

    let commit = table.log().load_commit(outcome.version).await?;
    assert_eq!(commit.operation.kind.as_str(), "OPTIMIZE");
    for action in &commit.actions {
        match action {
            LogAction::Add(add) => assert!(!add.data_change),
            LogAction::Remove(remove) => assert!(!remove.data_change),
            other => panic!("unexpected action {other:?}"),
        }
    }

    // One file left: nothing to compact.
    let again = table.optimize(&OptimizeOptions::default()).await?;
    assert!(!again.committed);
    assert_eq!(again.version, outcome.version);
    Ok(())
}

#[tokio::test]
async fn optimize_replans_without_files_a_concurrent_delete_removed() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, _clock) = people_table(&tmp, "compact_race").await?;
    for id in 1..=4 {
        table.insert(vec![person(id, "x", Some(id))]).await?;
    }

    let io = PausingIo::new();
    let compactor = table.clone().with_io(io.clone());
    let options = OptimizeOptions::default();
    let only_1 = col("id").eq(lit(1i64));
    let (optimized, deleted) = tokio::join!(compactor.optimize(&options), async {
        io.wait_paused().await;
        let outcome = table.delete(Some(&only_1)).await;
        io.resume();
        outcome
    });
    assert_eq!(deleted?.version, 6);

    let optimized = optimized?;
    assert!(optimized.committed);
    assert_eq!(optimized.attempts, 2);
    assert_eq!(optimized.version, 7);
    assert_eq!(optimized.metrics.num_removed_files, 3);

    assert_eq!(table.snapshot_at(VersionSpec::Latest).await?.num_files(), 1);
    assert_eq!(
        sorted_rows(&table, VersionSpec::Latest).await?,
        vec![person(2, "x", Some(2)), person(3, "x", Some(3)), person(4, "x", Some(4))]
    );
    Ok(())
}

fn point(x: i64, y: i64) -> Row {
    [("x", Value::from(x)), ("y", Value::from(y))]
        .into_iter()
        .collect()
}

#[tokio::test]
async fn zorder_clusters_rows_by_both_columns() -> TestResult {
    let tmp = TempDir::new()?;
    let table = Table::new(TableLocation::local(tmp.path()))
        .with_clock(Arc::new(ManualClock::new(Utc::now())));
    let schema = LogicalSchema::new(vec![
        LogicalColumn::new("x", LogicalDataType::Int64, false),
        LogicalColumn::new("y", LogicalDataType::Int64, false),
    ])?;
    table.create(schema, CreateOptions::default()).await?;

    // Four files, each a scrambled diagonal slice of a 4x4 grid.
    for shift in 0..4 {
        let rows: Vec<Row> = (0..4).rev().map(|x| point(x, (x + shift) % 4)).collect();
        table.insert(rows).await?;
    }

    let outcome = table
        .optimize(&OptimizeOptions {
            target_file_size: Some(64),
            ..OptimizeOptions::zorder(["x", "y"])
        })
        .await?;
    assert!(outcome.committed);
    assert_eq!(outcome.metrics.num_removed_files, 4);
    assert_eq!(outcome.metrics.num_copied_rows, 16);

    let commit = table.log().load_commit(outcome.version).await?;
    let mut clustered = Vec::new();
    for action in &commit.actions {
        if let LogAction::Add(add) = action {
            assert!(!add.data_change);
            clustered.extend(table.io().read_rows(table.location(), add).await?);
        }
    }
    assert_eq!(clustered.len(), 16);
    assert_eq!(clustered.first(), Some(&point(0, 0)));
    assert_eq!(clustered.last(), Some(&point(3, 3)));

    let mut distinct: Vec<(i64, i64)> = Vec::new();
    for row in &clustered {
        match (row.get("x"), row.get("y")) {
            (Value::Int(x), Value::Int(y)) => distinct.push((*x, *y)),
            other => panic!("unexpected values {other:?}"),
        }
    }
    distinct.sort_unstable();
    distinct.dedup();
    assert_eq!(distinct.len(), 16);
    Ok(())
}

#[tokio::test]
async fn zorder_rejects_bad_column_lists() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, _clock) = people_table(&tmp, "bad").await?;
    table.insert(vec![person(1, "a", None)]).await?;
    table.insert(vec![person(2, "b", None)]).await?;

    let err = table
        .optimize(&OptimizeOptions::zorder(["nope"]))
        .await
        .expect_err("unknown column");
    assert!(matches!(err, TableError::UnknownColumn { .. }));

    let err = table
        .optimize(&OptimizeOptions::zorder(["id", "name", "salary", "id", "name"]))
        .await
        .expect_err("too many columns");
    assert!(matches!(err, TableError::InvalidOptimize { .. }));

    let err = table
        .optimize(&OptimizeOptions::zorder(["id", "id"]))
        .await
        .expect_err("duplicate column");
    assert!(matches!(err, TableError::InvalidOptimize { .. }));
    assert_eq!(table.version().await?, 3);
    Ok(())
}
