#![allow(missing_docs)]

mod common;

use std::path::Path;

use chrono::Duration;
use lakehouse_table_core::{
    TableError,
    expr::{col, lit, src},
    mutation::{Assignment, MergeSpec},
    retention::VacuumOptions,
    storage::TableLocation,
    transaction_log::VersionSpec,
};
use tempfile::TempDir;

use common::{TestResult, live_paths, people_table, person, sorted_rows};

fn fill_missing_salary() -> MergeSpec {
    MergeSpec::new(col("id").eq(src("id"))).when_matched_update(
        Some(col("salary").is_null().and(src("salary").is_not_null())),
        vec![Assignment::new("salary", src("salary"))],
    )
}

#[tokio::test]
async fn merge_fills_a_missing_salary_and_is_idempotent() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, _clock) = people_table(&tmp, "people").await?;
    table
        .insert(vec![person(1, "ada", None), person(2, "bob", Some(300))])
        .await?;

    let source = vec![person(1, "ada", Some(500)), person(2, "bob", Some(999))];
    let first = table.merge(&source, &fill_missing_salary()).await?;
    assert!(first.committed);
    assert_eq!(first.metrics.num_updated_rows, 1);
    assert_eq!(
        sorted_rows(&table, VersionSpec::Latest).await?,
        vec![person(1, "ada", Some(500)), person(2, "bob", Some(300))]
    );

    let second = table.merge(&source, &fill_missing_salary()).await?;
    assert!(!second.committed);
    assert_eq!(second.version, first.version);
    Ok(())
}

#[tokio::test]
async fn merge_upserts_and_deletes_in_one_commit() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, _clock) = people_table(&tmp, "people").await?;
    table
        .insert(vec![person(1, "ada", Some(100)), person(2, "bob", Some(200))])
        .await?;
    table.insert(vec![person(3, "cy", Some(300))]).await?;

    let spec = MergeSpec::new(col("id").eq(src("id")))
        .when_matched_delete(Some(src("salary").is_null()))
        .when_matched_update_all(None)
        .when_not_matched_insert_all(None);
    let source = vec![
        person(1, "ada", Some(150)),
        person(2, "bob", None),
        person(4, "dee", Some(400)),
    ];
    let outcome = table.merge(&source, &spec).await?;
    assert!(outcome.committed);
    assert_eq!(outcome.metrics.num_updated_rows, 1);
    assert_eq!(outcome.metrics.num_deleted_rows, 1);
    assert_eq!(outcome.metrics.num_inserted_rows, 1);

    assert_eq!(
        sorted_rows(&table, VersionSpec::Latest).await?,
        vec![
            person(1, "ada", Some(150)),
            person(3, "cy", Some(300)),
            person(4, "dee", Some(400)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn merge_with_two_source_matches_for_one_row_fails() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, _clock) = people_table(&tmp, "people").await?;
    table.insert(vec![person(1, "ada", None)]).await?;

    let source = vec![person(1, "ada", Some(1)), person(1, "ada", Some(2))];
    let spec = MergeSpec::new(col("id").eq(src("id"))).when_matched_update_all(None);
    let err = table
        .merge(&source, &spec)
        .await
        .expect_err("ambiguous");
    assert!(matches!(err, TableError::AmbiguousMergeMatch { matches: 2, .. }));
    assert_eq!(table.version().await?, 2);
    Ok(())
}

#[tokio::test]
async fn merge_rejects_clauses_it_cannot_evaluate() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, _clock) = people_table(&tmp, "people").await?;
    table.insert(vec![person(1, "ada", None)]).await?;
    let source = vec![person(1, "ada", Some(1))];

    let no_clauses = MergeSpec::new(col("id").eq(src("id")));
    let err = table.merge(&source, &no_clauses).await.expect_err("no clauses");
    assert!(matches!(err, TableError::InvalidMerge { .. }));

    let target_in_insert = MergeSpec::new(col("id").eq(src("id"))).when_not_matched_insert(
        None,
        vec![Assignment::new("salary", col("salary"))],
    );
    let err = table
        .merge(&source, &target_in_insert)
        .await
        .expect_err("target column in NOT MATCHED");
    assert!(matches!(err, TableError::InvalidMerge { .. }));

    let unknown = MergeSpec::new(col("id").eq(src("id")))
        .when_matched_update(None, vec![Assignment::new("bonus", lit(1i64))]);
    let err = table.merge(&source, &unknown).await.expect_err("unknown column");
    assert!(matches!(err, TableError::UnknownColumn { .. }));
    Ok(())
}

#[tokio::test]
async fn deep_clone_copies_files_and_is_independent() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, _clock) = people_table(&tmp, "source").await?;
    table.insert(vec![person(1, "ada", Some(1))]).await?;
    table.insert(vec![person(2, "bob", Some(2))]).await?;

    let target = TableLocation::local(tmp.path().join("deep"));
    let clone = table
        .deep_clone(target.clone(), VersionSpec::Version(2))
        .await?;
    assert_eq!(clone.version().await?, 1);
    assert_eq!(
        sorted_rows(&clone, VersionSpec::Latest).await?,
        vec![person(1, "ada", Some(1))]
    );
    let paths = live_paths(&clone, VersionSpec::Latest).await?;
    assert!(paths.iter().all(|p| Path::new(p).is_relative()));
    assert!(paths.iter().all(|p| tmp.path().join("deep").join(p).exists()));

    let history = clone.history(None).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operation.kind.as_str(), "CLONE");

    // Writes to the source do not leak into the clone.
    table.delete(None).await?;
    assert_eq!(sorted_rows(&clone, VersionSpec::Latest).await?.len(), 1);

    let err = table
        .deep_clone(target, VersionSpec::Latest)
        .await
        .expect_err("target exists");
    assert!(matches!(err, TableError::AlreadyExists { .. }));
    Ok(())
}

#[tokio::test]
async fn shallow_clone_references_source_files() -> TestResult {
    let tmp = TempDir::new()?;
    let (table, clock) = people_table(&tmp, "source").await?;
    table.insert(vec![person(1, "ada", Some(1))]).await?;
    table.insert(vec![person(2, "bob", Some(2))]).await?;

    let clone = table
        .shallow_clone(
            TableLocation::local(tmp.path().join("shallow")),
            VersionSpec::Latest,
        )
        .await?;
    assert_eq!(
        sorted_rows(&clone, VersionSpec::Latest).await?,
        sorted_rows(&table, VersionSpec::Latest).await?
    );
    let paths = live_paths(&clone, VersionSpec::Latest).await?;
    assert_eq!(paths.len(), 2);
    assert!(paths.iter().all(|p| Path::new(p).is_absolute()));
    assert!(!tmp.path().join("shallow").join("data").exists());

    // The clone can change on its own; its new files live in its own root.
    clone.insert(vec![person(3, "cy", Some(3))]).await?;
    assert_eq!(sorted_rows(&clone, VersionSpec::Latest).await?.len(), 3);
    assert_eq!(sorted_rows(&table, VersionSpec::Latest).await?.len(), 2);

    // Deleting rows in the clone only unreferences the source's files, and
    // VACUUM on the clone never deletes outside its root.
    clone.delete(Some(&col("id").eq(lit(1i64)))).await?;
    clock.advance(Duration::hours(1000));
    clone
        .vacuum(VacuumOptions {
            allow_unsafe_retention: true,
            ..VacuumOptions::retain_hours(0)
        })
        .await?;
    assert_eq!(sorted_rows(&table, VersionSpec::Latest).await?.len(), 2);

    // VACUUM on the source, on the other hand, can break the clone.
    table.delete(None).await?;
    table
        .vacuum(VacuumOptions {
            allow_unsafe_retention: true,
            ..VacuumOptions::retain_hours(0)
        })
        .await?;
    let err = clone
        .scan(VersionSpec::Latest)
        .await
        .expect_err("source file vacuumed");
    assert!(matches!(err, TableError::StaleFileReference { .. }));
    Ok(())
}
