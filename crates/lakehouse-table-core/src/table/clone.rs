//! SHALLOW CLONE and DEEP CLONE.
//!
//! A clone is a new table whose first commit (`CLONE`) carries the source
//! snapshot's metadata and files. A shallow clone references the source's
//! files by absolute path and copies nothing; VACUUM on the source can
//! therefore break it, while VACUUM on the clone never touches them. A deep
//! clone rewrites every file into the clone's own data directory.
use log::info;
use snafu::prelude::*;

use crate::{
    metadata::TableMeta,
    table::{
        Table,
        error::{AlreadyExistsSnafu, DataFileSnafu, StorageSnafu, TableError},
    },
    storage::TableLocation,
    transaction_log::{
        AddFile, CommitError, LogAction, Operation, OperationKind, OperationMetrics,
        PendingCommit, VersionSpec,
    },
};

impl Table {
    /// SHALLOW CLONE the snapshot at `spec` into `target`.
    pub async fn shallow_clone(
        &self,
        target: TableLocation,
        spec: VersionSpec,
    ) -> Result<Table, TableError> {
        let source = self.snapshot_at(spec).await?;
        let clone = self.sibling(target);
        clone.ensure_vacant().await?;

        let mut adds = Vec::with_capacity(source.num_files());
        for file in source.live_files() {
            let path = if self.location.owns(&file.path) {
                self.location
                    .absolute_path(&file.path)
                    .await
                    .context(StorageSnafu)?
                    .to_string_lossy()
                    .into_owned()
            } else {
                file.path.clone()
            };
            adds.push(AddFile {
                path,
                data_change: true,
                ..file.clone()
            });
        }

        let operation = self.clone_operation(source.version, true);
        clone
            .commit_clone(operation, &source.table_meta, adds)
            .await?;
        Ok(clone)
    }

    /// DEEP CLONE the snapshot at `spec` into `target`.
    pub async fn deep_clone(
        &self,
        target: TableLocation,
        spec: VersionSpec,
    ) -> Result<Table, TableError> {
        let source = self.snapshot_at(spec).await?;
        let clone = self.sibling(target);
        clone.ensure_vacant().await?;

        let schema = source.table_meta.schema();
        let mut adds = Vec::with_capacity(source.num_files());
        for file in source.live_files() {
            let rows = self
                .io
                .read_rows(&self.location, file)
                .await
                .map_err(|e| TableError::from_data_file(e, source.version))?;
            let add = self
                .io
                .write_rows(&clone.location, schema, &rows)
                .await
                .context(DataFileSnafu)?;
            adds.push(add);
        }

        let operation = self.clone_operation(source.version, false);
        clone
            .commit_clone(operation, &source.table_meta, adds)
            .await?;
        Ok(clone)
    }

    /// A handle on `location` sharing this handle's clock, executor and
    /// options.
    fn sibling(&self, location: TableLocation) -> Table {
        Table::with_parts(location, self.log().clock().clone(), self.io.clone())
            .with_options(self.options)
    }

    async fn ensure_vacant(&self) -> Result<(), TableError> {
        let current_version = self.version().await?;
        ensure!(
            current_version == 0,
            AlreadyExistsSnafu {
                location: self.location.to_string(),
                current_version,
            }
        );
        Ok(())
    }

    fn clone_operation(&self, source_version: u64, shallow: bool) -> Operation {
        Operation::new(OperationKind::Clone)
            .with_param("source", &self.location)
            .with_param("sourceVersion", source_version)
            .with_param("isShallow", shallow)
    }

    async fn commit_clone(
        &self,
        operation: Operation,
        source_meta: &TableMeta,
        adds: Vec<AddFile>,
    ) -> Result<(), TableError> {
        let meta = TableMeta {
            created_at: self.log().clock().now(),
            ..source_meta.clone()
        };
        let metrics = OperationMetrics {
            num_added_files: adds.len() as u64,
            num_added_bytes: adds.iter().map(|a| a.size_bytes).sum(),
            num_copied_rows: adds.iter().map(AddFile::num_records).sum(),
            ..OperationMetrics::default()
        };
        let mut actions = vec![LogAction::UpdateTableMeta(meta)];
        actions.extend(adds.into_iter().map(LogAction::Add));
        let pending = PendingCommit::new(operation, actions, 0).with_metrics(metrics);

        match self.log().commit_with_expected_version(0, pending).await {
            Ok(commit) => {
                info!(
                    "cloned into {} ({} files)",
                    self.location, commit.metrics.num_added_files
                );
                Ok(())
            }
            Err(CommitError::Conflict { found, .. }) => AlreadyExistsSnafu {
                location: self.location.to_string(),
                current_version: found,
            }
            .fail(),
            Err(source) => Err(TableError::TransactionLog { source }),
        }
    }
}
