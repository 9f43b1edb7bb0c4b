//! Table-root locations and logged-path resolution.

use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tokio::fs;

use crate::storage::{BackendError, NotFoundSnafu, StorageLocation, StorageResult};

/// Table root location with table-scoped semantics.
///
/// This wraps [`StorageLocation`] and is used when callers need to treat the
/// location as a table root (log layout, data file paths, clone targets).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocation(StorageLocation);

impl From<TableLocation> for StorageLocation {
    fn from(t: TableLocation) -> Self {
        t.0
    }
}

impl AsRef<StorageLocation> for TableLocation {
    fn as_ref(&self) -> &StorageLocation {
        &self.0
    }
}

impl std::fmt::Display for TableLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            StorageLocation::Local(root) => write!(f, "{}", root.display()),
        }
    }
}

impl TableLocation {
    /// Creates a new `TableLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        TableLocation(StorageLocation::Local(root.into()))
    }

    /// Parse a user-facing table location string into a TableLocation.
    pub fn parse(spec: &str) -> StorageResult<Self> {
        StorageLocation::parse(spec).map(TableLocation)
    }

    /// Return the underlying StorageLocation.
    pub fn storage(&self) -> &StorageLocation {
        &self.0
    }

    /// Resolve a path recorded in the log to something the storage layer can
    /// open: relative paths stay relative to the table root, absolute paths
    /// (shallow-clone references) are used as-is.
    pub fn resolve(&self, logged_path: &str) -> PathBuf {
        PathBuf::from(logged_path)
    }

    /// True when `logged_path` points inside this table root.
    ///
    /// VACUUM only ever deletes files for which this holds.
    pub fn owns(&self, logged_path: &str) -> bool {
        Path::new(logged_path).is_relative()
    }

    /// Absolute, canonical form of a logged path.
    ///
    /// Used when another table must reference this table's files (shallow
    /// clone). The table root must exist.
    pub async fn absolute_path(&self, logged_path: &str) -> StorageResult<PathBuf> {
        match &self.0 {
            StorageLocation::Local(root) => {
                let root = fs::canonicalize(root)
                    .await
                    .map_err(BackendError::Local)
                    .context(NotFoundSnafu {
                        path: root.display().to_string(),
                    })?;
                Ok(root.join(logged_path))
            }
        }
    }
}
