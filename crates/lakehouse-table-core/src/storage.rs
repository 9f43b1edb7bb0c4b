//! Blob-store abstraction and path utilities.
//!
//! This module centralizes all filesystem- and path-related logic for
//! `lakehouse-table-core`. The engine treats storage as an append-only blob
//! store with a handful of primitives:
//!
//! - create-new writes (used for commit files, so each version is claimed
//!   exactly once, and for immutable data files); the payload is complete
//!   before the name appears,
//! - atomic replace writes (write-then-rename, used for `CURRENT` and
//!   checkpoints),
//! - whole-object reads,
//! - directory listing with sizes and modification times (used by VACUUM),
//! - deletes.
//!
//! Only a local filesystem backend exists today, but every entry point
//! dispatches on [`StorageLocation`] so object-store backends can be added
//! without touching the log or table layers.

pub mod error;
pub mod layout;
pub mod table_location;

use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use snafu::{Backtrace, prelude::*};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

pub use error::{BackendError, StorageError};
pub(crate) use error::{InvalidLocationSnafu, NotFoundSnafu, OtherIoSnafu};
pub use table_location::TableLocation;

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Where bytes live.
///
/// Paths handed to the functions below are relative to the location root.
/// An absolute relative-path argument replaces the root entirely (standard
/// [`Path::join`] behavior), which is how shallow clones reference files
/// owned by another table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// A directory on the local filesystem.
    Local(PathBuf),
    // Future:
    // S3 { bucket: String, prefix: String },
}

impl StorageLocation {
    /// Parse a user-facing location string.
    ///
    /// Accepts plain paths and `file://` URLs; any other scheme is rejected.
    pub fn parse(spec: &str) -> StorageResult<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return InvalidLocationSnafu {
                spec,
                reason: "location is empty",
            }
            .fail();
        }

        if let Some(path) = trimmed.strip_prefix("file://") {
            return Ok(StorageLocation::Local(PathBuf::from(path)));
        }

        if let Some((scheme, _)) = trimmed.split_once("://") {
            return InvalidLocationSnafu {
                spec,
                reason: format!("unsupported scheme {scheme:?}"),
            }
            .fail();
        }

        Ok(StorageLocation::Local(PathBuf::from(trimmed)))
    }

    /// Absolute local root, when the backend is the local filesystem.
    pub fn local_root(&self) -> Option<&Path> {
        match self {
            StorageLocation::Local(root) => Some(root.as_path()),
        }
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the listed location.
    pub rel_path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time reported by the backend.
    pub modified: DateTime<Utc>,
}

/// Join a storage location with a relative path into an absolute local path.
pub(crate) fn join_local(location: &StorageLocation, rel: &Path) -> PathBuf {
    match location {
        StorageLocation::Local(root) => root.join(rel),
    }
}

pub(crate) async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

fn classify_io(err: io::Error, path: String) -> StorageError {
    let kind = err.kind();
    let source = BackendError::Local(err);
    match kind {
        io::ErrorKind::NotFound => StorageError::NotFound {
            path,
            source,
            backtrace: Backtrace::capture(),
        },
        io::ErrorKind::AlreadyExists => StorageError::AlreadyExists {
            path,
            source,
            backtrace: Backtrace::capture(),
        },
        _ => StorageError::OtherIo {
            path,
            source,
            backtrace: Backtrace::capture(),
        },
    }
}

/// Guard that removes a temporary file on drop unless disarmed.
/// Used to ensure cleanup on error paths during atomic writes.
pub(crate) struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Disarm the guard so the file is NOT removed on drop.
    /// Call this after a successful rename.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; we're likely already handling another error.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Write `contents` to `rel_path` inside `location` using an atomic write.
///
/// Writes the payload to a temporary file next to the target path, syncs it,
/// then renames it into place. Readers observe either the old or the new
/// contents, never a partial file.
pub async fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            create_parent_dir(&abs).await?;

            let tmp_name = format!(
                "{}.{}.tmp",
                abs.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                uuid::Uuid::new_v4().simple()
            );
            let tmp_path = abs.with_file_name(tmp_name);
            let mut guard = TempFileGuard::new(tmp_path.clone());

            {
                let mut file = fs::File::create(&tmp_path)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;

                file.write_all(contents)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;

                file.sync_all()
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;
            }

            fs::rename(&tmp_path, &abs)
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: abs.display().to_string(),
                })?;

            guard.disarm();
            Ok(())
        }
    }
}

/// Create a *new* object at `rel_path` and write `contents`, failing with
/// [`StorageError::AlreadyExists`] if it already exists.
///
/// This is the primitive behind per-version commit uniqueness and behind
/// immutable data files. The payload is staged in a temporary file and
/// hard-linked into place, so the target never becomes visible half-written.
pub async fn write_new(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            create_parent_dir(&abs).await?;

            let path_str = abs.display().to_string();
            let tmp_path = abs.with_file_name(format!(
                "{}.{}.tmp",
                abs.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                uuid::Uuid::new_v4().simple()
            ));
            let _guard = TempFileGuard::new(tmp_path.clone());
            let tmp_str = tmp_path.display().to_string();

            {
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&tmp_path)
                    .await
                    .map_err(|e| classify_io(e, tmp_str.clone()))?;

                file.write_all(contents)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_str.clone(),
                    })?;

                file.sync_all()
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu { path: tmp_str })?;
            }

            // Atomic "create only if not exists" on the target path. The
            // guard removes the staging name either way.
            fs::hard_link(&tmp_path, &abs)
                .await
                .map_err(|e| classify_io(e, path_str))?;

            Ok(())
        }
    }
}

/// Read the object at `rel_path` as UTF-8 text.
pub async fn read_to_string(location: &StorageLocation, rel_path: &Path) -> StorageResult<String> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            fs::read_to_string(&abs)
                .await
                .map_err(|e| classify_io(e, abs.display().to_string()))
        }
    }
}

/// Read the full contents of the object at `rel_path`.
pub async fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            fs::read(&abs)
                .await
                .map_err(|e| classify_io(e, abs.display().to_string()))
        }
    }
}

/// Stat a single object.
///
/// Non-regular files are reported as `NotFound`.
pub async fn file_entry(location: &StorageLocation, rel_path: &Path) -> StorageResult<FileEntry> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            let path_str = abs.display().to_string();

            let meta = fs::metadata(&abs)
                .await
                .map_err(|e| classify_io(e, path_str.clone()))?;

            if !meta.is_file() {
                return Err(BackendError::Local(io::Error::other("not a regular file")))
                    .context(NotFoundSnafu { path: path_str });
            }

            let modified = meta
                .modified()
                .map_err(BackendError::Local)
                .context(OtherIoSnafu { path: path_str })?;

            Ok(FileEntry {
                rel_path: rel_path.to_path_buf(),
                size: meta.len(),
                modified: DateTime::<Utc>::from(modified),
            })
        }
    }
}

/// List the regular files directly under `rel_dir`.
///
/// A missing directory lists as empty. Entries are sorted by path so
/// callers see a deterministic order.
pub async fn list_files(
    location: &StorageLocation,
    rel_dir: &Path,
) -> StorageResult<Vec<FileEntry>> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_dir);
            let dir_str = abs.display().to_string();

            let mut reader = match fs::read_dir(&abs).await {
                Ok(r) => r,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(classify_io(e, dir_str)),
            };

            let mut out = Vec::new();
            loop {
                let entry = reader
                    .next_entry()
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: dir_str.clone(),
                    })?;
                let Some(entry) = entry else { break };

                let meta = match entry.metadata().await {
                    Ok(m) => m,
                    // Raced with a concurrent delete.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(classify_io(e, entry.path().display().to_string())),
                };
                if !meta.is_file() {
                    continue;
                }

                let modified = meta
                    .modified()
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: entry.path().display().to_string(),
                    })?;

                out.push(FileEntry {
                    rel_path: rel_dir.join(entry.file_name()),
                    size: meta.len(),
                    modified: DateTime::<Utc>::from(modified),
                });
            }

            out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
            Ok(out)
        }
    }
}

/// Delete the object at `rel_path`.
///
/// Returns `NotFound` when nothing exists there, so callers can tell a
/// successful delete from a file that was already reaped.
pub async fn delete_file(location: &StorageLocation, rel_path: &Path) -> StorageResult<()> {
    match location {
        StorageLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            fs::remove_file(&abs)
                .await
                .map_err(|e| classify_io(e, abs.display().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn local(tmp: &TempDir) -> StorageLocation {
        StorageLocation::Local(tmp.path().to_path_buf())
    }

    #[tokio::test]
    async fn write_atomic_creates_parent_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = local(&tmp);

        let rel_path = Path::new("nested/deep/dir/file.txt");
        write_atomic(&location, rel_path, b"nested content").await?;

        let read_back = tokio::fs::read_to_string(tmp.path().join(rel_path)).await?;
        assert_eq!(read_back, "nested content");
        Ok(())
    }

    #[tokio::test]
    async fn write_atomic_overwrites_and_leaves_no_temp_files() -> TestResult {
        let tmp = TempDir::new()?;
        let location = local(&tmp);
        let rel_path = Path::new("overwrite.txt");

        write_atomic(&location, rel_path, b"original").await?;
        write_atomic(&location, rel_path, b"updated").await?;

        assert_eq!(read_to_string(&location, rel_path).await?, "updated");
        let listed = list_files(&location, Path::new("")).await?;
        assert_eq!(listed.len(), 1, "temp files must not survive: {listed:?}");
        Ok(())
    }

    #[tokio::test]
    async fn read_to_string_returns_not_found_for_missing_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = local(&tmp);

        let err = read_to_string(&location, Path::new("does_not_exist.txt"))
            .await
            .expect_err("expected NotFound error");
        assert!(matches!(err, StorageError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn write_new_fails_if_file_exists() -> TestResult {
        let tmp = TempDir::new()?;
        let location = local(&tmp);
        let rel_path = Path::new("existing.txt");

        write_new(&location, rel_path, b"first").await?;

        let err = write_new(&location, rel_path, b"second")
            .await
            .expect_err("expected AlreadyExists error");
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        assert_eq!(read_to_string(&location, rel_path).await?, "first");
        Ok(())
    }

    #[tokio::test]
    async fn list_files_reports_sizes_and_skips_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = local(&tmp);

        write_new(&location, Path::new("data/b.jsonl"), b"12345").await?;
        write_new(&location, Path::new("data/a.jsonl"), b"1").await?;
        write_new(&location, Path::new("data/sub/c.jsonl"), b"ignored").await?;

        let listed = list_files(&location, Path::new("data")).await?;
        let names: Vec<_> = listed.iter().map(|e| e.rel_path.clone()).collect();
        assert_eq!(
            names,
            vec![PathBuf::from("data/a.jsonl"), PathBuf::from("data/b.jsonl")]
        );
        assert_eq!(listed[1].size, 5);
        Ok(())
    }

    #[tokio::test]
    async fn list_files_on_missing_directory_is_empty() -> TestResult {
        let tmp = TempDir::new()?;
        let listed = list_files(&local(&tmp), Path::new("nope")).await?;
        assert!(listed.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn delete_file_distinguishes_missing_files() -> TestResult {
        let tmp = TempDir::new()?;
        let location = local(&tmp);
        let rel = Path::new("data/x.jsonl");

        write_new(&location, rel, b"x").await?;
        delete_file(&location, rel).await?;

        let err = delete_file(&location, rel)
            .await
            .expect_err("second delete must fail");
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn absolute_rel_path_escapes_root() -> TestResult {
        let tmp = TempDir::new()?;
        let other = TempDir::new()?;
        let abs = other.path().join("shared.jsonl");
        tokio::fs::write(&abs, b"shared").await?;

        let bytes = read_all_bytes(&local(&tmp), &abs).await?;
        assert_eq!(bytes, b"shared");
        Ok(())
    }

    #[test]
    fn parse_accepts_plain_paths_and_file_urls() -> TestResult {
        assert_eq!(
            StorageLocation::parse("/tmp/t")?,
            StorageLocation::Local(PathBuf::from("/tmp/t"))
        );
        assert_eq!(
            StorageLocation::parse("file:///tmp/t")?,
            StorageLocation::Local(PathBuf::from("/tmp/t"))
        );
        assert!(matches!(
            StorageLocation::parse("s3://bucket/t"),
            Err(StorageError::InvalidLocation { .. })
        ));
        Ok(())
    }
}
