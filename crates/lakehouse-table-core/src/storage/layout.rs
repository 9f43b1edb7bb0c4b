//! On-disk layout helpers for a table root.
//!
//! This module centralizes all *relative* path conventions under a table root:
//! - transaction log directory / commit and checkpoint file naming
//!   (`_lakehouse_log/`)
//! - conventional data directory (`data/`)
//!
//! The functions here return relative [`std::path::PathBuf`] values. Callers are
//! expected to join these with a table root (for example, a
//! [`crate::storage::TableLocation`]) before doing IO.

use std::path::PathBuf;

// ====================
// Data layout
// ====================

/// Directory where data files are written.
pub const DATA_DIR_NAME: &str = "data";

/// Extension used by the JSON-lines data file writer.
pub const DATA_FILE_EXT: &str = "jsonl";

/// Relative path: `data/`
pub fn data_rel_dir() -> PathBuf {
    PathBuf::from(DATA_DIR_NAME)
}

/// Relative path of a new data file: `data/part-<id>.<ext>`.
pub fn data_file_rel_path(file_id: &str) -> PathBuf {
    data_rel_dir().join(format!("part-{file_id}.{DATA_FILE_EXT}"))
}

// ====================
// Transaction log layout
// ====================

/// Name of the subdirectory containing the commit log.
pub const LOG_DIR_NAME: &str = "_lakehouse_log";

/// Name of the file that stores the current version pointer.
pub const CURRENT_FILE_NAME: &str = "CURRENT";

/// Number of digits used in zero-padded commit file names.
pub const COMMIT_FILENAME_DIGITS: usize = 10;

/// Suffix of commit files.
pub const COMMIT_SUFFIX: &str = ".json";

/// Suffix of checkpoint files.
pub const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// Relative path: `_lakehouse_log/`
pub fn log_rel_dir() -> PathBuf {
    PathBuf::from(LOG_DIR_NAME)
}

/// Relative path: `_lakehouse_log/CURRENT`
pub fn current_rel_path() -> PathBuf {
    log_rel_dir().join(CURRENT_FILE_NAME)
}

/// Relative path: `_lakehouse_log/<zero-padded>.json`
pub fn commit_rel_path(version: u64) -> PathBuf {
    let file_name = format!(
        "{:0width$}{COMMIT_SUFFIX}",
        version,
        width = COMMIT_FILENAME_DIGITS
    );
    log_rel_dir().join(file_name)
}

/// Relative path: `_lakehouse_log/<zero-padded>.checkpoint.json`
pub fn checkpoint_rel_path(version: u64) -> PathBuf {
    let file_name = format!(
        "{:0width$}{CHECKPOINT_SUFFIX}",
        version,
        width = COMMIT_FILENAME_DIGITS
    );
    log_rel_dir().join(file_name)
}

/// Kind of file found in the log directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFileKind {
    /// `<version>.json`
    Commit(u64),
    /// `<version>.checkpoint.json`
    Checkpoint(u64),
}

/// Classify a file name found in the log directory.
///
/// Returns `None` for `CURRENT`, temp files and anything else that is not a
/// well-formed commit or checkpoint name.
pub fn parse_log_file_name(name: &str) -> Option<LogFileKind> {
    if let Some(stem) = name.strip_suffix(CHECKPOINT_SUFFIX) {
        return parse_padded_version(stem).map(LogFileKind::Checkpoint);
    }
    let stem = name.strip_suffix(COMMIT_SUFFIX)?;
    parse_padded_version(stem).map(LogFileKind::Commit)
}

fn parse_padded_version(stem: &str) -> Option<u64> {
    if stem.len() != COMMIT_FILENAME_DIGITS || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}
