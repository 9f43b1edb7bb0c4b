//! Row-level execution seam.
//!
//! The engine never looks inside data files itself: it hands files to a
//! [`DataFileIo`] implementation to read rows out of them, and hands rows to
//! it to produce new immutable files (with statistics). Everything above
//! this module reasons only about manifest entries ([`AddFile`]) and
//! [`Row`] values.
//!
//! [`JsonLinesFileIo`] is the reference implementation: one JSON object per
//! line under `data/part-<uuid>.jsonl`. The uuid makes every file name
//! exclusively owned by the writer that created it, so concurrent writers
//! never collide on a data path.
use std::{fmt, path::Path};

use snafu::prelude::*;

use crate::{
    metadata::{FileStats, LogicalSchema, LogicalSchemaError},
    storage::{self, StorageError, TableLocation, layout},
    transaction_log::AddFile,
    value::Row,
};

/// Errors raised while reading or writing data files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DataFileError {
    /// A file referenced by the log no longer exists.
    #[snafu(display("Data file {path} is missing"))]
    Missing {
        /// Path as recorded in the log.
        path: String,
        /// Underlying storage error.
        source: StorageError,
    },

    /// Storage failure other than a missing file.
    #[snafu(display("Storage error on data file {path}: {source}"))]
    Storage {
        /// Path as recorded in the log.
        path: String,
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// A line could not be decoded as a row.
    #[snafu(display("Malformed row at {path}:{line}: {source}"))]
    Decode {
        /// File path.
        path: String,
        /// 1-based line number.
        line: usize,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A row could not be encoded.
    #[snafu(display("Failed to encode row: {source}"))]
    Encode {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A row does not conform to the schema it is written under.
    #[snafu(display("Row does not conform to the table schema: {source}"))]
    RowSchema {
        /// Underlying schema error.
        source: LogicalSchemaError,
    },
}

impl DataFileError {
    /// True when the file referenced by the log is gone.
    pub fn is_missing(&self) -> bool {
        matches!(self, DataFileError::Missing { .. })
    }
}

/// Reads and writes immutable data files under a table root.
#[async_trait::async_trait]
pub trait DataFileIo: Send + Sync + fmt::Debug {
    /// Read every row of `file`.
    async fn read_rows(
        &self,
        location: &TableLocation,
        file: &AddFile,
    ) -> Result<Vec<Row>, DataFileError>;

    /// Write `rows` as one new file and describe it.
    ///
    /// The returned `AddFile` has `data_change = true`; callers doing pure
    /// re-layouts flip it.
    async fn write_rows(
        &self,
        location: &TableLocation,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<AddFile, DataFileError>;

    /// Estimated encoded size of one row, used to cut files near a target
    /// size.
    fn estimate_row_size(&self, row: &Row) -> u64;
}

/// Write `rows` as files of roughly `target_file_size` bytes each.
///
/// Writes nothing for an empty input. Every file gets at least one row.
pub async fn write_rows_split(
    io: &dyn DataFileIo,
    location: &TableLocation,
    schema: &LogicalSchema,
    rows: &[Row],
    target_file_size: u64,
) -> Result<Vec<AddFile>, DataFileError> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut acc = 0u64;

    for (i, row) in rows.iter().enumerate() {
        let size = io.estimate_row_size(row);
        if i > start && acc + size > target_file_size {
            out.push(io.write_rows(location, schema, &rows[start..i]).await?);
            start = i;
            acc = 0;
        }
        acc += size;
    }
    if start < rows.len() {
        out.push(io.write_rows(location, schema, &rows[start..]).await?);
    }
    Ok(out)
}

/// JSON-lines data files.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesFileIo;

impl JsonLinesFileIo {
    fn encode(rows: &[Row]) -> Result<Vec<u8>, DataFileError> {
        let mut buf = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buf, row).context(EncodeSnafu)?;
            buf.push(b'\n');
        }
        Ok(buf)
    }
}

#[async_trait::async_trait]
impl DataFileIo for JsonLinesFileIo {
    async fn read_rows(
        &self,
        location: &TableLocation,
        file: &AddFile,
    ) -> Result<Vec<Row>, DataFileError> {
        let text = match storage::read_to_string(location.storage(), &location.resolve(&file.path))
            .await
        {
            Ok(text) => text,
            Err(source) if source.is_not_found() => {
                return Err(source).context(MissingSnafu {
                    path: file.path.clone(),
                });
            }
            Err(source) => {
                return Err(source).context(StorageSnafu {
                    path: file.path.clone(),
                });
            }
        };

        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).context(DecodeSnafu {
                    path: file.path.clone(),
                    line: i + 1,
                })
            })
            .collect()
    }

    async fn write_rows(
        &self,
        location: &TableLocation,
        schema: &LogicalSchema,
        rows: &[Row],
    ) -> Result<AddFile, DataFileError> {
        let rows = rows
            .iter()
            .map(|row| schema.conform_row(row))
            .collect::<Result<Vec<_>, _>>()
            .context(RowSchemaSnafu)?;
        let bytes = Self::encode(&rows)?;
        let file_id = uuid::Uuid::new_v4().simple().to_string();
        let rel = layout::data_file_rel_path(&file_id);
        let path = rel.to_string_lossy().into_owned();

        storage::write_new(location.storage(), &rel, &bytes)
            .await
            .context(StorageSnafu { path: path.clone() })?;
        let entry = storage::file_entry(location.storage(), Path::new(&path))
            .await
            .context(StorageSnafu { path: path.clone() })?;

        Ok(AddFile {
            path,
            size_bytes: entry.size,
            modification_time: entry.modified,
            stats: FileStats::from_rows(schema, &rows),
            data_change: true,
        })
    }

    fn estimate_row_size(&self, row: &Row) -> u64 {
        serde_json::to_vec(row).map_or(0, |v| v.len() as u64 + 1)
    }
}
