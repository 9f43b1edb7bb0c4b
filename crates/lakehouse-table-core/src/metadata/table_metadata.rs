//! Table-level metadata structures recorded in the log.
//!
//! This module models what `LogAction::UpdateTableMeta` carries: the logical
//! schema, persistent table properties and basic bookkeeping fields. Newer
//! fields must be `#[serde(default)]` so older commits keep decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::logical_schema::LogicalSchema;

/// Current table metadata / log format version.
///
/// Bumped only when we make a breaking change to the on-disk JSON format.
pub const TABLE_FORMAT_VERSION: u32 = 1;

/// Minimum retention VACUUM accepts without an explicit override: 7 days.
pub const SAFE_RETENTION_HOURS: u64 = 168;

/// Default output size for OPTIMIZE and for insert file splitting.
///
/// Sized for the JSON-lines executor, whose files are far smaller than
/// columnar ones.
pub const DEFAULT_TARGET_FILE_SIZE: u64 = 128 * 1024;

/// Default spacing between checkpoints, in commits.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10;

/// Persistent, per-table configuration stored with the metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableProperties {
    /// How long removed files stay recoverable before VACUUM may reap them.
    pub deleted_file_retention_hours: u64,
    /// Target size in bytes of files produced by OPTIMIZE and writes.
    pub target_file_size: u64,
    /// Write a checkpoint every this many commits (0 disables checkpoints).
    pub checkpoint_interval: u64,
}

impl Default for TableProperties {
    fn default() -> Self {
        Self {
            deleted_file_retention_hours: SAFE_RETENTION_HOURS,
            target_file_size: DEFAULT_TARGET_FILE_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

/// High-level table metadata stored in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Logical schema every data file conforms to.
    pub(crate) schema: LogicalSchema,

    /// Persistent table properties.
    #[serde(default)]
    pub(crate) properties: TableProperties,

    /// Creation timestamp of the table, stored as RFC3339 UTC.
    pub(crate) created_at: DateTime<Utc>,

    /// Format version for future evolution of the log/table format.
    pub(crate) format_version: u32,

    /// Free-form table description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) description: Option<String>,
}

impl TableMeta {
    /// Metadata for a new table with default properties.
    pub fn new(schema: LogicalSchema, created_at: DateTime<Utc>) -> Self {
        Self {
            schema,
            properties: TableProperties::default(),
            created_at,
            format_version: TABLE_FORMAT_VERSION,
            description: None,
        }
    }

    /// Replace the properties.
    pub fn with_properties(mut self, properties: TableProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the logical schema.
    pub fn schema(&self) -> &LogicalSchema {
        &self.schema
    }

    /// Returns the persistent table properties.
    pub fn properties(&self) -> &TableProperties {
        &self.properties
    }

    /// Returns the UTC timestamp when the table was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the on-disk table metadata format version.
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Returns the description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Same metadata with a different schema.
    pub(crate) fn with_schema(&self, schema: LogicalSchema) -> Self {
        Self {
            schema,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::logical_schema::{LogicalColumn, LogicalDataType};

    #[test]
    fn properties_default_when_absent_from_json() -> Result<(), Box<dyn std::error::Error>> {
        let json = r#"{
            "schema": {"columns": [{"name": "id", "data_type": "int64"}]},
            "created_at": "2025-01-01T00:00:00Z",
            "format_version": 1
        }"#;
        let meta: TableMeta = serde_json::from_str(json)?;

        assert_eq!(meta.properties(), &TableProperties::default());
        assert_eq!(meta.properties().deleted_file_retention_hours, 168);
        assert!(!meta.schema().columns()[0].nullable);
        assert_eq!(meta.description(), None);
        Ok(())
    }

    #[test]
    fn with_schema_keeps_properties() -> Result<(), Box<dyn std::error::Error>> {
        let schema = LogicalSchema::new(vec![LogicalColumn::new(
            "id",
            LogicalDataType::Int64,
            false,
        )])?;
        let props = TableProperties {
            target_file_size: 10,
            ..TableProperties::default()
        };
        let meta = TableMeta::new(schema, Utc::now()).with_properties(props.clone());

        let other = LogicalSchema::new(vec![LogicalColumn::new(
            "name",
            LogicalDataType::Utf8,
            true,
        )])?;
        let replaced = meta.with_schema(other.clone());
        assert_eq!(replaced.schema(), &other);
        assert_eq!(replaced.properties(), &props);
        Ok(())
    }
}
