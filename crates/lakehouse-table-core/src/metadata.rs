//! Table metadata model: schema, properties and per-file statistics.
//!
//! Everything here is pure data; nothing touches storage.
pub mod file_stats;
pub mod logical_schema;
pub mod schema_compat;
pub mod table_metadata;

pub use file_stats::FileStats;
pub use logical_schema::{LogicalColumn, LogicalDataType, LogicalSchema, LogicalSchemaError};
pub use schema_compat::{SchemaCompatibilityError, conform_rows, ensure_schema_exact_match};
pub use table_metadata::{
    DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_TARGET_FILE_SIZE, SAFE_RETENTION_HOURS,
    TABLE_FORMAT_VERSION, TableMeta, TableProperties,
};
