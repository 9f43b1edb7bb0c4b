//! Core engine for a transactional table format over plain files.
//!
//! This crate provides the foundational pieces for `lakehouse-table`:
//!
//! - A Delta-inspired, append-only commit log with version-guard optimistic
//!   concurrency control, snapshots, checkpoints and conflict detection
//!   (`transaction_log` module).
//! - Strongly-typed table metadata: schema, properties and per-file
//!   statistics (`metadata` module).
//! - A [`Table`] handle exposing INSERT, INSERT OVERWRITE, UPDATE, DELETE,
//!   MERGE, OPTIMIZE (with ZORDER BY), VACUUM, RESTORE, time travel,
//!   history and clones (`table`, `mutation`, `optimize` and `retention`
//!   modules).
//! - A small expression language for predicates and assignments, with
//!   statistics-based file pruning (`expr` module).
//! - Storage utilities for the on-disk layout (`storage` module) and the
//!   data file executor seam (`exec` module).
//!
//! Higher-level integration crates (for example, the CLI) are expected to
//! depend on this core crate rather than re-implementing the log and
//! commit logic.
#![deny(missing_docs)]
pub mod clock;
pub mod exec;
pub mod expr;
pub mod metadata;
pub mod mutation;
pub mod optimize;
pub mod retention;
pub mod storage;
pub mod table;
pub mod transaction_log;
pub mod value;

pub use table::{Table, TableError};
