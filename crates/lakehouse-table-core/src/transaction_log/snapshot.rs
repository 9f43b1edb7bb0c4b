//! Point-in-time snapshots with an in-process cache.
//!
//! A snapshot is a [`TableState`] at some version. Building one is a replay
//! of the log; since replay is associative, a newer snapshot can be derived
//! from any cached older one by applying just the missing commits. The
//! cache is keyed by version and shared between clones of the builder.
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use log::debug;
use snafu::prelude::*;

use crate::transaction_log::{CommitError, TableState, TransactionLogStore};

/// Number of snapshots kept per table handle.
const SNAPSHOT_CACHE_CAPACITY: usize = 16;

/// Which snapshot to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionSpec {
    /// The head.
    #[default]
    Latest,
    /// An exact version (`VERSION AS OF`).
    Version(u64),
    /// The last version committed at or before a time (`TIMESTAMP AS OF`).
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Latest => write!(f, "latest"),
            VersionSpec::Version(v) => write!(f, "version {v}"),
            VersionSpec::Timestamp(ts) => write!(f, "timestamp {}", ts.to_rfc3339()),
        }
    }
}

/// Errors raised while resolving or building a snapshot.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SnapshotError {
    /// The requested version is outside `[floor, head]`.
    #[snafu(display(
        "Version not found: {requested} (available: {})",
        available_range(*floor, *head)
    ))]
    VersionNotFound {
        /// What was asked for.
        requested: VersionSpec,
        /// Oldest reconstructible version, if any.
        floor: Option<u64>,
        /// Head at the time of the request.
        head: u64,
    },

    /// Reading the log failed.
    #[snafu(display("Failed to read the transaction log: {source}"))]
    Log {
        /// Underlying log error.
        #[snafu(backtrace)]
        source: CommitError,
    },
}

fn available_range(floor: Option<u64>, head: u64) -> String {
    match floor {
        Some(f) if head > 0 => format!("{f}..={head}"),
        _ => "none".to_string(),
    }
}

/// Builds and caches snapshots for one table.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    log: TransactionLogStore,
    cache: Arc<Mutex<BTreeMap<u64, Arc<TableState>>>>,
}

impl SnapshotBuilder {
    /// A builder with an empty cache.
    pub fn new(log: TransactionLogStore) -> Self {
        Self {
            log,
            cache: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// The underlying log store.
    pub fn log(&self) -> &TransactionLogStore {
        &self.log
    }

    /// Resolve `spec` to a concrete version.
    pub async fn resolve_version(&self, spec: VersionSpec) -> Result<u64, SnapshotError> {
        let head = self.log.load_current_version().await.context(LogSnafu)?;
        let floor = self.log.retention_floor().await.context(LogSnafu)?;
        let not_found = || SnapshotError::VersionNotFound {
            requested: spec,
            floor,
            head,
        };

        let Some(floor_version) = floor else {
            return Err(not_found());
        };
        if head == 0 {
            return Err(not_found());
        }

        match spec {
            VersionSpec::Latest => Ok(head),
            VersionSpec::Version(v) => {
                if v == 0 || v > head || v < floor_version {
                    Err(not_found())
                } else {
                    Ok(v)
                }
            }
            VersionSpec::Timestamp(ts) => {
                if self.version_timestamp(floor_version).await? > ts {
                    return Err(not_found());
                }
                // Commit timestamps are strictly increasing: binary search for
                // the last version at or before `ts`.
                let (mut lo, mut hi) = (floor_version, head);
                while lo < hi {
                    let mid = lo + (hi - lo).div_ceil(2);
                    if self.version_timestamp(mid).await? <= ts {
                        lo = mid;
                    } else {
                        hi = mid - 1;
                    }
                }
                Ok(lo)
            }
        }
    }

    /// Commit timestamp of `version`, read from its commit or, when the
    /// commit was pruned, from its checkpoint.
    pub async fn version_timestamp(&self, version: u64) -> Result<DateTime<Utc>, SnapshotError> {
        if let Some(state) = self.cached(version) {
            return Ok(state.timestamp);
        }
        match self.log.load_commit(version).await {
            Ok(commit) => Ok(commit.timestamp),
            Err(e) if e.is_not_found() => Ok(self
                .log
                .load_checkpoint(version)
                .await
                .context(LogSnafu)?
                .timestamp),
            Err(e) => Err(e).context(LogSnafu),
        }
    }

    /// Snapshot for `spec`.
    pub async fn snapshot(&self, spec: VersionSpec) -> Result<Arc<TableState>, SnapshotError> {
        let version = self.resolve_version(spec).await?;
        self.snapshot_at_version(version).await
    }

    /// Snapshot at an already-resolved version.
    pub async fn snapshot_at_version(
        &self,
        version: u64,
    ) -> Result<Arc<TableState>, SnapshotError> {
        if let Some(state) = self.cached(version) {
            return Ok(state);
        }

        let base = self.nearest_cached_below(version);
        let state = match base {
            Some(base) => {
                debug!("building snapshot {version} from cached {}", base.version);
                self.log
                    .replay_from(Some(base.as_ref().clone()), version)
                    .await
                    .context(LogSnafu)?
            }
            None => self
                .log
                .rebuild_table_state_at(version)
                .await
                .context(LogSnafu)?,
        };

        let state = Arc::new(state);
        self.remember(Arc::clone(&state));
        Ok(state)
    }

    /// Drop every cached snapshot.
    pub fn clear_cache(&self) {
        self.lock().clear();
    }

    /// Versions currently cached, ascending.
    pub fn cached_versions(&self) -> Vec<u64> {
        self.lock().keys().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Arc<TableState>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cached(&self, version: u64) -> Option<Arc<TableState>> {
        self.lock().get(&version).cloned()
    }

    fn nearest_cached_below(&self, version: u64) -> Option<Arc<TableState>> {
        self.lock()
            .range(..version)
            .next_back()
            .map(|(_, s)| Arc::clone(s))
    }

    fn remember(&self, state: Arc<TableState>) {
        let mut cache = self.lock();
        cache.insert(state.version, state);
        while cache.len() > SNAPSHOT_CACHE_CAPACITY {
            cache.pop_first();
        }
    }
}
