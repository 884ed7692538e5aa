//! Persisted record of the last reconciled state of every tracked file.
//!
//! Stored as JSON under [`REGISTRY_KEY`] on the remote replica. The key is
//! hidden, so listers never offer it to the engine as user data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::error::{RegistryError, ReplicaError};
use crate::fs::Replica;

/// Reserved key holding the serialized registry.
pub const REGISTRY_KEY: &str = ".filesync_registry.json";

/// Schema version written by this build.
pub const REGISTRY_VERSION: u32 = 1;

/// One side of the sync pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaSide {
    Local,
    Remote,
}

impl ReplicaSide {
    pub fn other(self) -> Self {
        match self {
            ReplicaSide::Local => ReplicaSide::Remote,
            ReplicaSide::Remote => ReplicaSide::Local,
        }
    }
}

impl fmt::Display for ReplicaSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaSide::Local => write!(f, "local"),
            ReplicaSide::Remote => write!(f, "remote"),
        }
    }
}

/// Last observed state of a file on one side.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicaFileState {
    /// Content hash at last observation; empty if never observed.
    #[serde(default)]
    pub hash: String,
    #[serde(rename = "mod_time_unix_ms", with = "chrono::serde::ts_milliseconds")]
    pub mod_time: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(
        rename = "deleted_at_unix_ms",
        with = "chrono::serde::ts_milliseconds_option",
        default
    )]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Byte size at last observation. Absent in registries written before
    /// sizes were tracked.
    #[serde(default)]
    pub size: Option<u64>,
}

impl ReplicaFileState {
    /// A present file with known content.
    pub fn live(hash: impl Into<String>, mod_time: DateTime<Utc>) -> Self {
        Self {
            hash: hash.into(),
            mod_time,
            deleted: false,
            deleted_at: None,
            size: None,
        }
    }

    pub fn with_size(self, size: u64) -> Self {
        Self {
            size: Some(size),
            ..self
        }
    }

    /// The same state, marked absent since `at`. An existing tombstone keeps
    /// its original deletion time.
    pub fn tombstoned(&self, at: DateTime<Utc>) -> Self {
        if self.deleted {
            return self.clone();
        }
        Self {
            deleted: true,
            deleted_at: Some(at),
            ..self.clone()
        }
    }

    /// Present with a known hash.
    pub fn is_live(&self) -> bool {
        !self.deleted && !self.hash.is_empty()
    }

    /// The file was ever seen on this side (present now or tombstoned).
    pub fn is_tracked(&self) -> bool {
        self.deleted || !self.hash.is_empty()
    }

    /// A listed `modified`/`size` still describes the recorded content.
    ///
    /// Times are compared at the millisecond resolution the registry
    /// persists. Any other difference, however small, counts as a change.
    pub fn unchanged(&self, modified: DateTime<Utc>, size: u64) -> bool {
        self.is_live()
            && self.mod_time.timestamp_millis() == modified.timestamp_millis()
            && self.size.map_or(true, |recorded| recorded == size)
    }
}

/// Belief about a single logical file across both replicas.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncRecord {
    pub local: ReplicaFileState,
    pub remote: ReplicaFileState,
}

impl SyncRecord {
    /// Both sides hold the same content.
    pub fn synced(
        hash: &str,
        local_mod_time: DateTime<Utc>,
        remote_mod_time: DateTime<Utc>,
    ) -> Self {
        Self {
            local: ReplicaFileState::live(hash, local_mod_time),
            remote: ReplicaFileState::live(hash, remote_mod_time),
        }
    }

    /// The same record with both sides' sizes filled in.
    pub fn with_sizes(self, local: u64, remote: u64) -> Self {
        Self {
            local: self.local.with_size(local),
            remote: self.remote.with_size(remote),
        }
    }

    pub fn side(&self, side: ReplicaSide) -> &ReplicaFileState {
        match side {
            ReplicaSide::Local => &self.local,
            ReplicaSide::Remote => &self.remote,
        }
    }

    pub fn side_mut(&mut self, side: ReplicaSide) -> &mut ReplicaFileState {
        match side {
            ReplicaSide::Local => &mut self.local,
            ReplicaSide::Remote => &mut self.remote,
        }
    }

    /// Both sides agree the file is gone; the record only awaits pruning.
    pub fn is_fully_deleted(&self) -> bool {
        self.local.deleted && self.remote.deleted
    }

    /// Exactly one side is tombstoned.
    pub fn is_tombstone(&self) -> bool {
        self.local.deleted != self.remote.deleted
    }
}

/// Counts shown by `filesync status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    pub tracked: usize,
    pub synced: usize,
    pub tombstones: usize,
    pub awaiting_prune: usize,
}

/// Mapping from key to [`SyncRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    #[serde(default)]
    pub files: BTreeMap<String, SyncRecord>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            files: BTreeMap::new(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SyncRecord> {
        self.files.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, record: SyncRecord) {
        self.files.insert(key.into(), record);
    }

    pub fn remove(&mut self, key: &str) -> Option<SyncRecord> {
        self.files.remove(key)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    pub fn summary(&self) -> RegistrySummary {
        let mut summary = RegistrySummary {
            tracked: self.files.len(),
            ..Default::default()
        };
        for record in self.files.values() {
            if record.is_fully_deleted() {
                summary.awaiting_prune += 1;
            } else if record.is_tombstone() {
                summary.tombstones += 1;
            } else if record.local.is_live()
                && record.remote.is_live()
                && record.local.hash == record.remote.hash
            {
                summary.synced += 1;
            }
        }
        summary
    }

    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Read the registry from `replica`.
    ///
    /// A missing registry is the bootstrap case and yields an empty one. An
    /// unreadable or foreign-version registry is logged and also treated as
    /// empty: the engine then falls back to first-seen semantics, which can
    /// cost redundant transfers but never deletes anything.
    pub async fn load(replica: &dyn Replica) -> Result<Self, ReplicaError> {
        let data = match replica.read_all(REGISTRY_KEY).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                debug!(location = %replica.display_path(REGISTRY_KEY), "No registry yet, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e),
        };

        match Self::from_json(&data) {
            Ok(registry) if registry.version == REGISTRY_VERSION => {
                debug!(files = registry.len(), "Loaded registry");
                Ok(registry)
            }
            Ok(registry) => {
                warn!(
                    version = registry.version,
                    expected = REGISTRY_VERSION,
                    "Unsupported registry version, starting empty"
                );
                Ok(Self::new())
            }
            Err(e) => {
                warn!(error = %e, "Registry is corrupt, starting empty");
                Ok(Self::new())
            }
        }
    }

    /// Overwrite the stored registry. Replica writes are atomic, so readers
    /// see either the previous or the new registry.
    pub async fn save(&self, replica: &dyn Replica) -> Result<(), RegistryError> {
        let data = self.to_json()?;
        replica.write_all(REGISTRY_KEY, data).await?;
        debug!(files = self.len(), "Saved registry");
        Ok(())
    }
}
