//! Replica listing for one reconciliation cycle.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::error::ReplicaResult;
use crate::fs::{ObjectInfo, Replica};
use crate::sync::exclude::ExcludePatterns;
use crate::sync::registry::REGISTRY_KEY;

/// A key is hidden if any of its path segments starts with a dot. Hidden
/// keys cover the registry, in-flight temporary files and dotfiles.
pub fn is_hidden(key: &str) -> bool {
    key.split('/').any(|segment| segment.starts_with('.'))
}

/// Cheap summary of a listing, compared between quick scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fingerprint {
    pub count: usize,
    pub total_size: u64,
    pub newest: Option<DateTime<Utc>>,
}

/// Snapshot of one replica's candidate keys, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    entries: BTreeMap<String, ObjectInfo>,
}

impl Listing {
    pub fn get(&self, key: &str) -> Option<&ObjectInfo> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            count: self.entries.len(),
            total_size: self.entries.values().map(|info| info.size).sum(),
            newest: self.entries.values().map(|info| info.modified).max(),
        }
    }
}

impl FromIterator<ObjectInfo> for Listing {
    fn from_iter<I: IntoIterator<Item = ObjectInfo>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|info| (info.key.clone(), info)).collect(),
        }
    }
}

/// Enumerates a replica, keeping only keys the engine may act on.
#[derive(Debug, Clone, Default)]
pub struct Lister {
    excludes: ExcludePatterns,
}

impl Lister {
    pub fn new(excludes: ExcludePatterns) -> Self {
        Self { excludes }
    }

    /// Whether `key` takes part in reconciliation.
    pub fn is_candidate(&self, key: &str) -> bool {
        key != REGISTRY_KEY && !is_hidden(key) && !self.excludes.is_excluded(key)
    }

    /// Collect the full listing of `replica`. Any enumeration error aborts.
    pub async fn list(&self, replica: &dyn Replica) -> ReplicaResult<Listing> {
        let mut stream = replica.list("").await?;
        let mut entries = BTreeMap::new();
        let mut skipped = 0usize;

        while let Some(info) = stream.try_next().await? {
            if !self.is_candidate(&info.key) {
                trace!(key = %info.key, "Skipping key");
                skipped += 1;
                continue;
            }
            entries.insert(info.key.clone(), info);
        }

        debug!(
            backend = replica.backend_type().short_name(),
            files = entries.len(),
            skipped,
            "Listed replica"
        );
        Ok(Listing { entries })
    }
}
