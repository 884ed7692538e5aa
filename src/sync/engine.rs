//! Reconciliation engine.
//!
//! Compares two fresh listings against the registry and decides, key by
//! key, what has to happen so both replicas converge:
//!
//! ```text
//!  local  remote  record                     action
//!  ─────  ──────  ─────────────────────────  ──────────────────────────────
//!   yes    yes    any                         hashes equal → NoOp (refresh)
//!                                             hashes differ → Transfer winner
//!   yes    no     none / remote untracked     Transfer local → remote
//!   yes    no     remote tracked, local same  DeleteLocal
//!   yes    no     remote tracked, local edit  Transfer local → remote
//!   no     yes    (mirror of the above)
//!   no     no     any                         Prune
//! ```
//!
//! Hashing is lazy: a side whose modification time and size exactly match
//! its own recorded state is assumed unchanged and its recorded hash reused.
//! The minimum time delta only applies when comparing the two sides against
//! each other during conflict resolution.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, trace, warn};

use crate::fs::{ObjectInfo, Replica};
use crate::sync::conflict::{self, Observed, TieBreak};
use crate::sync::hash::hash_object;
use crate::sync::lister::Listing;
use crate::sync::registry::{Registry, ReplicaSide, SyncRecord};

/// Default minimum significant modification-time difference.
pub const DEFAULT_MIN_TIME_DELTA_MS: i64 = 1000;

/// Which way a transfer copies bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local → remote.
    Upload,
    /// Remote → local.
    Download,
}

impl Direction {
    /// Direction that copies away from `source`.
    pub fn from_source(source: ReplicaSide) -> Self {
        match source {
            ReplicaSide::Local => Direction::Upload,
            ReplicaSide::Remote => Direction::Download,
        }
    }

    pub fn source(self) -> ReplicaSide {
        match self {
            Direction::Upload => ReplicaSide::Local,
            Direction::Download => ReplicaSide::Remote,
        }
    }

    pub fn destination(self) -> ReplicaSide {
        self.source().other()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source(), self.destination())
    }
}

/// What to do with one key.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Copy the whole object from the source side over the destination.
    Transfer {
        direction: Direction,
        /// Source metadata as listed this cycle.
        source: ObjectInfo,
        /// Source content hash, if planning had to compute it.
        hash: Option<String>,
    },
    DeleteLocal,
    DeleteRemote,
    /// Content already matches; store the refreshed record.
    NoOp { record: SyncRecord },
    /// Gone on both sides; drop the record.
    Prune,
}

/// A decision for one key, plus the record it was based on.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAction {
    pub key: String,
    pub kind: ActionKind,
    pub prior: Option<SyncRecord>,
}

/// Result of successfully carrying out a [`PlannedAction`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Transferred {
        /// Hash of the bytes actually written.
        hash: String,
        bytes: u64,
        /// Modification time the destination reports after the write.
        destination_modified: DateTime<Utc>,
    },
    Deleted,
    /// Registry-only actions.
    Settled,
}

impl PlannedAction {
    /// Short name used in logs and `filesync plan` output.
    pub fn label(&self) -> &'static str {
        match &self.kind {
            ActionKind::Transfer {
                direction: Direction::Upload,
                ..
            } => "upload",
            ActionKind::Transfer {
                direction: Direction::Download,
                ..
            } => "download",
            ActionKind::DeleteLocal => "delete-local",
            ActionKind::DeleteRemote => "delete-remote",
            ActionKind::NoOp { .. } => "noop",
            ActionKind::Prune => "prune",
        }
    }

    /// Whether the action touches a replica (as opposed to only the registry).
    pub fn needs_io(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::Transfer { .. } | ActionKind::DeleteLocal | ActionKind::DeleteRemote
        )
    }

    /// The record to store once the action succeeded. `None` removes it.
    ///
    /// An outcome that does not belong to this action leaves the prior
    /// record in place.
    pub fn settle(&self, outcome: &ActionOutcome, now: DateTime<Utc>) -> Option<SyncRecord> {
        match (&self.kind, outcome) {
            (
                ActionKind::Transfer {
                    direction, source, ..
                },
                ActionOutcome::Transferred {
                    hash,
                    bytes,
                    destination_modified,
                },
            ) => {
                let mut record = SyncRecord::synced(hash, source.modified, source.modified)
                    .with_sizes(*bytes, *bytes);
                record.side_mut(direction.destination()).mod_time = *destination_modified;
                Some(record)
            }
            (ActionKind::DeleteLocal | ActionKind::DeleteRemote, ActionOutcome::Deleted) => {
                let prior = self.prior.clone().unwrap_or_default();
                Some(SyncRecord {
                    local: prior.local.tombstoned(now),
                    remote: prior.remote.tombstoned(now),
                })
            }
            (ActionKind::NoOp { record }, ActionOutcome::Settled) => Some(record.clone()),
            (ActionKind::Prune, ActionOutcome::Settled) => None,
            _ => self.prior.clone(),
        }
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<13} {}", self.label(), self.key)
    }
}

/// A key the engine could not decide on this cycle.
#[derive(Debug)]
pub struct KeyFailure {
    pub key: String,
    pub error: anyhow::Error,
}

/// Output of one planning pass, in key order.
#[derive(Debug, Default)]
pub struct Plan {
    pub actions: Vec<PlannedAction>,
    pub failures: Vec<KeyFailure>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.failures.is_empty()
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    /// Local and remote modification times closer than this are treated as
    /// equal when picking a conflict winner.
    pub min_time_delta: Duration,
    pub tie_break: TieBreak,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            min_time_delta: Duration::milliseconds(DEFAULT_MIN_TIME_DELTA_MS),
            tie_break: TieBreak::Local,
        }
    }
}

/// Current content of one present side.
struct SideContent {
    hash: String,
    /// The hash was computed this cycle rather than taken from the record.
    hashed: bool,
}

/// Plans one cycle for a replica pair. Reads content for hashing only.
pub struct Reconciler<'a> {
    local: &'a dyn Replica,
    remote: &'a dyn Replica,
    options: EngineOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(local: &'a dyn Replica, remote: &'a dyn Replica, options: EngineOptions) -> Self {
        Self {
            local,
            remote,
            options,
        }
    }

    fn replica(&self, side: ReplicaSide) -> &'a dyn Replica {
        match side {
            ReplicaSide::Local => self.local,
            ReplicaSide::Remote => self.remote,
        }
    }

    /// Decide an action for every key in the union of both listings and the
    /// registry. Keys already in sync produce no action.
    pub async fn plan(&self, local: &Listing, remote: &Listing, registry: &Registry) -> Plan {
        let keys: BTreeSet<&String> = local
            .keys()
            .chain(remote.keys())
            .chain(registry.keys())
            .collect();

        let mut plan = Plan::default();
        for key in keys {
            let record = registry.get(key);
            match self
                .decide(key, local.get(key), remote.get(key), record)
                .await
            {
                Ok(Some(kind)) => {
                    let action = PlannedAction {
                        key: key.clone(),
                        kind,
                        prior: record.cloned(),
                    };
                    debug!(key = %key, action = action.label(), "Planned");
                    plan.actions.push(action);
                }
                Ok(None) => trace!(key = %key, "In sync"),
                Err(e) => {
                    warn!(key = %key, error = %format!("{:#}", e), "Could not plan key");
                    plan.failures.push(KeyFailure {
                        key: key.clone(),
                        error: e,
                    });
                }
            }
        }
        plan
    }

    async fn decide(
        &self,
        key: &str,
        local: Option<&ObjectInfo>,
        remote: Option<&ObjectInfo>,
        record: Option<&SyncRecord>,
    ) -> Result<Option<ActionKind>> {
        match (local, remote) {
            (Some(local), Some(remote)) => self.decide_both(key, local, remote, record).await,
            (Some(info), None) => self.decide_one(key, ReplicaSide::Local, info, record).await,
            (None, Some(info)) => self.decide_one(key, ReplicaSide::Remote, info, record).await,
            (None, None) => Ok(record.map(|_| ActionKind::Prune)),
        }
    }

    async fn decide_both(
        &self,
        key: &str,
        local: &ObjectInfo,
        remote: &ObjectInfo,
        record: Option<&SyncRecord>,
    ) -> Result<Option<ActionKind>> {
        let local_content = self.content(key, ReplicaSide::Local, local, record).await?;
        let remote_content = self.content(key, ReplicaSide::Remote, remote, record).await?;

        if local_content.hash == remote_content.hash {
            if !local_content.hashed && !remote_content.hashed {
                return Ok(None);
            }
            let refreshed = SyncRecord::synced(&local_content.hash, local.modified, remote.modified)
                .with_sizes(local.size, remote.size);
            if record == Some(&refreshed) {
                return Ok(None);
            }
            debug!(key = %key, "Same content on both sides, refreshing record");
            return Ok(Some(ActionKind::NoOp { record: refreshed }));
        }

        let (winner, resolution) = conflict::resolve(
            Observed {
                hash: &local_content.hash,
                modified: local.modified,
            },
            Observed {
                hash: &remote_content.hash,
                modified: remote.modified,
            },
            record,
            self.options.min_time_delta,
            self.options.tie_break,
        );
        if resolution.is_conflict() {
            info!(
                key = %key,
                winner = %winner,
                reason = %resolution,
                "Conflict: both sides differ, overwriting the {} copy",
                winner.other()
            );
        }

        let (source, content) = match winner {
            ReplicaSide::Local => (local, local_content),
            ReplicaSide::Remote => (remote, remote_content),
        };
        Ok(Some(ActionKind::Transfer {
            direction: Direction::from_source(winner),
            source: source.clone(),
            hash: Some(content.hash),
        }))
    }

    async fn decide_one(
        &self,
        key: &str,
        present: ReplicaSide,
        info: &ObjectInfo,
        record: Option<&SyncRecord>,
    ) -> Result<Option<ActionKind>> {
        let absent = present.other();
        let transfer = |hash: Option<String>| ActionKind::Transfer {
            direction: Direction::from_source(present),
            source: info.clone(),
            hash,
        };

        let Some(record) = record.filter(|r| r.side(absent).is_tracked()) else {
            debug!(key = %key, side = %present, "New file");
            return Ok(Some(transfer(None)));
        };

        // The absent side had the file: a deletion to propagate, unless the
        // survivor was edited (or re-created) since the last sync.
        let state = record.side(present);
        if !state.is_live() {
            info!(key = %key, side = %present, "File re-created after deletion");
            return Ok(Some(transfer(None)));
        }
        let content = self.content(key, present, info, Some(record)).await?;
        if content.hash == state.hash {
            debug!(key = %key, deleted_on = %absent, "Propagating deletion");
            return Ok(Some(match present {
                ReplicaSide::Local => ActionKind::DeleteLocal,
                ReplicaSide::Remote => ActionKind::DeleteRemote,
            }));
        }

        info!(
            key = %key,
            edited_on = %present,
            deleted_on = %absent,
            "Edit wins over deletion, restoring file"
        );
        Ok(Some(transfer(Some(content.hash))))
    }

    /// Content hash of a present side, reusing the recorded hash when the
    /// side's own modification time and size still match.
    async fn content(
        &self,
        key: &str,
        side: ReplicaSide,
        info: &ObjectInfo,
        record: Option<&SyncRecord>,
    ) -> Result<SideContent> {
        if let Some(state) = record.map(|r| r.side(side)) {
            if state.unchanged(info.modified, info.size) {
                return Ok(SideContent {
                    hash: state.hash.clone(),
                    hashed: false,
                });
            }
        }

        let replica = self.replica(side);
        let digest = hash_object(replica, key)
            .await
            .with_context(|| format!("Failed to hash {}", replica.display_path(key)))?;
        trace!(key = %key, side = %side, hash = %digest.value, "Hashed");
        Ok(SideContent {
            hash: digest.value,
            hashed: true,
        })
    }
}
