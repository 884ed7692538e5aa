//! Conflict detection and resolution for files whose content differs
//! between the two replicas.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sync::registry::{ReplicaSide, SyncRecord};

/// Side that wins when both changed and their modification times are
/// indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    #[default]
    Local,
    Remote,
}

impl TieBreak {
    pub fn side(self) -> ReplicaSide {
        match self {
            TieBreak::Local => ReplicaSide::Local,
            TieBreak::Remote => ReplicaSide::Remote,
        }
    }
}

/// Why a side was chosen as the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Only the winner's content moved away from the last synced state.
    OnlyChanged,
    /// Both changed (or nothing is on record); the winner is strictly newer.
    NewerModTime,
    /// Both changed at indistinguishable times; the configured side wins.
    TieBreak,
}

impl Resolution {
    /// Whether this resolution overwrote a concurrent edit.
    pub fn is_conflict(self) -> bool {
        !matches!(self, Resolution::OnlyChanged)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::OnlyChanged => write!(f, "only side changed"),
            Resolution::NewerModTime => write!(f, "newer modification time"),
            Resolution::TieBreak => write!(f, "tie-break"),
        }
    }
}

/// Current content of one side, as seen by the engine.
#[derive(Debug, Clone, Copy)]
pub struct Observed<'a> {
    pub hash: &'a str,
    pub modified: DateTime<Utc>,
}

/// Two timestamps closer than `min_delta` count as the same instant.
pub fn same_instant(a: DateTime<Utc>, b: DateTime<Utc>, min_delta: Duration) -> bool {
    let diff = (a - b).abs();
    diff.is_zero() || diff < min_delta
}

/// Pick the side whose content should overwrite the other's.
///
/// Caller guarantees the two hashes differ.
pub fn resolve(
    local: Observed<'_>,
    remote: Observed<'_>,
    record: Option<&SyncRecord>,
    min_delta: Duration,
    tie_break: TieBreak,
) -> (ReplicaSide, Resolution) {
    if let Some(record) = record {
        let changed = |side: ReplicaSide, observed: Observed<'_>| {
            let state = record.side(side);
            !(state.is_live() && state.hash == observed.hash)
        };
        match (
            changed(ReplicaSide::Local, local),
            changed(ReplicaSide::Remote, remote),
        ) {
            (true, false) => return (ReplicaSide::Local, Resolution::OnlyChanged),
            (false, true) => return (ReplicaSide::Remote, Resolution::OnlyChanged),
            _ => {}
        }
    }

    if same_instant(local.modified, remote.modified, min_delta) {
        (tie_break.side(), Resolution::TieBreak)
    } else if local.modified > remote.modified {
        (ReplicaSide::Local, Resolution::NewerModTime)
    } else {
        (ReplicaSide::Remote, Resolution::NewerModTime)
    }
}
