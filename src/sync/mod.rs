//! Two-replica reconciliation.
//!
//! A cycle lists both replicas, loads the registry, lets the engine plan
//! one action per changed key, executes the actions and persists the
//! registry. The loop repeats cycles until shutdown.

pub mod conflict;
pub mod cycle;
pub mod engine;
pub mod exclude;
pub mod executor;
pub mod hash;
pub mod lister;
pub mod registry;
pub mod scheduler;
pub mod throttle;

pub use conflict::{Resolution, TieBreak};
pub use cycle::{CycleReport, SyncOptions, Syncer};
pub use engine::{ActionKind, ActionOutcome, Direction, EngineOptions, Plan, PlannedAction, Reconciler};
pub use exclude::ExcludePatterns;
pub use executor::Executor;
pub use hash::{hash_bytes, hash_object, hash_stream, FileHash, HashTap};
pub use lister::{Fingerprint, Lister, Listing};
pub use registry::{Registry, RegistrySummary, ReplicaFileState, ReplicaSide, SyncRecord, REGISTRY_KEY};
pub use scheduler::{LoopOptions, SyncLoop};
pub use throttle::{BandwidthLimit, BandwidthLimiter};
