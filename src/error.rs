//! Error types shared across replica backends and the registry.
//!
//! Cycle-level code works with `anyhow::Result` and attaches context; these
//! typed errors exist where callers need to branch on the failure kind
//! (absence is a value for the executor, not a failure).

use thiserror::Error;

/// Result alias for replica operations.
pub type ReplicaResult<T> = Result<T, ReplicaError>;

/// Failure reported by a [`Replica`](crate::fs::Replica) implementation.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// The key does not exist on this replica.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Filesystem I/O failed.
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The object-store backend rejected the operation.
    #[error("storage backend error on {key}: {source}")]
    Backend {
        key: String,
        #[source]
        source: opendal::Error,
    },

    /// The key would escape the replica root or is otherwise malformed.
    #[error("invalid key: {key:?}")]
    InvalidKey { key: String },

    /// The replica URI names a scheme we cannot open.
    #[error("unsupported replica URI: {uri}")]
    Unsupported { uri: String },
}

impl ReplicaError {
    /// Wrap an I/O error, mapping `NotFound` to [`ReplicaError::NotFound`].
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        let key = key.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            ReplicaError::NotFound { key }
        } else {
            ReplicaError::Io { key, source }
        }
    }

    /// Wrap an OpenDAL error, mapping `NotFound` to [`ReplicaError::NotFound`].
    pub fn backend(key: impl Into<String>, source: opendal::Error) -> Self {
        let key = key.into();
        if source.kind() == opendal::ErrorKind::NotFound {
            ReplicaError::NotFound { key }
        } else {
            ReplicaError::Backend { key, source }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplicaError::NotFound { .. })
    }
}

/// Failure while persisting the sync registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to serialize registry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write registry: {0}")]
    Write(#[from] ReplicaError),
}
