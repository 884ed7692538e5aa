//! Content hashing for change detection.
//!
//! BLAKE3 over the object's byte stream, fed in transfer-sized chunks so a
//! file is never held in memory whole.

use futures::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{ReplicaError, ReplicaResult};
use crate::fs::{ByteStream, Replica};

/// A computed content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    /// The hash value as hex string.
    pub value: String,
    /// Content size in bytes.
    pub size: u64,
}

/// Hash bytes using BLAKE3.
pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Hash a byte stream chunk by chunk.
pub async fn hash_stream(mut stream: ByteStream) -> std::io::Result<FileHash> {
    let mut hasher = blake3::Hasher::new();
    let mut size = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        size += chunk.len() as u64;
    }
    Ok(FileHash {
        value: hasher.finalize().to_hex().to_string(),
        size,
    })
}

/// Hash an object stored on a replica.
pub async fn hash_object(replica: &dyn Replica, key: &str) -> ReplicaResult<FileHash> {
    let stream = replica.read(key).await?;
    hash_stream(stream).await.map_err(|e| ReplicaError::io(key, e))
}

/// Hashes bytes as they pass through a stream, so a transfer yields the
/// digest of exactly what was written without a second read.
#[derive(Clone, Default)]
pub struct HashTap {
    state: Arc<Mutex<(blake3::Hasher, u64)>>,
}

impl HashTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `stream`; every chunk it yields is fed to this tap.
    pub fn tap(&self, stream: ByteStream) -> ByteStream {
        let state = Arc::clone(&self.state);
        stream
            .map(move |chunk| {
                if let Ok(bytes) = &chunk {
                    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.0.update(bytes);
                    guard.1 += bytes.len() as u64;
                }
                chunk
            })
            .boxed()
    }

    /// Digest of everything seen so far.
    pub fn finish(&self) -> FileHash {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        FileHash {
            value: guard.0.finalize().to_hex().to_string(),
            size: guard.1,
        }
    }
}
