use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};

use crate::error::{ReplicaError, ReplicaResult};

/// Chunk size used when streaming object contents.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Streamed object contents, delivered in bounded chunks.
pub type ByteStream = BoxStream<'static, std::io::Result<Vec<u8>>>;

/// Lazy enumeration of the objects stored on a replica.
pub type ObjectStream = BoxStream<'static, ReplicaResult<ObjectInfo>>;

/// One listed object: its key, modification time and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Relative, `/`-separated key.
    pub key: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

/// Backend type information for display and identification
#[derive(Debug, Clone, PartialEq)]
pub enum BackendType {
    Local { root: String },
    S3 { bucket: String, region: String, provider: S3Provider },
    Gcs { bucket: String },
    Memory,
}

impl BackendType {
    /// Get a short display name for the backend
    pub fn short_name(&self) -> &'static str {
        match self {
            BackendType::Local { .. } => "Local",
            BackendType::S3 { .. } => "S3",
            BackendType::Gcs { .. } => "GCS",
            BackendType::Memory => "Memory",
        }
    }
}

/// S3-compatible storage providers
#[derive(Debug, Clone, PartialEq)]
pub enum S3Provider {
    Aws,
    DigitalOcean,
    Hetzner,
    MinIO,
    CloudflareR2,
    Wasabi,
    Custom { endpoint: String },
}

impl S3Provider {
    /// Resolve a provider from the `provider` query parameter of an `s3://` URI.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "aws" => Some(S3Provider::Aws),
            "digitalocean" | "do" => Some(S3Provider::DigitalOcean),
            "hetzner" => Some(S3Provider::Hetzner),
            "minio" => Some(S3Provider::MinIO),
            "r2" | "cloudflare" => Some(S3Provider::CloudflareR2),
            "wasabi" => Some(S3Provider::Wasabi),
            _ => None,
        }
    }

    /// Get the endpoint URL for this provider
    pub fn endpoint(&self, region: &str) -> Option<String> {
        match self {
            S3Provider::Aws => None, // Use default AWS endpoint
            S3Provider::DigitalOcean => Some(format!("https://{}.digitaloceanspaces.com", region)),
            S3Provider::Hetzner => Some(format!("https://{}.your-objectstorage.com", region)),
            S3Provider::MinIO => Some("http://localhost:9000".to_string()),
            S3Provider::CloudflareR2 => Some(format!("https://{}.r2.cloudflarestorage.com", region)),
            S3Provider::Wasabi => Some(format!("https://s3.{}.wasabisys.com", region)),
            S3Provider::Custom { endpoint } => Some(endpoint.clone()),
        }
    }
}

/// One side of the sync pair.
///
/// Implementations must make `write` atomic from a concurrent reader's point
/// of view: either the whole new object is visible or the old one is.
#[async_trait]
pub trait Replica: Send + Sync {
    /// Enumerate every object under `prefix` (empty for the whole replica).
    /// Each call re-enumerates from scratch.
    async fn list(&self, prefix: &str) -> ReplicaResult<ObjectStream>;

    /// Open an object for streaming. Fails with `NotFound` if absent.
    async fn read(&self, key: &str) -> ReplicaResult<ByteStream>;

    /// Create or overwrite an object from a stream. Returns bytes written.
    async fn write(&self, key: &str, data: ByteStream) -> ReplicaResult<u64>;

    /// Remove an object. Removing an absent object succeeds.
    async fn delete(&self, key: &str) -> ReplicaResult<()>;

    async fn exists(&self, key: &str) -> ReplicaResult<bool> {
        Ok(self.stat(key).await?.is_some())
    }

    /// Current metadata of an object, `None` if absent.
    async fn stat(&self, key: &str) -> ReplicaResult<Option<ObjectInfo>>;

    /// Read a whole (small) object into memory.
    async fn read_all(&self, key: &str) -> ReplicaResult<Vec<u8>> {
        let chunks: Vec<Vec<u8>> = self
            .read(key)
            .await?
            .try_collect()
            .await
            .map_err(|e| ReplicaError::io(key, e))?;
        Ok(chunks.concat())
    }

    /// Write a whole (small) object from memory.
    async fn write_all(&self, key: &str, data: Vec<u8>) -> ReplicaResult<u64> {
        let stream = futures::stream::iter(std::iter::once(Ok::<_, std::io::Error>(data)));
        self.write(key, stream.boxed()).await
    }

    /// Get the backend type
    fn backend_type(&self) -> BackendType;

    /// Human-readable location of a key, for logs.
    fn display_path(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Reject keys that are empty, absolute, or step outside the replica root.
pub fn validate_key(key: &str) -> ReplicaResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(ReplicaError::InvalidKey { key: key.to_string() });
    }
    Ok(())
}
