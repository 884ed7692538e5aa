use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use opendal::services::{Gcs, Memory, S3};
use opendal::{Entry, Operator};
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

use crate::error::{ReplicaError, ReplicaResult};
use crate::fs::backend::{
    validate_key, BackendType, ByteStream, ObjectInfo, ObjectStream, Replica, S3Provider,
    CHUNK_SIZE,
};

/// Object storage replica (S3, S3-compatible, GCS, in-memory) using OpenDAL.
pub struct ObjectReplica {
    operator: Operator,
    backend: BackendType,
    /// Printable location prefix, e.g. `s3://bucket/prefix/`.
    location: String,
}

/// Normalize a key prefix into an OpenDAL root (`/prefix/`).
fn operator_root(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

fn to_utc<T: Into<SystemTime>>(time: T) -> DateTime<Utc> {
    DateTime::<Utc>::from(time.into())
}

impl ObjectReplica {
    /// Create an S3 or S3-compatible replica rooted at `prefix` in `bucket`.
    ///
    /// Credentials are not passed explicitly: OpenDAL resolves them from the
    /// standard AWS chain (environment, shared credentials file, instance
    /// profile / task role).
    pub fn s3(bucket: &str, prefix: &str, region: &str, provider: S3Provider) -> ReplicaResult<Self> {
        let root = operator_root(prefix);
        let mut builder = S3::default().bucket(bucket).region(region).root(&root);

        // Set custom endpoint for S3-compatible providers
        if let Some(endpoint) = provider.endpoint(region) {
            builder = builder.endpoint(&endpoint);
        }

        let location = format!("s3://{}{}", bucket, root);
        let operator = Operator::new(builder)
            .map_err(|e| ReplicaError::backend(&location, e))?
            .finish();

        Ok(Self {
            operator,
            backend: BackendType::S3 {
                bucket: bucket.to_string(),
                region: region.to_string(),
                provider,
            },
            location,
        })
    }

    /// Create a Google Cloud Storage replica.
    ///
    /// Without a service-account file, uses Application Default Credentials
    /// (GOOGLE_APPLICATION_CREDENTIALS, gcloud config, GCE metadata server).
    pub fn gcs(bucket: &str, prefix: &str, credential_path: Option<&Path>) -> ReplicaResult<Self> {
        let root = operator_root(prefix);
        let mut builder = Gcs::default().bucket(bucket).root(&root);

        if let Some(path) = credential_path {
            builder = builder.credential_path(&path.to_string_lossy());
        }

        let location = format!("gs://{}{}", bucket, root);
        let operator = Operator::new(builder)
            .map_err(|e| ReplicaError::backend(&location, e))?
            .finish();

        Ok(Self {
            operator,
            backend: BackendType::Gcs {
                bucket: bucket.to_string(),
            },
            location,
        })
    }

    /// Create an in-process replica. Contents vanish with the process.
    pub fn memory() -> ReplicaResult<Self> {
        let location = "memory://".to_string();
        let operator = Operator::new(Memory::default())
            .map_err(|e| ReplicaError::backend(&location, e))?
            .finish();

        Ok(Self {
            operator,
            backend: BackendType::Memory,
            location,
        })
    }
}

/// Build an [`ObjectInfo`] from a listing entry, falling back to `stat` when
/// the service does not report modification times in listings.
async fn entry_info(operator: Operator, entry: Entry) -> ReplicaResult<ObjectInfo> {
    let key = entry.path().to_string();
    let metadata = entry.metadata();

    if let Some(modified) = metadata.last_modified() {
        return Ok(ObjectInfo {
            size: metadata.content_length(),
            modified: to_utc(modified),
            key,
        });
    }

    let stat = operator
        .stat(&key)
        .await
        .map_err(|e| ReplicaError::backend(&key, e))?;
    let modified = match stat.last_modified() {
        Some(modified) => to_utc(modified),
        None => {
            debug!(key = %key, "Backend reports no modification time");
            DateTime::<Utc>::UNIX_EPOCH
        }
    };
    Ok(ObjectInfo {
        size: stat.content_length(),
        modified,
        key,
    })
}

#[async_trait]
impl Replica for ObjectReplica {
    async fn list(&self, prefix: &str) -> ReplicaResult<ObjectStream> {
        let path = prefix.trim_start_matches('/');
        let path = if !path.is_empty() && !path.ends_with('/') {
            format!("{}/", path)
        } else {
            path.to_string()
        };

        let lister = self
            .operator
            .lister_with(&path)
            .recursive(true)
            .await
            .map_err(|e| ReplicaError::backend(&path, e))?;

        let operator = self.operator.clone();
        let stream = lister
            .map_err(move |e| ReplicaError::backend(path.clone(), e))
            .try_filter(|entry| futures::future::ready(entry.metadata().mode().is_file()))
            .and_then(move |entry| entry_info(operator.clone(), entry));
        Ok(stream.boxed())
    }

    async fn read(&self, key: &str) -> ReplicaResult<ByteStream> {
        validate_key(key)?;
        let reader = self
            .operator
            .reader_with(key)
            .chunk(CHUNK_SIZE)
            .await
            .map_err(|e| ReplicaError::backend(key, e))?;
        let stream = reader
            .into_bytes_stream(..)
            .await
            .map_err(|e| ReplicaError::backend(key, e))?;
        Ok(stream.map_ok(|bytes| bytes.to_vec()).boxed())
    }

    async fn write(&self, key: &str, mut data: ByteStream) -> ReplicaResult<u64> {
        validate_key(key)?;
        let mut writer = self
            .operator
            .writer(key)
            .await
            .map_err(|e| ReplicaError::backend(key, e))?;

        // The object only becomes visible on close; abort drops the upload.
        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(ReplicaError::io(key, e));
                }
            };
            written += chunk.len() as u64;
            if let Err(e) = writer.write(chunk).await {
                let _ = writer.abort().await;
                return Err(ReplicaError::backend(key, e));
            }
        }
        writer
            .close()
            .await
            .map_err(|e| ReplicaError::backend(key, e))?;
        Ok(written)
    }

    async fn delete(&self, key: &str) -> ReplicaResult<()> {
        validate_key(key)?;
        match self.operator.delete(key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ReplicaError::backend(key, e)),
        }
    }

    async fn stat(&self, key: &str) -> ReplicaResult<Option<ObjectInfo>> {
        validate_key(key)?;
        match self.operator.stat(key).await {
            Ok(metadata) if metadata.mode().is_file() => Ok(Some(ObjectInfo {
                key: key.to_string(),
                modified: metadata
                    .last_modified()
                    .map(to_utc)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                size: metadata.content_length(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ReplicaError::backend(key, e)),
        }
    }

    fn backend_type(&self) -> BackendType {
        self.backend.clone()
    }

    fn display_path(&self, key: &str) -> String {
        format!("{}{}", self.location, key.trim_start_matches('/'))
    }
}
