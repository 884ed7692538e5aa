//! Replica URI parsing.
//!
//! Accepted forms:
//! - `/abs/path`, `./rel/path`, `file:///abs/path` → local directory
//! - `s3://bucket/prefix?region=eu-west-1&provider=minio&endpoint=https://…`
//! - `gs://bucket/prefix`
//! - `memory://` (in-process, for dry runs)

use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::error::{ReplicaError, ReplicaResult};
use crate::fs::backend::{Replica, S3Provider};
use crate::fs::local::LocalReplica;
use crate::fs::object::ObjectReplica;

/// Backend settings that do not fit in the URI itself.
#[derive(Debug, Clone, Default)]
pub struct ReplicaOptions {
    /// Default S3 region when the URI has no `region` parameter.
    pub s3_region: Option<String>,
    /// Explicit S3 endpoint (overrides the provider's).
    pub s3_endpoint: Option<String>,
    /// Service-account JSON file for GCS.
    pub gcs_credential_path: Option<PathBuf>,
}

/// Parsed replica location.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaLocation {
    Local(PathBuf),
    S3 {
        bucket: String,
        prefix: String,
        region: Option<String>,
        provider: S3Provider,
    },
    Gcs { bucket: String, prefix: String },
    Memory,
}

impl ReplicaLocation {
    pub fn parse(uri: &str, options: &ReplicaOptions) -> ReplicaResult<Self> {
        let unsupported = || ReplicaError::Unsupported { uri: uri.to_string() };

        if !uri.contains("://") {
            if uri.is_empty() {
                return Err(unsupported());
            }
            return Ok(ReplicaLocation::Local(PathBuf::from(uri)));
        }

        let url = Url::parse(uri).map_err(|_| unsupported())?;
        let prefix = url.path().trim_matches('/').to_string();
        match url.scheme() {
            "file" => url
                .to_file_path()
                .map(ReplicaLocation::Local)
                .map_err(|_| unsupported()),
            "s3" => {
                let bucket = url.host_str().ok_or_else(unsupported)?.to_string();
                let mut region = options.s3_region.clone();
                let mut provider = S3Provider::Aws;
                let mut endpoint = options.s3_endpoint.clone();
                for (name, value) in url.query_pairs() {
                    match name.as_ref() {
                        "region" => region = Some(value.to_string()),
                        "provider" => {
                            provider = S3Provider::from_name(&value).ok_or_else(unsupported)?
                        }
                        "endpoint" => endpoint = Some(value.to_string()),
                        _ => {}
                    }
                }
                if let Some(endpoint) = endpoint {
                    provider = S3Provider::Custom { endpoint };
                }
                Ok(ReplicaLocation::S3 {
                    bucket,
                    prefix,
                    region,
                    provider,
                })
            }
            "gs" | "gcs" => {
                let bucket = url.host_str().ok_or_else(unsupported)?.to_string();
                Ok(ReplicaLocation::Gcs { bucket, prefix })
            }
            "memory" | "mem" => Ok(ReplicaLocation::Memory),
            _ => Err(unsupported()),
        }
    }
}

/// Open the replica named by `uri`.
///
/// A local directory must already exist; it is never created here.
pub async fn open_replica(uri: &str, options: &ReplicaOptions) -> ReplicaResult<Arc<dyn Replica>> {
    match ReplicaLocation::parse(uri, options)? {
        ReplicaLocation::Local(root) => {
            let metadata = tokio::fs::metadata(&root)
                .await
                .map_err(|e| ReplicaError::io(root.display().to_string(), e))?;
            if !metadata.is_dir() {
                return Err(ReplicaError::InvalidKey {
                    key: root.display().to_string(),
                });
            }
            Ok(Arc::new(LocalReplica::new(root)))
        }
        ReplicaLocation::S3 {
            bucket,
            prefix,
            region,
            provider,
        } => {
            let region = region.unwrap_or_else(|| "us-east-1".to_string());
            Ok(Arc::new(ObjectReplica::s3(&bucket, &prefix, &region, provider)?))
        }
        ReplicaLocation::Gcs { bucket, prefix } => Ok(Arc::new(ObjectReplica::gcs(
            &bucket,
            &prefix,
            options.gcs_credential_path.as_deref(),
        )?)),
        ReplicaLocation::Memory => Ok(Arc::new(ObjectReplica::memory()?)),
    }
}
