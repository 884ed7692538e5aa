use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{ReplicaError, ReplicaResult};
use crate::fs::backend::{
    validate_key, BackendType, ByteStream, ObjectInfo, ObjectStream, Replica, CHUNK_SIZE,
};

/// Prefix of in-flight write files. Hidden, so listings never report them.
const TEMP_PREFIX: &str = ".filesync-tmp-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local directory tree as a replica.
pub struct LocalReplica {
    root: PathBuf,
}

impl LocalReplica {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, key: &str) -> ReplicaResult<PathBuf> {
        validate_key(key)?;
        let mut path = self.root.clone();
        path.extend(key.split('/'));
        Ok(path)
    }

    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        path.with_file_name(format!("{}{}-{}-{}", TEMP_PREFIX, name, std::process::id(), seq))
    }

    /// Remove directories left empty by a delete, stopping at the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            debug!(dir = %dir.display(), "Removed empty directory");
            current = dir.parent();
        }
    }
}

/// Relative `/`-separated key for a path under `root`. `None` for non-UTF-8 names.
fn key_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        segments.push(component.as_os_str().to_str()?.to_string());
    }
    Some(segments.join("/"))
}

fn object_info(key: String, metadata: &std::fs::Metadata) -> ObjectInfo {
    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    ObjectInfo {
        key,
        modified,
        size: metadata.len(),
    }
}

#[async_trait]
impl Replica for LocalReplica {
    async fn list(&self, prefix: &str) -> ReplicaResult<ObjectStream> {
        let root_display = self.root.display().to_string();
        let is_dir = tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .map_err(|e| ReplicaError::io(root_display.clone(), e))?;
        if !is_dir {
            // A missing or unmounted root must never read as "everything was deleted".
            return Err(ReplicaError::NotFound { key: root_display });
        }

        let start = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.full_path(prefix.trim_end_matches('/'))?
        };
        if !start.exists() {
            return Ok(futures::stream::empty().boxed());
        }

        let root = self.root.clone();
        let (tx, rx) = tokio::sync::mpsc::channel::<ReplicaResult<ObjectInfo>>(256);
        tokio::task::spawn_blocking(move || {
            for entry in jwalk::WalkDir::new(&start).skip_hidden(false).sort(true) {
                let item = match entry {
                    Ok(entry) => {
                        if !entry.file_type().is_file() {
                            continue;
                        }
                        let path = entry.path();
                        let Some(key) = key_for(&root, &path) else {
                            warn!(path = %path.display(), "Skipping file with non UTF-8 name");
                            continue;
                        };
                        match std::fs::metadata(&path) {
                            Ok(metadata) => Ok(object_info(key, &metadata)),
                            // Removed between the directory read and the stat.
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                            Err(e) => Err(ReplicaError::io(key, e)),
                        }
                    }
                    Err(e) => Err(ReplicaError::Io {
                        key: start.display().to_string(),
                        source: std::io::Error::other(e.to_string()),
                    }),
                };
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn read(&self, key: &str) -> ReplicaResult<ByteStream> {
        let path = self.full_path(key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| ReplicaError::io(key, e))?;

        let stream = futures::stream::try_unfold(file, |mut file| async move {
            let mut buffer = vec![0u8; CHUNK_SIZE];
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                return Ok::<_, std::io::Error>(None);
            }
            buffer.truncate(n);
            Ok(Some((buffer, file)))
        });
        Ok(stream.boxed())
    }

    async fn write(&self, key: &str, mut data: ByteStream) -> ReplicaResult<u64> {
        let path = self.full_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ReplicaError::io(key, e))?;
        }

        let temp = Self::temp_path(&path);
        let result: std::io::Result<u64> = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            let mut written = 0u64;
            while let Some(chunk) = data.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp, &path).await?;
            Ok(written)
        }
        .await;

        match result {
            Ok(written) => Ok(written),
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                Err(ReplicaError::Io {
                    key: key.to_string(),
                    source: e,
                })
            }
        }
    }

    async fn delete(&self, key: &str) -> ReplicaResult<()> {
        let path = self.full_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ReplicaError::io(key, e)),
        }
    }

    async fn stat(&self, key: &str) -> ReplicaResult<Option<ObjectInfo>> {
        let path = self.full_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(object_info(key.to_string(), &metadata))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ReplicaError::io(key, e)),
        }
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Local {
            root: self.root.display().to_string(),
        }
    }

    fn display_path(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }
}
