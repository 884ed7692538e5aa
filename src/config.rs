//! Configuration loading.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Default values
//! 2. TOML file (`--config`, else `<config dir>/filesync/config.toml`)
//! 3. Environment (`FILESYNC_LOCAL_DIR`, `FILESYNC_REMOTE`, `FILESYNC_INTERVAL_SECS`)
//! 4. Command-line flags
//!
//! ```toml
//! local_dir = "/home/me/Documents"
//! remote = "s3://my-bucket/documents?region=eu-west-1"
//! interval_secs = 5
//! exclude = ["*.log", "build/"]
//! bandwidth_limit = 2_000_000
//! ```

use anyhow::{bail, Context, Result};
use chrono::Duration as TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fs::ReplicaOptions;
use crate::sync::{
    BandwidthLimit, EngineOptions, ExcludePatterns, LoopOptions, SyncOptions, TieBreak,
};

pub const ENV_LOCAL_DIR: &str = "FILESYNC_LOCAL_DIR";
pub const ENV_REMOTE: &str = "FILESYNC_REMOTE";
pub const ENV_INTERVAL_SECS: &str = "FILESYNC_INTERVAL_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Local directory to keep in sync. Must already exist.
    pub local_dir: Option<PathBuf>,
    /// Remote replica URI, e.g. `s3://bucket/prefix` or `gs://bucket`.
    pub remote: Option<String>,
    pub interval_secs: u64,
    /// Modification times closer than this are considered equal.
    pub min_time_delta_ms: u64,
    pub tie_break: TieBreak,
    pub exclude: Vec<String>,
    pub use_default_excludes: bool,
    pub transfer_concurrency: usize,
    /// Bytes per second, 0 for unlimited.
    pub bandwidth_limit: u64,
    pub verify: bool,
    /// Remote-only polling period between cycles.
    pub quick_scan_secs: Option<u64>,
    pub max_backoff_secs: u64,
    pub gcs_credential_path: Option<PathBuf>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_dir: None,
            remote: None,
            interval_secs: 5,
            min_time_delta_ms: 1000,
            tie_break: TieBreak::Local,
            exclude: Vec::new(),
            use_default_excludes: true,
            transfer_concurrency: 4,
            bandwidth_limit: 0,
            verify: false,
            quick_scan_secs: None,
            max_backoff_secs: 300,
            gcs_credential_path: None,
            s3_region: None,
            s3_endpoint: None,
        }
    }
}

impl Config {
    /// `<config dir>/filesync/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("filesync").join("config.toml"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid configuration file")
    }

    /// Defaults overlaid with the config file and the environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read_file(&path)?,
                Some(path) => {
                    debug!(path = %path.display(), "No config file, using defaults");
                    Self::default()
                }
                None => Self::default(),
            },
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading config");
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("In {}", path.display()))
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_LOCAL_DIR) {
            debug!(local_dir = %dir, "Overriding local dir from environment");
            self.local_dir = Some(PathBuf::from(dir));
        }

        if let Some(remote) = lookup(ENV_REMOTE) {
            debug!(remote = %remote, "Overriding remote from environment");
            self.remote = Some(remote);
        }

        if let Some(interval) = lookup(ENV_INTERVAL_SECS) {
            match interval.parse::<u64>() {
                Ok(secs) => self.interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring invalid {}", ENV_INTERVAL_SECS),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_dir.is_none() {
            bail!("No local directory configured (--local or {})", ENV_LOCAL_DIR);
        }
        match &self.remote {
            None => bail!("No remote replica configured (--remote or {})", ENV_REMOTE),
            Some(remote) if remote.trim().is_empty() => bail!("Remote replica URI is empty"),
            Some(_) => {}
        }
        if self.interval_secs == 0 {
            bail!("interval_secs must be greater than 0");
        }
        if self.transfer_concurrency == 0 {
            bail!("transfer_concurrency must be greater than 0");
        }
        if self.quick_scan_secs == Some(0) {
            bail!("quick_scan_secs must be greater than 0 when set");
        }
        Ok(())
    }

    pub fn replica_options(&self) -> ReplicaOptions {
        ReplicaOptions {
            s3_region: self.s3_region.clone(),
            s3_endpoint: self.s3_endpoint.clone(),
            gcs_credential_path: self.gcs_credential_path.clone(),
        }
    }

    pub fn sync_options(&self) -> Result<SyncOptions> {
        let min_time_delta = i64::try_from(self.min_time_delta_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .context("min_time_delta_ms is out of range")?;
        Ok(SyncOptions {
            engine: EngineOptions {
                min_time_delta,
                tie_break: self.tie_break,
            },
            excludes: ExcludePatterns::build(&self.exclude, self.use_default_excludes)?,
            transfer_concurrency: self.transfer_concurrency,
            bandwidth: BandwidthLimit::new(self.bandwidth_limit),
            verify: self.verify,
        })
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            interval: Duration::from_secs(self.interval_secs),
            quick_scan: self.quick_scan_secs.map(Duration::from_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }
}
