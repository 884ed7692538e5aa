//! The sync loop: repeated cycles, one at a time, until shutdown.
//!
//! ```text
//!   cycle ──ok──► wait interval (a remote quick scan may end it early) ──┐
//!     ▲   └─err─► wait backoff ──────────────────────────────────────────┤
//!     └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Shutdown is observed between cycles only, so a running cycle always
//! finishes and persists its registry.

use anyhow::Result;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::sync::cycle::Syncer;
use crate::sync::lister::Fingerprint;

/// Timing of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOptions {
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Remote-only polling period while waiting; `None` disables it.
    pub quick_scan: Option<Duration>,
    /// Upper bound for the wait after consecutive failed cycles.
    pub max_backoff: Duration,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            quick_scan: None,
            max_backoff: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Tick,
    RemoteChanged,
    Shutdown,
}

pub struct SyncLoop {
    syncer: Syncer,
    options: LoopOptions,
}

impl SyncLoop {
    pub fn new(syncer: Syncer, options: LoopOptions) -> Self {
        Self { syncer, options }
    }

    pub fn syncer(&self) -> &Syncer {
        &self.syncer
    }

    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.options.interval,
            max_interval: self.options.max_backoff.max(self.options.interval),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }

    /// Run cycles until `shutdown` turns true or its sender is dropped.
    /// Returns the number of cycles started.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<u64> {
        let mut backoff = self.backoff();
        let mut cycles = 0u64;

        info!(
            local = %self.syncer.local().display_path(""),
            remote = %self.syncer.remote().display_path(""),
            interval = ?self.options.interval,
            "Sync loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            cycles += 1;
            let (wait, baseline) = match self.syncer.run_cycle().await {
                Ok(report) => {
                    backoff.reset();
                    (self.options.interval, Some(report.remote_fingerprint))
                }
                Err(e) => {
                    let wait = backoff.next_backoff().unwrap_or(self.options.max_backoff);
                    error!(
                        error = %format!("{:#}", e),
                        retry_in = ?wait,
                        "Sync cycle failed"
                    );
                    (wait, None)
                }
            };

            match self.wait(wait, baseline, &mut shutdown).await {
                Wake::Shutdown => break,
                Wake::RemoteChanged => info!("Remote changed, starting cycle early"),
                Wake::Tick => {}
            }
        }

        info!(cycles, "Sync loop stopped");
        Ok(cycles)
    }

    async fn wait(
        &self,
        duration: Duration,
        baseline: Option<Fingerprint>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Wake {
        let deadline = Instant::now() + duration;
        // Quick scans only make sense against a known baseline.
        let scan_every = self.options.quick_scan.filter(|_| baseline.is_some());

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Wake::Tick;
            }
            let next = match scan_every {
                Some(period) => deadline.min(now + period),
                None => deadline,
            };

            tokio::select! {
                _ = tokio::time::sleep_until(next) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Wake::Shutdown;
                    }
                    continue;
                }
            }

            if next >= deadline {
                return Wake::Tick;
            }
            if let Some(baseline) = baseline {
                match self.syncer.remote_fingerprint().await {
                    Ok(current) if current != baseline => return Wake::RemoteChanged,
                    Ok(_) => {}
                    Err(e) => debug!(error = %format!("{:#}", e), "Quick scan failed"),
                }
            }
        }
    }
}
