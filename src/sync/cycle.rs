//! One reconciliation cycle: list → plan → execute → persist.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use humansize::{format_size, DECIMAL};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::fs::Replica;
use crate::sync::engine::{
    ActionKind, ActionOutcome, Direction, EngineOptions, Plan, PlannedAction, Reconciler,
};
use crate::sync::exclude::ExcludePatterns;
use crate::sync::executor::Executor;
use crate::sync::lister::{Fingerprint, Lister, Listing};
use crate::sync::registry::Registry;
use crate::sync::throttle::{BandwidthLimit, BandwidthLimiter};

/// Default number of transfers or deletes in flight within one cycle.
pub const DEFAULT_TRANSFER_CONCURRENCY: usize = 4;

/// Everything a [`Syncer`] needs besides the two replicas.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub engine: EngineOptions,
    pub excludes: ExcludePatterns,
    pub transfer_concurrency: usize,
    pub bandwidth: BandwidthLimit,
    pub verify: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            excludes: ExcludePatterns::new(),
            transfer_concurrency: DEFAULT_TRANSFER_CONCURRENCY,
            bandwidth: BandwidthLimit::unlimited(),
            verify: false,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub uploads: usize,
    pub downloads: usize,
    pub deleted_local: usize,
    pub deleted_remote: usize,
    pub noops: usize,
    pub prunes: usize,
    /// Keys that could not be planned or whose action failed.
    pub failures: usize,
    pub bytes_transferred: u64,
    pub duration: Duration,
    /// Remote listing summary, the baseline for quick scans.
    pub remote_fingerprint: Fingerprint,
}

impl CycleReport {
    /// Number of actions applied, registry-only ones included.
    pub fn applied(&self) -> usize {
        self.uploads
            + self.downloads
            + self.deleted_local
            + self.deleted_remote
            + self.noops
            + self.prunes
    }

    /// Nothing was done and nothing failed.
    pub fn is_idle(&self) -> bool {
        self.applied() == 0 && self.failures == 0
    }

    fn record(&mut self, action: &PlannedAction, outcome: &ActionOutcome) {
        match &action.kind {
            ActionKind::Transfer {
                direction: Direction::Upload,
                ..
            } => self.uploads += 1,
            ActionKind::Transfer {
                direction: Direction::Download,
                ..
            } => self.downloads += 1,
            ActionKind::DeleteLocal => self.deleted_local += 1,
            ActionKind::DeleteRemote => self.deleted_remote += 1,
            ActionKind::NoOp { .. } => self.noops += 1,
            ActionKind::Prune => self.prunes += 1,
        }
        if let ActionOutcome::Transferred { bytes, .. } = outcome {
            self.bytes_transferred += bytes;
        }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} up, {} down, {} deleted locally, {} deleted remotely, {} refreshed, {} pruned, {} failed ({}) in {:.2?}",
            self.uploads,
            self.downloads,
            self.deleted_local,
            self.deleted_remote,
            self.noops,
            self.prunes,
            self.failures,
            format_size(self.bytes_transferred, DECIMAL),
            self.duration
        )
    }
}

/// Owns a replica pair and runs cycles over it. Cycles take `&self` but
/// must not overlap: the sync loop awaits one before starting the next.
pub struct Syncer {
    local: Arc<dyn Replica>,
    remote: Arc<dyn Replica>,
    lister: Lister,
    engine: EngineOptions,
    executor: Executor,
    concurrency: usize,
}

impl Syncer {
    pub fn new(local: Arc<dyn Replica>, remote: Arc<dyn Replica>, options: SyncOptions) -> Self {
        debug!(
            bandwidth = %options.bandwidth.display(),
            concurrency = options.transfer_concurrency,
            verify = options.verify,
            "Creating syncer"
        );
        let executor = Executor::new(
            Arc::clone(&local),
            Arc::clone(&remote),
            BandwidthLimiter::new(options.bandwidth),
            options.verify,
        );
        Self {
            local,
            remote,
            lister: Lister::new(options.excludes),
            engine: options.engine,
            executor,
            concurrency: options.transfer_concurrency.max(1),
        }
    }

    pub fn local(&self) -> &Arc<dyn Replica> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn Replica> {
        &self.remote
    }

    /// Read the registry from the remote replica.
    pub async fn load_registry(&self) -> Result<Registry> {
        Registry::load(self.remote.as_ref())
            .await
            .context("Failed to load registry")
    }

    /// List the remote replica only and summarize it.
    pub async fn remote_fingerprint(&self) -> Result<Fingerprint> {
        let listing = self
            .lister
            .list(self.remote.as_ref())
            .await
            .context("Failed to list remote replica")?;
        Ok(listing.fingerprint())
    }

    async fn snapshot(&self) -> Result<(Listing, Listing, Registry)> {
        let local = async {
            self.lister
                .list(self.local.as_ref())
                .await
                .context("Failed to list local replica")
        };
        let remote = async {
            self.lister
                .list(self.remote.as_ref())
                .await
                .context("Failed to list remote replica")
        };
        tokio::try_join!(local, remote, self.load_registry())
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(self.local.as_ref(), self.remote.as_ref(), self.engine)
    }

    /// Plan a cycle without executing it or saving the registry.
    pub async fn plan(&self) -> Result<Plan> {
        let (local, remote, registry) = self.snapshot().await?;
        Ok(self.reconciler().plan(&local, &remote, &registry).await)
    }

    /// Run one full cycle.
    ///
    /// Listing or registry-load failures abort the cycle before anything is
    /// changed. Per-key failures are counted and skipped; their records stay
    /// as they were so the next cycle retries them.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let (local, remote, mut registry) = self.snapshot().await?;
        let plan = self.reconciler().plan(&local, &remote, &registry).await;

        let mut report = CycleReport {
            remote_fingerprint: remote.fingerprint(),
            failures: plan.failures.len(),
            ..Default::default()
        };
        let mut dirty = false;

        let (io_actions, registry_actions): (Vec<_>, Vec<_>) =
            plan.actions.into_iter().partition(PlannedAction::needs_io);

        for action in registry_actions {
            apply(&mut registry, &action, &ActionOutcome::Settled);
            report.record(&action, &ActionOutcome::Settled);
            dirty = true;
        }

        let executor = &self.executor;
        let mut results = futures::stream::iter(io_actions.into_iter().map(|action| async move {
            let result = executor.execute(&action).await;
            (action, result)
        }))
        .buffer_unordered(self.concurrency);

        while let Some((action, result)) = results.next().await {
            match result {
                Ok(outcome) => {
                    apply(&mut registry, &action, &outcome);
                    report.record(&action, &outcome);
                    dirty = true;
                }
                Err(e) => {
                    warn!(
                        key = %action.key,
                        action = action.label(),
                        error = %format!("{:#}", e),
                        "Action failed, will retry next cycle"
                    );
                    report.failures += 1;
                }
            }
        }

        if dirty {
            registry
                .save(self.remote.as_ref())
                .await
                .context("Failed to save registry")?;
        }

        // The quick scan baseline must include this cycle's own remote writes
        if report.uploads + report.deleted_remote > 0 {
            match self.remote_fingerprint().await {
                Ok(fingerprint) => report.remote_fingerprint = fingerprint,
                Err(e) => debug!(error = %format!("{:#}", e), "Could not refresh remote fingerprint"),
            }
        }

        report.duration = started.elapsed();
        if report.is_idle() {
            debug!(local = local.len(), remote = remote.len(), "Cycle idle");
        } else {
            info!("Cycle finished: {}", report);
        }
        Ok(report)
    }
}

fn apply(registry: &mut Registry, action: &PlannedAction, outcome: &ActionOutcome) {
    match action.settle(outcome, Utc::now()) {
        Some(record) => registry.insert(action.key.clone(), record),
        None => {
            registry.remove(&action.key);
        }
    }
}
