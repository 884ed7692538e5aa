//! Carries out planned actions against the replicas.
//!
//! Transfers stream source to destination in bounded chunks, hashing the
//! bytes on the way through. No internal retries: a failed action leaves
//! the registry untouched and the next cycle plans it again.

use anyhow::{bail, Context, Result};
use humansize::{format_size, DECIMAL};
use std::sync::Arc;
use tracing::{debug, info};

use crate::fs::Replica;
use crate::sync::engine::{ActionKind, ActionOutcome, Direction, PlannedAction};
use crate::sync::hash::{hash_object, HashTap};
use crate::sync::registry::ReplicaSide;
use crate::sync::throttle::BandwidthLimiter;

pub struct Executor {
    local: Arc<dyn Replica>,
    remote: Arc<dyn Replica>,
    limiter: BandwidthLimiter,
    /// Re-read the destination after every transfer and compare hashes.
    verify: bool,
}

impl Executor {
    pub fn new(
        local: Arc<dyn Replica>,
        remote: Arc<dyn Replica>,
        limiter: BandwidthLimiter,
        verify: bool,
    ) -> Self {
        Self {
            local,
            remote,
            limiter,
            verify,
        }
    }

    fn replica(&self, side: ReplicaSide) -> &dyn Replica {
        match side {
            ReplicaSide::Local => self.local.as_ref(),
            ReplicaSide::Remote => self.remote.as_ref(),
        }
    }

    pub async fn execute(&self, action: &PlannedAction) -> Result<ActionOutcome> {
        match &action.kind {
            ActionKind::Transfer {
                direction, hash, ..
            } => self.transfer(&action.key, *direction, hash.as_deref()).await,
            ActionKind::DeleteLocal => self.delete(&action.key, ReplicaSide::Local).await,
            ActionKind::DeleteRemote => self.delete(&action.key, ReplicaSide::Remote).await,
            ActionKind::NoOp { .. } | ActionKind::Prune => Ok(ActionOutcome::Settled),
        }
    }

    async fn transfer(
        &self,
        key: &str,
        direction: Direction,
        planned_hash: Option<&str>,
    ) -> Result<ActionOutcome> {
        let source = self.replica(direction.source());
        let destination = self.replica(direction.destination());

        let stream = source
            .read(key)
            .await
            .with_context(|| format!("Failed to read {}", source.display_path(key)))?;

        let tap = HashTap::new();
        let stream = tap.tap(self.limiter.throttle(stream));
        let bytes = destination
            .write(key, stream)
            .await
            .with_context(|| format!("Failed to write {}", destination.display_path(key)))?;
        let digest = tap.finish();

        if let Some(planned) = planned_hash {
            if planned != digest.value {
                debug!(key = %key, "Source changed between planning and transfer");
            }
        }

        if self.verify {
            let written = hash_object(destination, key)
                .await
                .with_context(|| format!("Failed to verify {}", destination.display_path(key)))?;
            if written.value != digest.value {
                bail!(
                    "Verification failed for {}: wrote {} but destination hashes to {}",
                    destination.display_path(key),
                    digest.value,
                    written.value
                );
            }
        }

        let Some(written) = destination
            .stat(key)
            .await
            .with_context(|| format!("Failed to stat {}", destination.display_path(key)))?
        else {
            bail!("{} vanished right after being written", destination.display_path(key));
        };

        info!(
            key = %key,
            direction = %direction,
            size = %format_size(bytes, DECIMAL),
            "Transferred"
        );
        Ok(ActionOutcome::Transferred {
            hash: digest.value,
            bytes,
            destination_modified: written.modified,
        })
    }

    async fn delete(&self, key: &str, side: ReplicaSide) -> Result<ActionOutcome> {
        let replica = self.replica(side);
        replica
            .delete(key)
            .await
            .with_context(|| format!("Failed to delete {}", replica.display_path(key)))?;
        info!(key = %key, side = %side, "Deleted");
        Ok(ActionOutcome::Deleted)
    }
}
