//! Bandwidth throttling for sync transfers.
//!
//! Provides rate limiting using a token bucket algorithm.

use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::fs::ByteStream;

/// Bandwidth limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandwidthLimit {
    /// Bytes per second limit. Zero means unlimited.
    pub bytes_per_second: u64,
}

impl BandwidthLimit {
    /// Create a new bandwidth limit.
    pub fn new(bytes_per_second: u64) -> Self {
        Self { bytes_per_second }
    }

    /// No limit.
    pub fn unlimited() -> Self {
        Self { bytes_per_second: 0 }
    }

    /// Check if there's a limit.
    pub fn is_limited(&self) -> bool {
        self.bytes_per_second > 0
    }

    /// Format as human-readable string.
    pub fn display(&self) -> String {
        if !self.is_limited() {
            return "unlimited".to_string();
        }
        format!(
            "{}/s",
            humansize::format_size(self.bytes_per_second, humansize::DECIMAL)
        )
    }
}

/// One token per byte, replenished at the configured rate, with at most one
/// second of transfer as burst. Rates beyond `u32::MAX` bytes are capped.
fn quota(limit: BandwidthLimit) -> Option<Quota> {
    let rate = u32::try_from(limit.bytes_per_second).unwrap_or(u32::MAX);
    NonZeroU32::new(rate).map(Quota::per_second)
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Bandwidth limiter shared by every transfer of a sync pair.
#[derive(Clone, Default)]
pub struct BandwidthLimiter {
    limiter: Option<Arc<DirectLimiter>>,
    /// Largest number of tokens a single wait may ask for.
    burst: u32,
}

impl BandwidthLimiter {
    /// Create a new bandwidth limiter.
    pub fn new(limit: BandwidthLimit) -> Self {
        match quota(limit) {
            Some(quota) => Self {
                burst: quota.burst_size().get(),
                limiter: Some(Arc::new(RateLimiter::direct(quota))),
            },
            None => Self::default(),
        }
    }

    /// Create an unlimited limiter.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Wait for permission to transfer `bytes` bytes.
    /// This is a no-op if no limit is set.
    pub async fn acquire(&self, bytes: usize) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let mut remaining = bytes;
        while remaining > 0 {
            let step = remaining.min(self.burst as usize);
            let Some(cells) = NonZeroU32::new(step as u32) else {
                return;
            };
            // Never exceeds the burst, so capacity is always sufficient
            if limiter.until_n_ready(cells).await.is_err() {
                return;
            }
            remaining -= step;
        }
    }

    /// Pace a byte stream: each chunk is released only once the limiter
    /// admits it.
    pub fn throttle(&self, stream: ByteStream) -> ByteStream {
        if self.limiter.is_none() {
            return stream;
        }
        let limiter = self.clone();
        stream
            .then(move |chunk| {
                let limiter = limiter.clone();
                async move {
                    if let Ok(bytes) = &chunk {
                        limiter.acquire(bytes.len()).await;
                    }
                    chunk
                }
            })
            .boxed()
    }
}
