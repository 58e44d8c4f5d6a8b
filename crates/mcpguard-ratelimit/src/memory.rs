// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-process token bucket backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::RateLimitError;
use crate::QuotaBackend;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: f64,
}

/// Token bucket state kept in a single process, one bucket per
/// `(identity, tool)` pair. Created lazily on first observation and never
/// evicted for the lifetime of the process.
///
/// The mutex is held across the entire refill-check-decrement sequence so
/// two concurrent callers for the same key can never both observe the
/// bucket above threshold.
pub struct MemoryBackend {
    capacity: u32,
    refill_rate: f64,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<(String, String), Bucket>>,
}

impl MemoryBackend {
    /// Build a memory backend with the given capacity and refill rate.
    #[must_use]
    pub fn new(capacity: u32, refill_rate: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            refill_rate,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: f64) {
        let delta = now - bucket.last_refill;
        if delta > 0.0 {
            bucket.tokens = (bucket.tokens + delta * self.refill_rate).min(self.capacity as f64);
            bucket.last_refill = now;
        }
    }
}

#[async_trait]
impl QuotaBackend for MemoryBackend {
    async fn consume(&self, identity: &str, tool: &str, n: u32) -> Result<bool, RateLimitError> {
        if n == 0 {
            return Ok(true);
        }
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry((identity.to_string(), tool.to_string()))
            .or_insert(Bucket {
                tokens: self.capacity as f64,
                last_refill: now,
            });
        self.refill(bucket, now);
        if bucket.tokens >= n as f64 {
            bucket.tokens -= n as f64;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get_remaining(&self, identity: &str, tool: &str) -> Result<i64, RateLimitError> {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry((identity.to_string(), tool.to_string()))
            .or_insert(Bucket {
                tokens: self.capacity as f64,
                last_refill: now,
            });
        self.refill(bucket, now);
        Ok(bucket.tokens.floor() as i64)
    }
}
