// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared (external key/value store) token bucket backend.
//!
//! The upstream store itself is out of scope for mcpguard (see the
//! specification's "out of scope" list); this module implements the client
//! side of its contract only, behind the [`SharedQuotaClient`] trait, plus a
//! concrete Redis-backed client when the `shared-backend` feature is
//! enabled.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::error::RateLimitError;
use crate::QuotaBackend;

/// The atomic contract a shared quota store must implement: evaluate
/// refill-then-check-then-decrement as a single server-side operation, and
/// read the current token count without mutating it.
#[async_trait]
pub trait SharedQuotaClient: Send + Sync {
    /// Atomically refill, check, and (on success) decrement the bucket at
    /// `key`, setting its expiry to `ceil(2*capacity/refill_rate)` seconds.
    ///
    /// Returns `(allowed, tokens_after)`.
    async fn eval_bucket(
        &self,
        key: &str,
        capacity: u32,
        refill_rate: f64,
        tokens: u32,
        now: f64,
    ) -> Result<(bool, f64), RateLimitError>;

    /// Refill (without decrementing) and return the current token count,
    /// or `capacity` if the key has never been observed.
    async fn read_bucket(
        &self,
        key: &str,
        capacity: u32,
        refill_rate: f64,
        now: f64,
    ) -> Result<f64, RateLimitError>;
}

fn bucket_key(identity: &str, tool: &str) -> String {
    format!("mcpguard:bucket:{identity}:{tool}")
}

/// Token bucket backend delegating to an external store via
/// [`SharedQuotaClient`], so concurrent gateway processes race-free.
///
/// A transport error from the client is **not** treated as fail-open: it
/// propagates as [`RateLimitError::Backend`] and the caller must treat the
/// in-flight request as failed, per the design's fail-closed rule.
pub struct SharedBackend {
    capacity: u32,
    refill_rate: f64,
    client: Arc<dyn SharedQuotaClient>,
    clock: Arc<dyn Clock>,
}

impl SharedBackend {
    /// Build a shared backend over a given client implementation.
    #[must_use]
    pub fn new(
        capacity: u32,
        refill_rate: f64,
        client: Arc<dyn SharedQuotaClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            capacity,
            refill_rate,
            client,
            clock,
        }
    }
}

#[async_trait]
impl QuotaBackend for SharedBackend {
    async fn consume(&self, identity: &str, tool: &str, n: u32) -> Result<bool, RateLimitError> {
        let key = bucket_key(identity, tool);
        let now = self.clock.now();
        let (allowed, _) = self
            .client
            .eval_bucket(&key, self.capacity, self.refill_rate, n, now)
            .await?;
        Ok(allowed)
    }

    async fn get_remaining(&self, identity: &str, tool: &str) -> Result<i64, RateLimitError> {
        let key = bucket_key(identity, tool);
        let now = self.clock.now();
        let tokens = self
            .client
            .read_bucket(&key, self.capacity, self.refill_rate, now)
            .await?;
        Ok(tokens.floor() as i64)
    }
}

#[cfg(feature = "shared-backend")]
mod redis_client {
    use super::{RateLimitError, SharedQuotaClient};
    use async_trait::async_trait;
    use redis::{AsyncCommands, Script};

    /// Evaluates the refill-check-decrement bucket contract as a single Lua
    /// script on a Redis (or Redis-protocol-compatible) server, so
    /// concurrent gateway processes cannot race on the same bucket.
    const BUCKET_SCRIPT: &str = r"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local tokens = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local current_tokens = tonumber(bucket[1])
local last_refill = tonumber(bucket[2])
if not current_tokens then
    current_tokens = capacity
    last_refill = now
end
local delta = now - last_refill
if delta > 0 then
    current_tokens = math.min(capacity, current_tokens + delta * refill_rate)
    last_refill = now
end
local ttl = math.ceil(capacity / refill_rate) * 2
if current_tokens >= tokens then
    current_tokens = current_tokens - tokens
    redis.call('HMSET', key, 'tokens', current_tokens, 'last_refill', last_refill)
    redis.call('EXPIRE', key, ttl)
    return {1, tostring(current_tokens)}
else
    redis.call('HMSET', key, 'tokens', current_tokens, 'last_refill', last_refill)
    redis.call('EXPIRE', key, ttl)
    return {0, tostring(current_tokens)}
end
";

    /// [`SharedQuotaClient`] backed by a live Redis connection.
    pub struct RedisQuotaClient {
        client: redis::Client,
        script: Script,
    }

    impl RedisQuotaClient {
        /// Build a client from a Redis connection string
        /// (`policy.rate_limit.shared_dsn`).
        pub fn connect(dsn: &str) -> Result<Self, RateLimitError> {
            let client = redis::Client::open(dsn)
                .map_err(|e| RateLimitError::Backend(e.to_string()))?;
            Ok(Self {
                client,
                script: Script::new(BUCKET_SCRIPT),
            })
        }

        async fn connection(
            &self,
        ) -> Result<redis::aio::MultiplexedConnection, RateLimitError> {
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| RateLimitError::Backend(e.to_string()))
        }
    }

    #[async_trait]
    impl SharedQuotaClient for RedisQuotaClient {
        async fn eval_bucket(
            &self,
            key: &str,
            capacity: u32,
            refill_rate: f64,
            tokens: u32,
            now: f64,
        ) -> Result<(bool, f64), RateLimitError> {
            let mut conn = self.connection().await?;
            let (allowed, tokens_after): (i64, String) = self
                .script
                .key(key)
                .arg(capacity)
                .arg(refill_rate)
                .arg(tokens)
                .arg(now)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| RateLimitError::Backend(e.to_string()))?;
            let tokens_after: f64 = tokens_after
                .parse()
                .map_err(|_| RateLimitError::Backend("malformed token count".to_string()))?;
            Ok((allowed == 1, tokens_after))
        }

        async fn read_bucket(
            &self,
            key: &str,
            capacity: u32,
            refill_rate: f64,
            now: f64,
        ) -> Result<f64, RateLimitError> {
            let mut conn = self.connection().await?;
            let raw: (Option<f64>, Option<f64>) = conn
                .hget(key, ("tokens", "last_refill"))
                .await
                .map_err(|e| RateLimitError::Backend(e.to_string()))?;
            let (tokens, last_refill) = match raw {
                (Some(t), Some(lr)) => (t, lr),
                _ => return Ok(capacity as f64),
            };
            let delta = now - last_refill;
            if delta > 0.0 {
                Ok((tokens + delta * refill_rate).min(capacity as f64))
            } else {
                Ok(tokens)
            }
        }
    }
}

#[cfg(feature = "shared-backend")]
pub use redis_client::RedisQuotaClient;
