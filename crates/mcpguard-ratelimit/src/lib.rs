// SPDX-License-Identifier: MIT OR Apache-2.0
//! Token-bucket rate limiting.
//!
//! Two [`QuotaBackend`] implementations are provided: [`MemoryBackend`] for
//! a single gateway process, and [`SharedBackend`] for multiple gateway
//! processes racing on the same identity/tool buckets through an external
//! store (see the `shared-backend` feature for a Redis-backed client).

mod clock;
mod error;
mod memory;
mod shared;

use async_trait::async_trait;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::RateLimitError;
pub use memory::MemoryBackend;
pub use shared::{SharedBackend, SharedQuotaClient};

#[cfg(feature = "shared-backend")]
pub use shared::RedisQuotaClient;

/// A quota store capable of atomically consuming tokens from, and reporting
/// the remaining tokens in, a per-`(identity, tool)` bucket.
#[async_trait]
pub trait QuotaBackend: Send + Sync {
    /// Attempt to consume `n` tokens from the bucket for `(identity, tool)`.
    ///
    /// Returns `true` if the tokens were available and have been
    /// decremented, `false` if the bucket did not have enough tokens (in
    /// which case it is left unchanged).
    async fn consume(&self, identity: &str, tool: &str, n: u32) -> Result<bool, RateLimitError>;

    /// Current token count for `(identity, tool)`, after refilling, without
    /// consuming any tokens.
    async fn get_remaining(&self, identity: &str, tool: &str) -> Result<i64, RateLimitError>;
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    proptest! {
        /// Invariant: regardless of how many single-token `consume` calls
        /// are issued, the remaining token count never exceeds `capacity`,
        /// and never goes negative.
        #[test]
        fn remaining_never_exceeds_capacity_or_goes_negative(
            capacity in 1u32..50,
            refill_rate in 0.1f64..10.0,
            calls in 1usize..200,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let observations: Vec<i64> = rt.block_on(async {
                let clock = FakeClock::new();
                let backend = MemoryBackend::new(capacity, refill_rate, Arc::new(clock.clone()));
                let mut observed = Vec::with_capacity(calls);
                for i in 0..calls {
                    if i % 3 == 0 {
                        clock.advance(0.1);
                    }
                    let _ = backend.consume("id", "tool", 1).await.unwrap();
                    observed.push(backend.get_remaining("id", "tool").await.unwrap());
                }
                observed
            });
            for remaining in observations {
                prop_assert!(remaining >= 0);
                prop_assert!(remaining <= capacity as i64);
            }
        }
    }
}
