// SPDX-License-Identifier: MIT OR Apache-2.0
//! Failure modes for rate limiter backends.

use thiserror::Error;

/// A rate limiter backend failed to answer a `consume`/`get_remaining` call.
///
/// This is distinct from the policy-level `RateLimitExceeded` denial: it
/// means the backend itself could not be consulted (e.g. the shared store's
/// transport failed), which per the design must surface as a fatal error to
/// the in-flight request rather than fail open.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The shared backend's transport or script evaluation failed.
    #[error("rate limit backend error: {0}")]
    Backend(String),
}
