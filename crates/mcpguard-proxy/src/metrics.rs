//! In-memory counters exposed at `/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Connection-lifetime counters for one [`crate::ProxyServer`].
#[derive(Debug, Default)]
pub struct Metrics {
    allowed: AtomicU64,
    denied: AtomicU64,
    errors: AtomicU64,
}

impl Metrics {
    /// Record one admitted (and forwarded) tool call.
    pub fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one denied tool call.
    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one connection that ended in a transport or backend error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time copy of the counters, suitable for serialization.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of [`Metrics`], returned by the `/metrics` endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    /// Tool calls admitted and forwarded upstream.
    pub allowed: u64,
    /// Tool calls rejected by policy.
    pub denied: u64,
    /// Connections that ended in a transport or backend error.
    pub errors: u64,
}
