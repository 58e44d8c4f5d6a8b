// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cooperative cancellation token for the duplex proxy.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::Notify;

/// Cooperative cancellation token shared between the two halves of a proxied
/// connection.
///
/// Cloneable and backed by an `Arc`; calling [`cancel`](CancelToken::cancel)
/// on any clone signals all waiters, so the client-to-upstream and
/// upstream-to-client forwarding tasks can tear each other down as soon as
/// either one errors.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    /// Create a new, non-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signal cancellation to all waiters.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns `true` if cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is signalled (returns immediately if already
    /// cancelled).
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() should resolve immediately");
    }

    #[tokio::test]
    async fn cancelled_wakes_all_clones() {
        let token = CancelToken::new();
        let a = token.clone();
        let b = token.clone();
        let handle_a = tokio::spawn(async move { a.cancelled().await });
        let handle_b = tokio::spawn(async move { b.cancelled().await });
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), async {
            handle_a.await.unwrap();
            handle_b.await.unwrap();
        })
        .await
        .expect("both waiters should wake up");
    }

    #[test]
    fn is_cancelled_defaults_to_false() {
        let token = CancelToken::default();
        assert!(!token.is_cancelled());
    }
}
