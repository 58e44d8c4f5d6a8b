// SPDX-License-Identifier: MIT OR Apache-2.0
//! mcpguard-proxy
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Full-duplex WebSocket proxy (component C9): accepts a client connection,
//! opens a matching connection to the backend tool server, and relays frames
//! between the two. Every client-to-upstream frame that decodes as a
//! `tool_call` envelope is evaluated by a [`Guard`](mcpguard_guard::Guard)
//! before it is forwarded; everything else passes through untouched.

mod envelope;
mod forward;
mod metrics;

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use mcpguard_core::cancel::CancelToken;
use mcpguard_guard::Guard;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use url::Url;

pub use metrics::{Metrics, MetricsSnapshot};

/// A running proxy: a [`Guard`] plus the upstream target every admitted
/// connection is relayed to.
pub struct ProxyServer {
    guard: Arc<Guard>,
    target: Url,
    metrics: Arc<Metrics>,
}

impl ProxyServer {
    /// Build a proxy that enforces `guard` and forwards admitted traffic to
    /// `target` (a `ws://` or `wss://` URL).
    #[must_use]
    pub fn new(guard: Arc<Guard>, target: Url) -> Self {
        Self {
            guard,
            target,
            metrics: Arc::new(Metrics::default()),
        }
    }

    /// Connection counters accumulated since the server was built.
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Build the `axum` router: `/healthz`, `/metrics`, and the `/ws` proxy
    /// endpoint.
    #[must_use]
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .with_state(self)
            .layer(TraceLayer::new_for_http())
    }

    /// Run one proxied connection to completion: connect upstream, spawn the
    /// two forwarding tasks, and return once either direction ends (cleanly
    /// or with an error).
    ///
    /// The two tasks share a [`CancelToken`]: whichever direction finishes
    /// first signals the other to stop reading at its next frame boundary.
    /// In-flight work the surviving task already started (a guard
    /// evaluation, an audit write) is allowed to finish; no new frames are
    /// read afterward.
    async fn handle(&self, socket: axum::extract::ws::WebSocket) -> anyhow::Result<()> {
        let (upstream, _response) = tokio_tungstenite::connect_async(self.target.as_str())
            .await
            .map_err(|err| anyhow::anyhow!("connecting to upstream {}: {err}", self.target))?;

        let (client_sink, client_stream) = socket.split();
        let (upstream_sink, upstream_stream) = upstream.split();
        let client_sink = Arc::new(Mutex::new(client_sink));
        let upstream_sink = Arc::new(Mutex::new(upstream_sink));
        let cancel = CancelToken::new();

        let c2u = tokio::spawn(forward::client_to_upstream(
            client_stream,
            Arc::clone(&upstream_sink),
            Arc::clone(&client_sink),
            Arc::clone(&self.guard),
            Arc::clone(&self.metrics),
            cancel.clone(),
        ));
        let u2c = tokio::spawn(forward::upstream_to_client(upstream_stream, client_sink, cancel.clone()));

        let result = tokio::select! {
            joined = c2u => { cancel.cancel(); joined }
            joined = u2c => { cancel.cancel(); joined }
        };

        result.map_err(|err| anyhow::anyhow!("proxy forwarding task panicked: {err}"))?
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn metrics_handler(State(proxy): State<Arc<ProxyServer>>) -> Json<MetricsSnapshot> {
    Json(proxy.metrics.snapshot())
}

async fn ws_handler(State(proxy): State<Arc<ProxyServer>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = proxy.handle(socket).await {
            tracing::warn!(error = %err, "proxy connection ended with an error");
            proxy.metrics.record_error();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_guard() -> Arc<Guard> {
        let policy = Arc::new(mcpguard_policy::Policy::from_yaml("{}").expect("default policy"));
        Arc::new(Guard::from_policy(policy).expect("build guard"))
    }

    #[test]
    fn router_builds_without_panicking() {
        let guard = test_guard();
        let target = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let server = Arc::new(ProxyServer::new(guard, target));
        let _router = server.router();
    }

    #[test]
    fn metrics_snapshot_starts_at_zero() {
        let guard = test_guard();
        let target = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let server = ProxyServer::new(guard, target);
        let snapshot = server.metrics().snapshot();
        assert_eq!(snapshot.allowed, 0);
        assert_eq!(snapshot.denied, 0);
        assert_eq!(snapshot.errors, 0);
    }

    #[tokio::test]
    async fn metrics_counters_increment_independently() {
        let metrics = Metrics::default();
        metrics.record_allowed();
        metrics.record_allowed();
        metrics.record_denied();
        metrics.record_error();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.allowed, 2);
        assert_eq!(snapshot.denied, 1);
        assert_eq!(snapshot.errors, 1);
    }
}
