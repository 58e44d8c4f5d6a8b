//! The two forwarding loops that make up one proxied connection.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mcpguard_core::cancel::CancelToken;
use mcpguard_guard::{Guard, GuardEvalError};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::envelope::{DenialEnvelope, ToolCallEnvelope};
use crate::metrics::Metrics;

pub(crate) type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type ClientSink = Arc<Mutex<SplitSink<WebSocket, ClientMessage>>>;
pub(crate) type UpstreamSink = Arc<Mutex<SplitSink<UpstreamStream, UpstreamMessage>>>;

/// Read client frames, enforce policy on `tool_call` envelopes, and forward
/// everything else (including admitted tool calls) to the upstream socket
/// unchanged.
///
/// A policy-denied call never reaches `to_upstream`: the client instead
/// receives a [`DenialEnvelope`] over `to_client` and the loop continues with
/// the next frame. A rate-limit backend failure is not a denial: it counts
/// as an `errors` metric increment and propagates out of this loop to tear
/// down the connection.
pub(crate) async fn client_to_upstream(
    mut from_client: SplitStream<WebSocket>,
    to_upstream: UpstreamSink,
    to_client: ClientSink,
    guard: Arc<Guard>,
    metrics: Arc<Metrics>,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            next = from_client.next() => next,
        };
        let Some(msg) = next else { return Ok(()) };
        let msg = msg?;
        if matches!(msg, ClientMessage::Close(_)) {
            return Ok(());
        }

        if let ClientMessage::Text(ref text) = msg {
            let denied = inspect_tool_call(text.as_str(), &guard, &metrics, &to_client).await?;
            if denied {
                continue;
            }
        }

        let Some(forwarded) = client_to_upstream_message(msg) else {
            continue;
        };
        to_upstream.lock().await.send(forwarded).await?;
    }
}

/// Read upstream frames and forward them to the client unchanged. Never
/// inspects content: only requests originating from the client are subject
/// to policy.
pub(crate) async fn upstream_to_client(
    mut from_upstream: SplitStream<UpstreamStream>,
    to_client: ClientSink,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            next = from_upstream.next() => next,
        };
        let Some(msg) = next else { return Ok(()) };
        let msg = msg?;
        if matches!(msg, UpstreamMessage::Close(_)) {
            return Ok(());
        }
        let Some(forwarded) = upstream_to_client_message(msg) else {
            continue;
        };
        to_client.lock().await.send(forwarded).await?;
    }
}

/// Parse `text` as a `tool_call` envelope (if it is one) and run it through
/// the guard. Returns `true` if the call was denied by policy (an error
/// frame has already been sent to the client and the original frame must
/// not be forwarded). A rate-limit backend failure is returned as `Err`
/// instead of a denial frame, per the fail-closed/propagate contract.
async fn inspect_tool_call(
    text: &str,
    guard: &Arc<Guard>,
    metrics: &Arc<Metrics>,
    to_client: &ClientSink,
) -> anyhow::Result<bool> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Ok(false);
    };
    if value.get("type").and_then(Value::as_str) != Some(ToolCallEnvelope::TYPE) {
        return Ok(false);
    }
    let Ok(envelope) = serde_json::from_value::<ToolCallEnvelope>(value.clone()) else {
        return Ok(false);
    };

    let start = Instant::now();
    match guard
        .check_tool(&envelope.identity, &envelope.tool, envelope.prompt.as_deref(), &envelope.resources)
        .await
    {
        Ok(decision) => {
            metrics.record_allowed();
            let request_hash = guard.hash_if_enabled(&value);
            guard
                .emit_allow(&envelope.identity, &envelope.tool, decision.findings, request_hash, None, start)
                .await;
            Ok(false)
        }
        Err(GuardEvalError::Denied(denied)) => {
            metrics.record_denied();
            send_json(to_client, &DenialEnvelope::policy_denied(&denied)).await?;
            Ok(true)
        }
        Err(GuardEvalError::Backend(err)) => {
            metrics.record_error();
            Err(err.into())
        }
    }
}

async fn send_json(sink: &ClientSink, value: &impl Serialize) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    sink.lock().await.send(ClientMessage::Text(text.into())).await?;
    Ok(())
}

fn client_to_upstream_message(msg: ClientMessage) -> Option<UpstreamMessage> {
    match msg {
        ClientMessage::Text(text) => Some(UpstreamMessage::text(text.as_str().to_string())),
        ClientMessage::Binary(data) => Some(UpstreamMessage::binary(data.to_vec())),
        ClientMessage::Ping(data) => Some(UpstreamMessage::Ping(data.to_vec().into())),
        ClientMessage::Pong(data) => Some(UpstreamMessage::Pong(data.to_vec().into())),
        ClientMessage::Close(_) => None,
    }
}

fn upstream_to_client_message(msg: UpstreamMessage) -> Option<ClientMessage> {
    match msg {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text.as_str().to_string().into())),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data.to_vec().into())),
        UpstreamMessage::Ping(data) => Some(ClientMessage::Ping(data.to_vec().into())),
        UpstreamMessage::Pong(data) => Some(ClientMessage::Pong(data.to_vec().into())),
        UpstreamMessage::Close(_) | UpstreamMessage::Frame(_) => None,
    }
}
