//! Wire shapes for the JSON envelopes the proxy inspects in flight.
//!
//! Every other frame — non-JSON, JSON without `"type": "tool_call"`, or
//! binary — is forwarded byte-for-byte without ever being represented here.

use mcpguard_errors::PolicyDenied;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded `{"type": "tool_call", ...}` request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Tool name, in either `namespace/name` or `namespace.name` form.
    pub tool: String,
    /// Caller identity. Defaults to `"anonymous"` when the envelope omits
    /// it, matching the unauthenticated default the in-process guard uses.
    #[serde(default = "anonymous")]
    pub identity: String,
    /// Prompt text to run through the length check and heuristics.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Resource URIs this call touches.
    #[serde(default)]
    pub resources: Vec<String>,
}

fn anonymous() -> String {
    "anonymous".to_string()
}

impl ToolCallEnvelope {
    /// The `type` tag this envelope shape is keyed on.
    pub const TYPE: &'static str = "tool_call";
}

/// `{"type": "error", ...}` frame sent back to the client in place of a
/// denied call. The original request is never forwarded upstream.
#[derive(Debug, Clone, Serialize)]
pub struct DenialEnvelope {
    #[serde(rename = "type")]
    kind: &'static str,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl DenialEnvelope {
    /// Build the frame for a [`PolicyDenied`] rejection.
    pub fn policy_denied(denied: &PolicyDenied) -> Self {
        Self {
            kind: "error",
            error: "PolicyDenied",
            message: denied.message.clone(),
            details: (!denied.details.is_empty())
                .then(|| serde_json::to_value(&denied.details).unwrap_or(Value::Null)),
        }
    }
}
