// SPDX-License-Identifier: MIT OR Apache-2.0
//! mcpguard-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Shared data model for the mcpguard security gateway: findings surfaced by
//! prompt heuristics, the decision a [`Guard`](https://docs.rs/mcpguard-guard)
//! reaches for a tool invocation, the audit record written for every decision,
//! and a cooperative cancellation primitive used by the duplex proxy.

pub mod cancel;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use cancel::CancelToken;

/// Severity of a single heuristic or quota finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; never denies a request on its own.
    Low,
    /// Worth recording; does not deny a request on its own.
    Medium,
    /// Denies the request it is attached to.
    High,
}

/// A single policy-relevant observation about a request, e.g. a prompt that
/// matched a deny pattern or exceeded the configured length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable identifier for the rule that produced this finding, e.g.
    /// `"prompt_regex_0"` or `"prompt_length"`.
    pub rule_id: String,
    /// Human-readable explanation of what matched.
    pub reason: String,
    /// How serious this finding is.
    pub severity: Severity,
}

impl Finding {
    /// Construct a new finding.
    #[must_use]
    pub fn new(rule_id: impl Into<String>, reason: impl Into<String>, severity: Severity) -> Self {
        Self {
            rule_id: rule_id.into(),
            reason: reason.into(),
            severity,
        }
    }
}

/// The tag recorded in an [`AuditRecord`] describing why a request was
/// allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// The request passed every check.
    Allowed,
    /// Denied by [`mcpguard-policy`](https://docs.rs/mcpguard-policy) tool rules.
    ToolDenied,
    /// Denied by a resource ACL rule.
    ResourceDenied,
    /// Denied because the prompt tripped a heuristic rule or length limit.
    PromptDenied,
    /// Denied because the rate limiter had no remaining quota.
    RateLimitExceeded,
    /// Denied during authentication, before any quota was consumed.
    Unauthorized,
}

impl DecisionReason {
    /// Returns the wire/audit-log string for this reason, matching the tag
    /// used in policy denial envelopes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "Allowed",
            Self::ToolDenied => "ToolDenied",
            Self::ResourceDenied => "ResourceDenied",
            Self::PromptDenied => "PromptDenied",
            Self::RateLimitExceeded => "RateLimitExceeded",
            Self::Unauthorized => "Unauthorized",
        }
    }
}

/// Outcome of a single [`Guard::check_tool`](https://docs.rs/mcpguard-guard)
/// evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Short human-readable summary, e.g. `"Allowed"` or a denial reason.
    pub reason: String,
    /// Findings accumulated while evaluating the request. Always empty when
    /// `allowed` is `false` due to a tool, resource, or quota denial, since
    /// those short-circuit before heuristics run.
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Tokens remaining in the caller's bucket after this decision, if the
    /// rate limiter was consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_remaining: Option<i64>,
}

impl GuardDecision {
    /// Build the canonical "allowed" decision.
    #[must_use]
    pub fn allowed(quota_remaining: i64) -> Self {
        Self {
            allowed: true,
            reason: DecisionReason::Allowed.as_str().to_string(),
            findings: Vec::new(),
            quota_remaining: Some(quota_remaining),
        }
    }
}

/// One line of the append-only audit trail.
///
/// Serializes to the exact field set mcpguard writes to its audit sink, one
/// JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When this record was produced.
    pub timestamp: DateTime<Utc>,
    /// Caller identity as resolved by the authenticator.
    pub identity: String,
    /// Tool name, when this record concerns a tool invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Resource URI, when this record concerns a single resource check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// What was being attempted, e.g. `"tool_call"`.
    pub action: String,
    /// The reason tag for this record's outcome.
    pub decision: String,
    /// Findings collected while evaluating the request.
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Wall-clock time spent evaluating the request, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Hash of the request payload, present only when attestation is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_hash: Option<String>,
    /// Hash of the response payload, present only when attestation is enabled
    /// and a response was available at log time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_hash: Option<String>,
    /// Version of the policy in effect when this record was produced.
    pub policy_version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_reason_as_str_matches_audit_tags() {
        assert_eq!(DecisionReason::Allowed.as_str(), "Allowed");
        assert_eq!(DecisionReason::RateLimitExceeded.as_str(), "RateLimitExceeded");
    }

    #[test]
    fn guard_decision_allowed_has_no_findings() {
        let d = GuardDecision::allowed(29);
        assert!(d.allowed);
        assert_eq!(d.quota_remaining, Some(29));
        assert!(d.findings.is_empty());
    }

    #[test]
    fn audit_record_round_trips_through_json() {
        let record = AuditRecord {
            timestamp: Utc::now(),
            identity: "anonymous".to_string(),
            tool: Some("fs.read".to_string()),
            resource: None,
            action: "tool_call".to_string(),
            decision: DecisionReason::Allowed.as_str().to_string(),
            findings: vec![Finding::new("prompt_length", "within limit", Severity::Low)],
            latency_ms: Some(1.5),
            request_hash: None,
            response_hash: None,
            policy_version: 1,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: AuditRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.identity, "anonymous");
        assert_eq!(back.tool.as_deref(), Some("fs.read"));
        assert_eq!(back.findings.len(), 1);
    }

    #[test]
    fn severity_ordering_places_high_above_low() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
