// SPDX-License-Identifier: MIT OR Apache-2.0
//! mcpguard-errors
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! mcpguard recognizes exactly three kinds of failure, each carrying its own
//! HTTP status code and optional structured detail payload:
//!
//! - [`BadPolicy`] — the policy document itself is invalid. Raised only at
//!   load time; aggregates every validation violation into a single error so
//!   an operator sees the whole list at once rather than fixing one mistake
//!   per run.
//! - [`Unauthorized`] — the caller could not be authenticated. Raised before
//!   any rate-limit quota is consumed.
//! - [`PolicyDenied`] — an authenticated caller's request was rejected by
//!   tool, resource, prompt, or rate-limit rules. Always paired with exactly
//!   one audit record.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A policy document failed validation.
///
/// Carries every violation found, not just the first, so `Display` renders
/// all of them as a numbered list.
#[derive(Debug, Clone, Serialize)]
pub struct BadPolicy {
    /// Human-readable description of each violation found while validating
    /// the policy document.
    pub violations: Vec<String>,
}

impl BadPolicy {
    /// Build a `BadPolicy` from a non-empty list of violations.
    #[must_use]
    pub fn new(violations: Vec<String>) -> Self {
        Self { violations }
    }

    /// Build a `BadPolicy` carrying a single violation.
    #[must_use]
    pub fn single(violation: impl Into<String>) -> Self {
        Self {
            violations: vec![violation.into()],
        }
    }

    /// HTTP status this failure maps to when surfaced over an API.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        422
    }
}

impl fmt::Display for BadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.violations.len() == 1 {
            write!(f, "invalid policy: {}", self.violations[0])
        } else {
            writeln!(f, "invalid policy: {} violations", self.violations.len())?;
            for (i, v) in self.violations.iter().enumerate() {
                writeln!(f, "  {}. {v}", i + 1)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for BadPolicy {}

/// The caller could not be authenticated. No rate-limit quota is consumed
/// when this is raised.
#[derive(Debug, Clone, Serialize)]
pub struct Unauthorized {
    /// Human-readable explanation, e.g. `"Invalid API key"`.
    pub message: String,
}

impl Unauthorized {
    /// Build a new `Unauthorized` failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// HTTP status this failure maps to when surfaced over an API.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        401
    }
}

impl fmt::Display for Unauthorized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Unauthorized {}

/// An authenticated request was rejected by the guard.
///
/// `details` carries structured context specific to the denial, e.g.
/// `{"uri": "..."}` for a resource denial or the list of matched findings for
/// a prompt denial.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDenied {
    /// Human-readable explanation of the denial.
    pub message: String,
    /// Structured context describing the denial. Empty when the denial
    /// carries no extra detail beyond the message.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

impl PolicyDenied {
    /// Build a `PolicyDenied` with no extra detail.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    /// Attach a structured detail field, returning `self` for chaining.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.details.insert(key.into(), value);
        self
    }

    /// HTTP status this failure maps to when surfaced over an API.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        403
    }
}

impl fmt::Display for PolicyDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PolicyDenied {}

/// The union of all failures a guard evaluation can produce.
///
/// Most call sites work with the individual variant types directly
/// ([`BadPolicy`] at load time, [`Unauthorized`] from the authenticator,
/// [`PolicyDenied`] from the guard); this enum exists for call sites, like
/// the proxy's message loop, that need to match on any of the three at once.
#[derive(Debug, Error)]
pub enum GuardError {
    /// See [`BadPolicy`].
    #[error(transparent)]
    BadPolicy(#[from] BadPolicy),
    /// See [`Unauthorized`].
    #[error(transparent)]
    Unauthorized(#[from] Unauthorized),
    /// See [`PolicyDenied`].
    #[error(transparent)]
    PolicyDenied(#[from] PolicyDenied),
}

impl GuardError {
    /// HTTP status this failure maps to when surfaced over an API.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadPolicy(e) => e.http_status(),
            Self::Unauthorized(e) => e.http_status(),
            Self::PolicyDenied(e) => e.http_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_policy_display_numbers_multiple_violations() {
        let err = BadPolicy::new(vec![
            "prompt.max_length must be > 0".to_string(),
            "rate_limit.capacity must be > 0".to_string(),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("1. prompt.max_length"));
        assert!(rendered.contains("2. rate_limit.capacity"));
        assert_eq!(err.http_status(), 422);
    }

    #[test]
    fn unauthorized_has_401_status() {
        let err = Unauthorized::new("Invalid API key");
        assert_eq!(err.http_status(), 401);
        assert_eq!(err.to_string(), "Invalid API key");
    }

    #[test]
    fn policy_denied_serializes_details() {
        let err = PolicyDenied::new("resource denied").with_detail("uri", "file:///etc/passwd");
        assert_eq!(err.http_status(), 403);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["details"]["uri"], "file:///etc/passwd");
    }

    #[test]
    fn policy_denied_omits_empty_details() {
        let err = PolicyDenied::new("tool denied");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("details").is_none());
    }

    #[test]
    fn guard_error_from_conversions_preserve_status() {
        let e: GuardError = Unauthorized::new("nope").into();
        assert_eq!(e.http_status(), 401);
    }
}
