// SPDX-License-Identifier: MIT OR Apache-2.0
//! mcpguard-guard
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The orchestrator: composes authentication, resource ACL, prompt
//! heuristics, rate limiting, and audit emission into the two public
//! decision operations mcpguard exposes, [`Guard::check_resource`] and
//! [`Guard::check_tool`], plus a [`Guard::wrap_tool`] middleware for
//! embedding the same checks in-process ahead of a tool call.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use mcpguard_acl::ResourceAcl;
use mcpguard_attestation::hash_payload;
use mcpguard_audit::AuditLogger;
pub use mcpguard_auth::Headers;
use mcpguard_auth::Authenticator;
use mcpguard_core::{AuditRecord, DecisionReason, Finding, GuardDecision, Severity};
pub use mcpguard_errors::{PolicyDenied, Unauthorized};
use mcpguard_heuristics::PromptHeuristics;
use mcpguard_policy::{Policy, RateLimitBackend};
use mcpguard_ratelimit::{Clock, MemoryBackend, QuotaBackend, RateLimitError, SystemClock};
use serde_json::json;
use thiserror::Error;

/// Identity, prompt, and resource list attached to a single tool invocation
/// when going through [`Guard::wrap_tool`].
///
/// This is the explicit first parameter the design notes prefer over the
/// source's kwarg-injection trick.
#[derive(Debug, Clone, Default)]
pub struct GuardContext {
    /// Caller identity, as resolved by [`Guard::identify`] or supplied
    /// directly by a trusted envelope field.
    pub identity: String,
    /// Prompt text to run through the length check and heuristics, if any.
    pub prompt: Option<String>,
    /// Resource URIs the call touches, each checked against the ACL.
    pub resources: Vec<String>,
}

/// Failure from a single guard evaluation: either a typed policy denial, or
/// a rate-limit backend failure, which per the design must not fail open
/// and so propagates as a fatal error rather than a denial.
#[derive(Debug, Error)]
pub enum GuardEvalError {
    /// The request was evaluated and rejected.
    #[error(transparent)]
    Denied(#[from] PolicyDenied),
    /// The rate limiter backend could not be consulted.
    #[error("rate limit backend unavailable: {0}")]
    Backend(#[from] RateLimitError),
}

/// The policy decision orchestrator (component C8).
///
/// Built once per process from a validated [`Policy`] (see [`Guard::from_policy`]
/// for the common case, or [`Guard::new`] to supply a specific rate-limit
/// backend and audit logger, e.g. in tests).
pub struct Guard {
    policy: Arc<Policy>,
    acl: ResourceAcl,
    heuristics: PromptHeuristics,
    rate_limiter: Arc<dyn QuotaBackend>,
    audit: Arc<AuditLogger>,
}

impl Guard {
    /// Build a guard from an already-validated policy plus explicit
    /// rate-limit backend and audit logger.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy's resource glob patterns fail to
    /// recompile (they were already validated at policy load time, so this
    /// should not happen in practice; the check is defensive).
    pub fn new(
        policy: Arc<Policy>,
        rate_limiter: Arc<dyn QuotaBackend>,
        audit: Arc<AuditLogger>,
    ) -> anyhow::Result<Self> {
        let acl = ResourceAcl::new(policy.resource_allow(), policy.resource_deny())?;
        let heuristics = PromptHeuristics::new(policy.prompt_patterns().to_vec());
        Ok(Self {
            policy,
            acl,
            heuristics,
            rate_limiter,
            audit,
        })
    }

    /// Build a guard wired to the backend and audit sink its policy
    /// selects: a [`MemoryBackend`] clocked by [`SystemClock`] for
    /// `rate_limit.backend: memory`, or a Redis-backed shared store for
    /// `rate_limit.backend: shared` (requires the `shared-backend` feature).
    ///
    /// # Errors
    ///
    /// Returns an error if a shared backend is selected without the
    /// `shared-backend` feature enabled, if connecting to the shared store
    /// fails, or if the audit sink's file cannot be opened.
    pub fn from_policy(policy: Arc<Policy>) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let rate_limiter: Arc<dyn QuotaBackend> = match policy.rate_limit().backend() {
            RateLimitBackend::Memory => Arc::new(MemoryBackend::new(
                policy.rate_limit().capacity(),
                policy.rate_limit().refill_rate_per_sec(),
                clock,
            )),
            RateLimitBackend::Shared => Self::shared_backend(&policy, clock)?,
        };
        let audit = Arc::new(AuditLogger::new(policy.logging(), policy.version())?);
        Self::new(policy, rate_limiter, audit)
    }

    #[cfg(feature = "shared-backend")]
    fn shared_backend(policy: &Policy, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn QuotaBackend>> {
        use mcpguard_ratelimit::{RedisQuotaClient, SharedBackend};
        let dsn = policy
            .rate_limit()
            .shared_dsn()
            .ok_or_else(|| anyhow::anyhow!("shared rate-limit backend requires a connection string"))?;
        let client = Arc::new(RedisQuotaClient::connect(dsn)?);
        Ok(Arc::new(SharedBackend::new(
            policy.rate_limit().capacity(),
            policy.rate_limit().refill_rate_per_sec(),
            client,
            clock,
        )))
    }

    #[cfg(not(feature = "shared-backend"))]
    fn shared_backend(_policy: &Policy, _clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn QuotaBackend>> {
        anyhow::bail!("rate_limit.backend: shared requires mcpguard to be built with the `shared-backend` feature")
    }

    /// The policy this guard enforces.
    #[must_use]
    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    /// Resolve caller identity from transport headers per the policy's
    /// configured authentication mode.
    ///
    /// # Errors
    ///
    /// Returns [`Unauthorized`] if the required credential is missing or
    /// not recognized. No rate-limit quota is consumed.
    pub fn identify(&self, headers: Option<&Headers>) -> Result<String, Unauthorized> {
        Authenticator::new(self.policy.auth()).identify(headers)
    }

    /// Check whether `identity` may access `uri`, independent of any tool
    /// invocation.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyDenied`] if the ACL denies the URI. Emits exactly one
    /// `deny` audit record before returning; emits nothing on allow (the
    /// caller emits its own record once the access actually happens).
    pub async fn check_resource(&self, identity: &str, uri: &str) -> Result<GuardDecision, PolicyDenied> {
        if !self.acl.is_allowed(uri) {
            self.emit(identity, None, Some(uri), "resource", DecisionReason::ResourceDenied, Vec::new(), None)
                .await;
            return Err(PolicyDenied::new("Resource access denied")
                .with_detail("uri", uri)
                .with_detail("reason", DecisionReason::ResourceDenied.as_str()));
        }
        Ok(GuardDecision {
            allowed: true,
            reason: DecisionReason::Allowed.as_str().to_string(),
            findings: Vec::new(),
            quota_remaining: None,
        })
    }

    /// Evaluate a tool invocation against every policy dimension, in the
    /// fixed order: quota presence, tool admission, prompt length and
    /// heuristics, resource ACL, then quota consumption.
    ///
    /// Each failing step emits exactly one `deny` audit record and returns
    /// [`GuardEvalError::Denied`] immediately, without evaluating later
    /// steps or mutating the rate-limit bucket. On success the bucket has
    /// been decremented by exactly one token and no audit record has been
    /// emitted — the caller ([`Guard::wrap_tool`] or the proxy) emits the
    /// `allow` record once the downstream call has actually happened.
    ///
    /// # Errors
    ///
    /// Returns [`GuardEvalError::Denied`] for a policy rejection, or
    /// [`GuardEvalError::Backend`] if the rate-limit backend could not be
    /// consulted (fail-closed: never treated as an allow).
    pub async fn check_tool(
        &self,
        identity: &str,
        tool_name: &str,
        prompt: Option<&str>,
        resources: &[String],
    ) -> Result<GuardDecision, GuardEvalError> {
        let start = Instant::now();
        let normalized = mcpguard_glob::normalize_tool_name(tool_name);

        let quota_remaining = self.rate_limiter.get_remaining(identity, &normalized).await?;
        if quota_remaining <= 0 {
            self.emit(identity, Some(&normalized), None, "tool", DecisionReason::RateLimitExceeded, Vec::new(), Some(start))
                .await;
            return Err(PolicyDenied::new("Rate limit exceeded")
                .with_detail("tool", &normalized)
                .with_detail("reason", DecisionReason::RateLimitExceeded.as_str())
                .into());
        }

        if !self.policy.tool_allowed(&normalized) {
            self.emit(identity, Some(&normalized), None, "tool", DecisionReason::ToolDenied, Vec::new(), Some(start))
                .await;
            return Err(PolicyDenied::new("Tool not allowed")
                .with_detail("tool", &normalized)
                .with_detail("reason", DecisionReason::ToolDenied.as_str())
                .into());
        }

        let mut findings: Vec<Finding> = Vec::new();
        if let Some(text) = prompt {
            if text.len() > self.policy.prompt_max_length() {
                findings.push(Finding::new("prompt_length", "Prompt too long", Severity::Medium));
            }
            findings.extend(self.heuristics.evaluate(text));
            if !findings.is_empty() {
                self.emit(
                    identity,
                    Some(&normalized),
                    None,
                    "tool",
                    DecisionReason::PromptDenied,
                    findings.clone(),
                    Some(start),
                )
                .await;
                return Err(PolicyDenied::new("Prompt injection suspected")
                    .with_detail("tool", &normalized)
                    .with_detail("findings", &findings)
                    .with_detail("reason", DecisionReason::PromptDenied.as_str())
                    .into());
            }
        }

        for uri in resources {
            if !self.acl.is_allowed(uri) {
                self.emit(
                    identity,
                    Some(&normalized),
                    Some(uri),
                    "tool",
                    DecisionReason::ResourceDenied,
                    Vec::new(),
                    Some(start),
                )
                .await;
                return Err(PolicyDenied::new("Resource denied")
                    .with_detail("uri", uri)
                    .with_detail("reason", DecisionReason::ResourceDenied.as_str())
                    .into());
            }
        }

        let consumed = self.rate_limiter.consume(identity, &normalized, 1).await?;
        if !consumed {
            self.emit(identity, Some(&normalized), None, "tool", DecisionReason::RateLimitExceeded, Vec::new(), Some(start))
                .await;
            return Err(PolicyDenied::new("Rate limit exceeded")
                .with_detail("tool", &normalized)
                .with_detail("reason", DecisionReason::RateLimitExceeded.as_str())
                .into());
        }

        let quota_after = self.rate_limiter.get_remaining(identity, &normalized).await?;
        Ok(GuardDecision::allowed(quota_after))
    }

    /// Emit the `allow` audit record for a call that has already been
    /// admitted and forwarded/executed, optionally carrying attestation
    /// hashes. Exposed so the proxy and [`Guard::wrap_tool`] share one
    /// code path for the allow-side audit record.
    pub async fn emit_allow(
        &self,
        identity: &str,
        tool: &str,
        findings: Vec<Finding>,
        request_hash: Option<String>,
        response_hash: Option<String>,
        elapsed_since: Instant,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            identity: identity.to_string(),
            tool: Some(tool.to_string()),
            resource: None,
            action: "tool".to_string(),
            decision: DecisionReason::Allowed.as_str().to_string(),
            findings,
            latency_ms: Some(elapsed_since.elapsed().as_secs_f64() * 1000.0),
            request_hash,
            response_hash,
            policy_version: self.policy.version(),
        };
        self.audit.log(record).await;
    }

    /// Whether attestation hashing is enabled, and which algorithm to use.
    #[must_use]
    pub fn hash_if_enabled(&self, payload: &serde_json::Value) -> Option<String> {
        let settings = self.policy.attestation();
        settings.enabled().then(|| hash_payload(payload, settings.alg()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit(
        &self,
        identity: &str,
        tool: Option<&str>,
        resource: Option<&str>,
        action: &str,
        reason: DecisionReason,
        findings: Vec<Finding>,
        start: Option<Instant>,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            identity: identity.to_string(),
            tool: tool.map(str::to_string),
            resource: resource.map(str::to_string),
            action: action.to_string(),
            decision: "deny".to_string(),
            findings,
            latency_ms: start.map(|s| s.elapsed().as_secs_f64() * 1000.0),
            request_hash: None,
            response_hash: None,
            policy_version: self.policy.version(),
        };
        tracing::debug!(identity = %identity, tool = ?tool, reason = reason.as_str(), "guard denial");
        self.audit.log(record).await;
    }
}

/// A tool implementation a [`Guard`] can wrap with policy enforcement.
///
/// Always async: per the design notes, a caller cannot accidentally wrap a
/// synchronous function (the source's `TypeError` at wrap time becomes a
/// compile error here instead).
#[async_trait::async_trait]
pub trait GuardedTool: Send + Sync {
    /// Invoke the tool with its raw JSON arguments.
    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// Failure from invoking a [`WrappedTool`]: either the call was denied by
/// policy, or the inner tool itself failed.
#[derive(Debug, Error)]
pub enum WrapError {
    /// See [`GuardEvalError`].
    #[error(transparent)]
    Check(#[from] GuardEvalError),
    /// The inner tool returned an error after being admitted.
    #[error(transparent)]
    Inner(#[from] anyhow::Error),
}

/// A tool wrapped by [`Guard::wrap_tool`]: enforces policy on every
/// invocation, then calls through to the inner tool and audits the result.
pub struct WrappedTool {
    guard: Arc<Guard>,
    tool_name: String,
    inner: Arc<dyn GuardedTool>,
}

impl WrappedTool {
    /// Invoke the wrapped tool under the given context.
    ///
    /// Runs [`Guard::check_tool`], hashes the request if attestation is
    /// enabled, calls the inner tool, hashes the response, and emits a
    /// single `allow` audit record carrying both hashes and any surviving
    /// (non-denying) findings.
    ///
    /// # Errors
    ///
    /// Returns [`WrapError::Check`] if policy denies the call, or
    /// [`WrapError::Inner`] if the inner tool's own call fails.
    pub async fn invoke(&self, ctx: GuardContext, args: serde_json::Value) -> Result<serde_json::Value, WrapError> {
        let start = Instant::now();
        let decision = self
            .guard
            .check_tool(&ctx.identity, &self.tool_name, ctx.prompt.as_deref(), &ctx.resources)
            .await?;

        let request_hash = self.guard.hash_if_enabled(&json!({
            "args": &args,
            "identity": &ctx.identity,
            "prompt": &ctx.prompt,
            "resources": &ctx.resources,
        }));

        let result = self.inner.call(args).await?;

        let response_hash = self.guard.hash_if_enabled(&result);

        self.guard
            .emit_allow(&ctx.identity, &self.tool_name, decision.findings, request_hash, response_hash, start)
            .await;

        Ok(result)
    }
}

impl Guard {
    /// Produce a policy-enforcing wrapper around `inner`.
    ///
    /// `tool_name` is normalized (`/` to `.`) once, at wrap time, so every
    /// invocation checks against the same tool identity.
    #[must_use]
    pub fn wrap_tool(self: &Arc<Self>, tool_name: impl Into<String>, inner: Arc<dyn GuardedTool>) -> WrappedTool {
        WrappedTool {
            guard: Arc::clone(self),
            tool_name: mcpguard_glob::normalize_tool_name(&tool_name.into()),
            inner,
        }
    }
}
