// SPDX-License-Identifier: MIT OR Apache-2.0
//! mcpguard-policy
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Typed, validated policy document for the mcpguard security gateway.
//!
//! A [`Policy`] is loaded once from a YAML document (see [`Policy::load`] /
//! [`Policy::from_yaml`]), validated in full — every violation is collected
//! into a single [`BadPolicy`] rather than failing on the first one — and is
//! then immutable for the lifetime of the process. Glob patterns and regular
//! expressions are compiled eagerly at load time so that `tool_allowed` and
//! `resource_allowed` never fail at request time.

use std::path::Path;

use mcpguard_errors::BadPolicy;
use mcpguard_glob::{IncludeExcludeGlobs, MatchDecision, normalize_tool_name};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Authentication mode a policy document may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No authentication; every caller is `"anonymous"`.
    None,
    /// `x-api-key` header must carry one of `allowed_keys`.
    ApiKey,
    /// `authorization: bearer <token>` must carry one of `allowed_tokens`.
    Bearer,
}

impl Default for AuthMode {
    fn default() -> Self {
        Self::None
    }
}

/// Backend a rate limiter bucket is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackend {
    /// In-process `HashMap`, guarded by a mutex.
    Memory,
    /// An external key/value store reachable via a connection string.
    Shared,
}

impl Default for RateLimitBackend {
    fn default() -> Self {
        Self::Memory
    }
}

/// Where the audit sink writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutput {
    /// Standard error stream.
    Stderr,
    /// A rotating file at [`LoggingSettings::file_path`].
    File,
}

impl Default for AuditOutput {
    fn default() -> Self {
        Self::Stderr
    }
}

/// Digest algorithm used for attestation hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlg {
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl Default for HashAlg {
    fn default() -> Self {
        Self::Sha256
    }
}

fn default_max_length() -> usize {
    4000
}

fn default_capacity() -> u32 {
    30
}

fn default_refill_rate() -> f64 {
    1.0
}

fn default_level() -> String {
    "INFO".to_string()
}

fn default_file_path() -> String {
    "mcpguard.log".to_string()
}

fn default_rotate_bytes() -> u64 {
    10_485_760
}

fn default_version() -> i64 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawAuth {
    mode: AuthMode,
    allowed_keys: Vec<String>,
    allowed_tokens: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawTools {
    allow: Vec<String>,
    deny: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawResources {
    allow: Vec<String>,
    deny: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawPrompts {
    deny_regex: Vec<String>,
    #[serde(default = "default_max_length")]
    max_length: usize,
}

impl Default for RawPrompts {
    fn default() -> Self {
        Self {
            deny_regex: Vec::new(),
            max_length: default_max_length(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawRateLimit {
    #[serde(default = "default_capacity")]
    capacity: u32,
    #[serde(default = "default_refill_rate")]
    refill_rate_per_sec: f64,
    backend: RateLimitBackend,
    shared_dsn: Option<String>,
}

impl Default for RawRateLimit {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_rate_per_sec: default_refill_rate(),
            backend: RateLimitBackend::Memory,
            shared_dsn: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawLogging {
    #[serde(default = "default_level")]
    level: String,
    output: AuditOutput,
    #[serde(default = "default_file_path")]
    file_path: String,
    #[serde(default = "default_rotate_bytes")]
    rotate_bytes: u64,
}

impl Default for RawLogging {
    fn default() -> Self {
        Self {
            level: default_level(),
            output: AuditOutput::Stderr,
            file_path: default_file_path(),
            rotate_bytes: default_rotate_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawAttestation {
    enabled: bool,
    alg: HashAlg,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawPolicy {
    #[serde(default = "default_version")]
    version: i64,
    auth: RawAuth,
    tools: RawTools,
    resources: RawResources,
    prompts: RawPrompts,
    rate_limit: RawRateLimit,
    logging: RawLogging,
    attestation: RawAttestation,
}

impl Default for RawPolicy {
    fn default() -> Self {
        Self {
            version: default_version(),
            auth: RawAuth::default(),
            tools: RawTools::default(),
            resources: RawResources::default(),
            prompts: RawPrompts::default(),
            rate_limit: RawRateLimit::default(),
            logging: RawLogging::default(),
            attestation: RawAttestation::default(),
        }
    }
}

/// Resolved authentication settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    mode: AuthMode,
    allowed_keys: Vec<String>,
    allowed_tokens: Vec<String>,
}

impl AuthSettings {
    /// The configured authentication mode.
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Accepted API keys when `mode` is [`AuthMode::ApiKey`].
    #[must_use]
    pub fn allowed_keys(&self) -> &[String] {
        &self.allowed_keys
    }

    /// Accepted bearer tokens when `mode` is [`AuthMode::Bearer`].
    #[must_use]
    pub fn allowed_tokens(&self) -> &[String] {
        &self.allowed_tokens
    }
}

/// Resolved rate-limit settings (the raw numbers; compilation into a live
/// bucket map happens in `mcpguard-ratelimit`).
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    capacity: u32,
    refill_rate_per_sec: f64,
    backend: RateLimitBackend,
    shared_dsn: Option<String>,
}

impl RateLimitSettings {
    /// Bucket capacity in tokens.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Refill rate in tokens per second.
    #[must_use]
    pub fn refill_rate_per_sec(&self) -> f64 {
        self.refill_rate_per_sec
    }

    /// Which backend stores bucket state.
    #[must_use]
    pub fn backend(&self) -> RateLimitBackend {
        self.backend
    }

    /// Connection string for the shared backend, when configured.
    #[must_use]
    pub fn shared_dsn(&self) -> Option<&str> {
        self.shared_dsn.as_deref()
    }
}

/// Resolved audit sink settings.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    level: String,
    output: AuditOutput,
    file_path: String,
    rotate_bytes: u64,
}

impl LoggingSettings {
    /// Minimum severity level to emit, e.g. `"INFO"`.
    #[must_use]
    pub fn level(&self) -> &str {
        &self.level
    }

    /// Which sink kind to write to.
    #[must_use]
    pub fn output(&self) -> AuditOutput {
        self.output
    }

    /// File path used when `output` is [`AuditOutput::File`].
    #[must_use]
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Rotate the file once it reaches this many bytes.
    #[must_use]
    pub fn rotate_bytes(&self) -> u64 {
        self.rotate_bytes
    }
}

/// Resolved attestation settings.
#[derive(Debug, Clone, Copy)]
pub struct AttestationSettings {
    enabled: bool,
    alg: HashAlg,
}

impl AttestationSettings {
    /// Whether request/response hashing is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Which digest algorithm to use.
    #[must_use]
    pub fn alg(&self) -> HashAlg {
        self.alg
    }
}

/// A fully validated, immutable mcpguard policy.
///
/// Construct via [`Policy::load`] (from a file) or [`Policy::from_yaml`]
/// (from an in-memory document, e.g. in tests).
#[derive(Debug, Clone)]
pub struct Policy {
    version: i64,
    auth: AuthSettings,
    tool_rules: IncludeExcludeGlobs,
    resource_rules: IncludeExcludeGlobs,
    resource_allow: Vec<String>,
    resource_deny: Vec<String>,
    prompt_max_length: usize,
    prompt_patterns: Vec<Regex>,
    rate_limit: RateLimitSettings,
    logging: LoggingSettings,
    attestation: AttestationSettings,
}

impl Policy {
    /// Load and validate a policy document from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`BadPolicy`] if the file cannot be read, the YAML cannot be
    /// parsed, an unknown key is present, or any field-level invariant is
    /// violated. Every violation found is collected before returning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BadPolicy> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BadPolicy::single(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a policy document from an in-memory YAML string.
    ///
    /// # Errors
    ///
    /// See [`Policy::load`].
    pub fn from_yaml(yaml: &str) -> Result<Self, BadPolicy> {
        let raw: RawPolicy = serde_yaml::from_str(yaml)
            .map_err(|e| BadPolicy::single(format!("failed to parse policy YAML: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawPolicy) -> Result<Self, BadPolicy> {
        let mut violations = Vec::new();

        if raw.rate_limit.capacity == 0 {
            violations.push("rate_limit.capacity must be > 0".to_string());
        }
        if raw.rate_limit.refill_rate_per_sec <= 0.0 {
            violations.push("rate_limit.refill_rate_per_sec must be > 0".to_string());
        }
        if raw.rate_limit.backend == RateLimitBackend::Shared
            && raw
                .rate_limit
                .shared_dsn
                .as_deref()
                .unwrap_or_default()
                .is_empty()
        {
            violations.push("rate_limit.shared_dsn must be non-empty when backend is shared".to_string());
        }
        if raw.prompts.max_length == 0 {
            violations.push("prompts.max_length must be > 0".to_string());
        }
        if raw.auth.mode == AuthMode::ApiKey && raw.auth.allowed_keys.is_empty() {
            violations.push("auth.allowed_keys must be non-empty for api_key mode".to_string());
        }
        if raw.auth.mode == AuthMode::Bearer && raw.auth.allowed_tokens.is_empty() {
            violations.push("auth.allowed_tokens must be non-empty for bearer mode".to_string());
        }

        let mut patterns = Vec::with_capacity(raw.prompts.deny_regex.len());
        for pattern in &raw.prompts.deny_regex {
            match Regex::new(pattern) {
                Ok(re) => patterns.push(re),
                Err(e) => violations.push(format!("invalid prompt regex {pattern:?}: {e}")),
            }
        }

        let normalized_tool_allow: Vec<String> =
            raw.tools.allow.iter().map(|p| normalize_tool_name(p)).collect();
        let normalized_tool_deny: Vec<String> =
            raw.tools.deny.iter().map(|p| normalize_tool_name(p)).collect();
        let tool_rules = match IncludeExcludeGlobs::new(&normalized_tool_allow, &normalized_tool_deny) {
            Ok(g) => Some(g),
            Err(e) => {
                violations.push(format!("invalid tool glob pattern: {e}"));
                None
            }
        };
        let resource_rules = match IncludeExcludeGlobs::new(&raw.resources.allow, &raw.resources.deny) {
            Ok(g) => Some(g),
            Err(e) => {
                violations.push(format!("invalid resource glob pattern: {e}"));
                None
            }
        };

        if !violations.is_empty() {
            return Err(BadPolicy::new(violations));
        }

        Ok(Self {
            version: raw.version,
            auth: AuthSettings {
                mode: raw.auth.mode,
                allowed_keys: raw.auth.allowed_keys,
                allowed_tokens: raw.auth.allowed_tokens,
            },
            tool_rules: tool_rules.expect("validated above"),
            resource_rules: resource_rules.expect("validated above"),
            resource_allow: raw.resources.allow.clone(),
            resource_deny: raw.resources.deny.clone(),
            prompt_max_length: raw.prompts.max_length,
            prompt_patterns: patterns,
            rate_limit: RateLimitSettings {
                capacity: raw.rate_limit.capacity,
                refill_rate_per_sec: raw.rate_limit.refill_rate_per_sec,
                backend: raw.rate_limit.backend,
                shared_dsn: raw.rate_limit.shared_dsn,
            },
            logging: LoggingSettings {
                level: raw.logging.level,
                output: raw.logging.output,
                file_path: raw.logging.file_path,
                rotate_bytes: raw.logging.rotate_bytes,
            },
            attestation: AttestationSettings {
                enabled: raw.attestation.enabled,
                alg: raw.attestation.alg,
            },
        })
    }

    /// Policy document version, carried into every audit record.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Authentication settings.
    #[must_use]
    pub fn auth(&self) -> &AuthSettings {
        &self.auth
    }

    /// Rate limit settings.
    #[must_use]
    pub fn rate_limit(&self) -> &RateLimitSettings {
        &self.rate_limit
    }

    /// Audit sink settings.
    #[must_use]
    pub fn logging(&self) -> &LoggingSettings {
        &self.logging
    }

    /// Attestation settings.
    #[must_use]
    pub fn attestation(&self) -> &AttestationSettings {
        &self.attestation
    }

    /// Maximum prompt length before a `prompt_length` finding fires.
    #[must_use]
    pub fn prompt_max_length(&self) -> usize {
        self.prompt_max_length
    }

    /// Compiled prompt-deny regular expressions, in policy order.
    #[must_use]
    pub fn prompt_patterns(&self) -> &[Regex] {
        &self.prompt_patterns
    }

    /// Raw resource allow-glob patterns, as written in the policy document.
    ///
    /// Exposed so `mcpguard-acl` can compile its own [`mcpguard_acl::ResourceAcl`]
    /// from the same source patterns this policy already validated, rather
    /// than duplicating `resource_allowed`'s logic.
    #[must_use]
    pub fn resource_allow(&self) -> &[String] {
        &self.resource_allow
    }

    /// Raw resource deny-glob patterns, as written in the policy document.
    #[must_use]
    pub fn resource_deny(&self) -> &[String] {
        &self.resource_deny
    }

    /// Whether `tool_name` (either `/`- or `.`-separated) is admitted.
    ///
    /// Deny wins; an empty allow list admits everything not denied.
    #[must_use]
    pub fn tool_allowed(&self, tool_name: &str) -> bool {
        let normalized = normalize_tool_name(tool_name);
        self.tool_rules.decide_str(&normalized) == MatchDecision::Allowed
    }

    /// Whether `uri` is admitted by the resource allow/deny lists.
    ///
    /// Deny wins; an empty allow list admits everything not denied.
    #[must_use]
    pub fn resource_allowed(&self, uri: &str) -> bool {
        self.resource_rules.decide_str(uri) == MatchDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
version: 1
auth:
  mode: none
tools:
  allow: ["calculator/*"]
resources:
  allow: ["file://**/*.md"]
prompts:
  deny_regex: ["(?i)ignore"]
rate_limit:
  capacity: 10
  refill_rate_per_sec: 1.0
  backend: memory
logging:
  level: INFO
attestation:
  enabled: false
"#;

    #[test]
    fn loads_minimal_policy_with_defaults() {
        let policy = Policy::from_yaml(MINIMAL).expect("valid policy");
        assert_eq!(policy.auth().mode(), AuthMode::None);
        assert_eq!(policy.prompt_max_length(), 4000);
        assert_eq!(policy.prompt_patterns().len(), 1);
        assert!(policy.tool_allowed("calculator.add"));
        assert!(!policy.tool_allowed("admin.echo"));
    }

    #[test]
    fn tool_allowed_ignores_separator_style() {
        let policy = Policy::from_yaml(MINIMAL).expect("valid policy");
        assert_eq!(
            policy.tool_allowed("calculator/add"),
            policy.tool_allowed("calculator.add")
        );
    }

    #[test]
    fn empty_allow_list_admits_by_default() {
        let yaml = r#"
tools:
  deny: ["admin.*"]
"#;
        let policy = Policy::from_yaml(yaml).expect("valid policy");
        assert!(policy.tool_allowed("calculator.add"));
        assert!(!policy.tool_allowed("admin.echo"));
    }

    #[test]
    fn deny_wins_over_allow_on_overlap() {
        let yaml = r#"
resources:
  allow: ["s3://**"]
  deny: ["s3://secret/**"]
"#;
        let policy = Policy::from_yaml(yaml).expect("valid policy");
        assert!(policy.resource_allowed("s3://public/data"));
        assert!(!policy.resource_allowed("s3://secret/data"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let yaml = r"
rate_limit:
  capacity: 0
";
        let err = Policy::from_yaml(yaml).expect_err("capacity=0 should fail");
        assert!(err.violations.iter().any(|v| v.contains("capacity")));
    }

    #[test]
    fn zero_max_length_is_rejected() {
        let yaml = r"
prompts:
  max_length: 0
";
        let err = Policy::from_yaml(yaml).expect_err("max_length=0 should fail");
        assert!(err.violations.iter().any(|v| v.contains("max_length")));
    }

    #[test]
    fn shared_backend_requires_dsn() {
        let yaml = r"
rate_limit:
  backend: shared
";
        let err = Policy::from_yaml(yaml).expect_err("shared backend without dsn should fail");
        assert!(err.violations.iter().any(|v| v.contains("shared_dsn")));
    }

    #[test]
    fn api_key_mode_requires_keys() {
        let yaml = r"
auth:
  mode: api_key
";
        let err = Policy::from_yaml(yaml).expect_err("api_key mode without keys should fail");
        assert!(err.violations.iter().any(|v| v.contains("allowed_keys")));
    }

    #[test]
    fn bearer_mode_requires_tokens() {
        let yaml = r"
auth:
  mode: bearer
";
        let err = Policy::from_yaml(yaml).expect_err("bearer mode without tokens should fail");
        assert!(err.violations.iter().any(|v| v.contains("allowed_tokens")));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let yaml = r#"
prompts:
  deny_regex: ["(unclosed"]
"#;
        let err = Policy::from_yaml(yaml).expect_err("bad regex should fail");
        assert!(err.violations.iter().any(|v| v.contains("invalid prompt regex")));
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let yaml = "nonsense: true\n";
        assert!(Policy::from_yaml(yaml).is_err());
    }

    #[test]
    fn aggregates_multiple_violations_at_once() {
        let yaml = r"
rate_limit:
  capacity: 0
prompts:
  max_length: 0
";
        let err = Policy::from_yaml(yaml).expect_err("should fail");
        assert!(err.violations.len() >= 2);
    }

    #[test]
    fn load_reads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, MINIMAL).expect("write policy");
        let policy = Policy::load(&path).expect("load policy");
        assert_eq!(policy.version(), 1);
    }

    #[test]
    fn missing_file_is_bad_policy_not_panic() {
        let err = Policy::load("/nonexistent/policy.yaml").expect_err("missing file");
        assert!(err.violations[0].contains("failed to read"));
    }
}
