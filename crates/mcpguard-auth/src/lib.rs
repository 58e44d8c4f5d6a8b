// SPDX-License-Identifier: MIT OR Apache-2.0
//! mcpguard-auth
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Maps transport headers to a stable identity string, per the three
//! authentication modes a [`mcpguard_policy::Policy`] may select.

use std::collections::HashMap;

use mcpguard_errors::Unauthorized;
use mcpguard_policy::{AuthMode, AuthSettings};

/// Case-insensitive header map consulted by the authenticator.
///
/// Callers build this once per request; keys are matched case-insensitively
/// by lowercasing both the stored key and the lookup key.
#[derive(Debug, Clone, Default)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    /// Build a header map from an iterator of `(name, value)` pairs.
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
        )
    }

    /// Look up a header by name, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Resolves caller identity from transport headers according to the
/// policy's configured [`AuthMode`].
#[derive(Debug, Clone)]
pub struct Authenticator<'a> {
    settings: &'a AuthSettings,
}

impl<'a> Authenticator<'a> {
    /// Build an authenticator bound to a policy's auth settings.
    #[must_use]
    pub fn new(settings: &'a AuthSettings) -> Self {
        Self { settings }
    }

    /// Resolve the caller's identity, or fail with [`Unauthorized`].
    ///
    /// - `none`: always `"anonymous"`, headers are ignored entirely.
    /// - `api_key`: the `x-api-key` header must be present and a member of
    ///   the configured key set; the key itself becomes the identity.
    /// - `bearer`: the `authorization` header must be `"bearer <token>"`
    ///   (case-insensitive scheme, exactly one space) with the token a
    ///   member of the configured token set; the token becomes the
    ///   identity.
    pub fn identify(&self, headers: Option<&Headers>) -> Result<String, Unauthorized> {
        let empty = Headers::default();
        let headers = headers.unwrap_or(&empty);
        match self.settings.mode() {
            AuthMode::None => Ok("anonymous".to_string()),
            AuthMode::ApiKey => {
                let key = headers.get("x-api-key");
                match key {
                    Some(key) if self.settings.allowed_keys().iter().any(|k| k == key) => {
                        Ok(key.to_string())
                    }
                    _ => Err(Unauthorized::new("Invalid API key")),
                }
            }
            AuthMode::Bearer => {
                let header = headers.get("authorization").unwrap_or_default();
                let token = parse_bearer(header);
                match token {
                    Some(token) if self.settings.allowed_tokens().iter().any(|t| t == token) => {
                        Ok(token.to_string())
                    }
                    _ => Err(Unauthorized::new("Invalid bearer token")),
                }
            }
        }
    }
}

/// Extract the token from an `authorization: bearer <token>` header value.
///
/// The scheme is matched case-insensitively and must be followed by exactly
/// one space; returns `None` for any other shape.
fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, rest) = header.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpguard_policy::Policy;

    fn settings(yaml: &str) -> Policy {
        Policy::from_yaml(yaml).expect("valid policy")
    }

    #[test]
    fn none_mode_ignores_headers_entirely() {
        let policy = settings("auth:\n  mode: none\n");
        let auth = Authenticator::new(policy.auth());
        assert_eq!(auth.identify(None).unwrap(), "anonymous");
    }

    #[test]
    fn api_key_mode_accepts_configured_key() {
        let policy = settings("auth:\n  mode: api_key\n  allowed_keys: [\"secret-key\"]\n");
        let auth = Authenticator::new(policy.auth());
        let headers = Headers::new([("X-Api-Key".to_string(), "secret-key".to_string())]);
        assert_eq!(auth.identify(Some(&headers)).unwrap(), "secret-key");
    }

    #[test]
    fn api_key_mode_rejects_unknown_key() {
        let policy = settings("auth:\n  mode: api_key\n  allowed_keys: [\"secret-key\"]\n");
        let auth = Authenticator::new(policy.auth());
        let headers = Headers::new([("x-api-key".to_string(), "wrong".to_string())]);
        assert!(auth.identify(Some(&headers)).is_err());
    }

    #[test]
    fn api_key_mode_rejects_missing_header() {
        let policy = settings("auth:\n  mode: api_key\n  allowed_keys: [\"secret-key\"]\n");
        let auth = Authenticator::new(policy.auth());
        assert!(auth.identify(None).is_err());
    }

    #[test]
    fn bearer_mode_accepts_configured_token_case_insensitive_scheme() {
        let policy = settings("auth:\n  mode: bearer\n  allowed_tokens: [\"tok-123\"]\n");
        let auth = Authenticator::new(policy.auth());
        let headers = Headers::new([(
            "Authorization".to_string(),
            "Bearer tok-123".to_string(),
        )]);
        assert_eq!(auth.identify(Some(&headers)).unwrap(), "tok-123");
    }

    #[test]
    fn bearer_mode_rejects_missing_space() {
        let policy = settings("auth:\n  mode: bearer\n  allowed_tokens: [\"tok-123\"]\n");
        let auth = Authenticator::new(policy.auth());
        let headers = Headers::new([("authorization".to_string(), "Bearertok-123".to_string())]);
        assert!(auth.identify(Some(&headers)).is_err());
    }

    #[test]
    fn bearer_mode_rejects_wrong_scheme() {
        let policy = settings("auth:\n  mode: bearer\n  allowed_tokens: [\"tok-123\"]\n");
        let auth = Authenticator::new(policy.auth());
        let headers = Headers::new([("authorization".to_string(), "Basic tok-123".to_string())]);
        assert!(auth.identify(Some(&headers)).is_err());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = Headers::new([("X-Api-Key".to_string(), "v".to_string())]);
        assert_eq!(headers.get("x-api-key"), Some("v"));
        assert_eq!(headers.get("X-API-KEY"), Some("v"));
    }
}
