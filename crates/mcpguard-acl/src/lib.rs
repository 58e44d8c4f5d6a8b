// SPDX-License-Identifier: MIT OR Apache-2.0
//! mcpguard-acl
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Glob-based allow/deny access control over resource URIs, independent of
//! tool admission (see `mcpguard-policy` for the tool-name rules, which
//! additionally normalize `/` and `.` separators — resource URIs are
//! matched as-is).

use anyhow::Result;
use mcpguard_glob::{IncludeExcludeGlobs, MatchDecision};

/// Compiled allow/deny glob rules over resource URIs.
///
/// Deny always wins; an empty allow list admits anything not denied.
#[derive(Debug, Clone)]
pub struct ResourceAcl {
    rules: IncludeExcludeGlobs,
}

impl ResourceAcl {
    /// Compile an allow/deny pattern pair into a reusable ACL.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern fails to compile as a glob.
    pub fn new(allow: &[String], deny: &[String]) -> Result<Self> {
        Ok(Self {
            rules: IncludeExcludeGlobs::new(allow, deny)?,
        })
    }

    /// Whether `uri` is admitted by these rules.
    #[must_use]
    pub fn is_allowed(&self, uri: &str) -> bool {
        self.rules.decide_str(uri) == MatchDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn allow_and_deny_globs_match_the_source_fixture() {
        let acl = ResourceAcl::new(
            &patterns(&["file://**/*.md", "http://docs.example.com/**"]),
            &patterns(&["file://**/.env", "s3://secret/**"]),
        )
        .expect("compile acl");
        assert!(acl.is_allowed("file://project/readme.md"));
        assert!(!acl.is_allowed("file://project/.env"));
        assert!(acl.is_allowed("http://docs.example.com/page"));
        assert!(!acl.is_allowed("s3://secret/data"));
    }

    #[test]
    fn empty_rules_admit_everything() {
        let acl = ResourceAcl::new(&[], &[]).expect("compile acl");
        assert!(acl.is_allowed("anything://goes"));
    }

    #[test]
    fn deny_wins_on_overlap() {
        let acl = ResourceAcl::new(&patterns(&["s3://**"]), &patterns(&["s3://secret/**"]))
            .expect("compile acl");
        assert!(acl.is_allowed("s3://public/data"));
        assert!(!acl.is_allowed("s3://secret/data"));
    }
}
