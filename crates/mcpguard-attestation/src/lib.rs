// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON hashing for request and response attestation.
//!
//! A [`serde_json::Value`]'s `Map` is backed by a `BTreeMap` (the workspace
//! does not enable serde_json's `preserve_order` feature), so object keys
//! come out sorted at every nesting level once a payload round-trips
//! through [`serde_json::Value`] and back to a string. That makes the hash
//! of a payload independent of the field order it happened to arrive in,
//! which is what lets a client and the gateway agree on the same digest for
//! semantically-identical JSON.

use mcpguard_policy::HashAlg;
use sha2::{Digest, Sha256, Sha512};

/// Produce the canonical JSON string for an arbitrary payload: parse it
/// into a [`serde_json::Value`] (if it isn't one already) and re-serialize,
/// which sorts every object's keys.
#[must_use]
pub fn canonicalize(payload: &serde_json::Value) -> String {
    // `to_value`/`to_string` round-trip normalizes key order recursively;
    // no manual walk is needed because `Value`'s map is a `BTreeMap`.
    serde_json::to_string(payload).expect("serde_json::Value always serializes")
}

/// Hex-encoded digest of a payload's canonical form, under the given
/// algorithm.
#[must_use]
pub fn hash_payload(payload: &serde_json::Value, alg: HashAlg) -> String {
    let canonical = canonicalize(payload);
    match alg {
        HashAlg::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(canonical.as_bytes());
            format!("{:x}", hasher.finalize())
        }
        HashAlg::Sha512 => {
            let mut hasher = Sha512::new();
            hasher.update(canonical.as_bytes());
            format!("{:x}", hasher.finalize())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_stable_under_key_permutation() {
        let a = json!({"b": 1, "a": 2, "c": {"y": 1, "x": 2}});
        let b = json!({"a": 2, "c": {"x": 2, "y": 1}, "b": 1});
        assert_eq!(
            hash_payload(&a, HashAlg::Sha256),
            hash_payload(&b, HashAlg::Sha256)
        );
    }

    #[test]
    fn sha256_digest_is_64_hex_chars() {
        let h = hash_payload(&json!({"tool": "calculator.add"}), HashAlg::Sha256);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sha512_digest_is_128_hex_chars() {
        let h = hash_payload(&json!({"tool": "calculator.add"}), HashAlg::Sha512);
        assert_eq!(h.len(), 128);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_payloads_hash_differently() {
        let a = hash_payload(&json!({"tool": "a"}), HashAlg::Sha256);
        let b = hash_payload(&json!({"tool": "b"}), HashAlg::Sha256);
        assert_ne!(a, b);
    }

    #[test]
    fn canonical_form_has_no_whitespace_padding() {
        let c = canonicalize(&json!({"a": 1}));
        assert_eq!(c, r#"{"a":1}"#);
    }

    #[test]
    fn array_element_order_is_preserved_not_sorted() {
        let a = json!({"items": [3, 1, 2]});
        let b = json!({"items": [3, 1, 2]});
        let c = json!({"items": [1, 2, 3]});
        assert_eq!(hash_payload(&a, HashAlg::Sha256), hash_payload(&b, HashAlg::Sha256));
        assert_ne!(hash_payload(&a, HashAlg::Sha256), hash_payload(&c, HashAlg::Sha256));
    }
}
