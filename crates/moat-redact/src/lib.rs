// SPDX-License-Identifier: MIT OR Apache-2.0
//! Secret redaction and deterministic hashing for request/response data.
//!
//! Design principles:
//!
//! * **Default-deny on secret keys** — a curated [`REDACT_KEYS`] registry
//!   covers the most common credential field names. Callers can extend it
//!   with a request-scoped set; the built-in registry is never subtractable.
//! * **Recursive** — nested maps are walked so secrets buried inside
//!   structured payloads are caught; lists recurse element-wise.
//! * **Non-destructive** — all functions return new values; originals are
//!   never mutated.
//! * **Deterministic** — [`hash_redacted`] produces the same SHA-256 digest
//!   for semantically identical data regardless of key order, because the
//!   canonical encoding sorts keys at every nesting level.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Replacement string written over sensitive values.
pub const REDACTED_SENTINEL: &str = "[REDACTED]";

/// Built-in sensitive key registry, matched case-insensitively.
pub const REDACT_KEYS: &[&str] = &[
    "authorization",
    "api_key",
    "api-key",
    "token",
    "password",
    "secret",
    "credential",
    "credentials",
    "access_token",
    "refresh_token",
    "client_secret",
    "private_key",
    "x-api-key",
    "x_api_key",
    "bearer",
    "session_token",
    "signing_key",
];

fn is_sensitive(key: &str, extra: &BTreeSet<String>) -> bool {
    let lower = key.to_ascii_lowercase();
    REDACT_KEYS.contains(&lower.as_str()) || extra.contains(&lower)
}

// ---------------------------------------------------------------------------
// Redaction
// ---------------------------------------------------------------------------

/// Return a copy of `headers` with sensitive values replaced by
/// [`REDACTED_SENTINEL`].
///
/// Only top-level keys are inspected (header maps are flat). Values of
/// non-object inputs pass through untouched.
pub fn redact_headers(headers: &Value) -> Value {
    match headers {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if is_sensitive(k, &BTreeSet::new()) {
                        (k.clone(), Value::String(REDACTED_SENTINEL.to_string()))
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Recursively redact sensitive keys in a JSON value.
///
/// `extra` is unioned with the built-in [`REDACT_KEYS`] registry; keys are
/// compared case-insensitively, so callers should supply lowercase entries.
pub fn redact_body(body: &Value, extra: &BTreeSet<String>) -> Value {
    match body {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if is_sensitive(k, extra) {
                        (k.clone(), Value::String(REDACTED_SENTINEL.to_string()))
                    } else {
                        (k.clone(), redact_body(v, extra))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_body(v, extra)).collect()),
        scalar => scalar.clone(),
    }
}

// ---------------------------------------------------------------------------
// Canonical encoding & hashing
// ---------------------------------------------------------------------------

/// Encode a JSON value canonically: keys sorted at every nesting level,
/// most-compact separators, no trailing whitespace.
///
/// The encoding is independent of serde_json's map backing (and of the
/// `preserve_order` feature a dependent crate may switch on), so two values
/// equal modulo key order always encode identically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json's string serialisation is already canonical.
            out.push_str(&serde_json::to_string(s).expect("string serialisation is infallible"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(key).expect("string serialisation is infallible"),
                );
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// SHA-256 of the canonical encoding, as 64 lowercase hex characters.
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Produce a deterministic SHA-256 hex digest of `data` after redaction.
///
/// Objects are redacted with [`redact_body`] first; all values are then
/// canonically encoded and hashed. Two inputs that are equal modulo key
/// order produce bit-identical digests.
pub fn hash_redacted(data: &Value, extra: &BTreeSet<String>) -> String {
    let prepared = match data {
        Value::Object(_) => redact_body(data, extra),
        other => other.clone(),
    };
    sha256_hex(&canonical_json(&prepared))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::Number(n.into())),
            "[a-zA-Z0-9_ -]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,10}", inner, 0..4).prop_map(|m| {
                    Value::Object(m.into_iter().collect())
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn redact_is_idempotent(value in arb_json()) {
            let extra = std::collections::BTreeSet::new();
            let once = redact_body(&value, &extra);
            prop_assert_eq!(redact_body(&once, &extra), once);
        }

        #[test]
        fn canonical_encoding_is_stable_across_reserialization(value in arb_json()) {
            let first = canonical_json(&value);
            let reparsed: Value = serde_json::from_str(&first).unwrap();
            prop_assert_eq!(canonical_json(&reparsed), first);
        }

        #[test]
        fn hash_matches_canonical_digest(value in arb_json()) {
            let extra = std::collections::BTreeSet::new();
            // Mirrors hash_redacted: only top-level objects are redacted.
            let prepared = match &value {
                Value::Object(_) => redact_body(&value, &extra),
                other => other.clone(),
            };
            prop_assert_eq!(
                hash_redacted(&value, &extra),
                sha256_hex(&canonical_json(&prepared))
            );
        }
    }
}
