// SPDX-License-Identifier: MIT OR Apache-2.0
//! Idempotency key derivation and storage contracts.
//!
//! An idempotency key pins the logical identity of a request: a caller
//! retrying with the same key observes the previously recorded receipt
//! instead of re-executing the capability.
//!
//! [`IdempotencyStore`] is the storage contract; the gateway is generic
//! over it, so the in-memory implementation here and a distributed store
//! (Redis SETNX + TTL) are interchangeable. The store maps
//! `(tenant_id, key)` to a cached value with an expiry timestamp; expired
//! entries are evicted lazily on read.

#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Default entry lifetime: 24 hours.
pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

// ---------------------------------------------------------------------------
// Key generation
// ---------------------------------------------------------------------------

/// Derive a deterministic idempotency key for the given request triple.
///
/// The key is the SHA-256 digest of the canonical JSON encoding of
/// `(capability_id, tenant_id, input_data)`, so key order inside
/// `input_data` does not affect the result.
///
/// ```
/// use moat_idempotency::generate_idempotency_key;
/// use serde_json::json;
///
/// let k1 = generate_idempotency_key("cap_v1", "t1", &json!({"q": "hello"}));
/// let k2 = generate_idempotency_key("cap_v1", "t1", &json!({"q": "hello"}));
/// assert_eq!(k1, k2);
/// assert_ne!(k1, generate_idempotency_key("cap_v1", "t1", &json!({"q": "world"})));
/// ```
pub fn generate_idempotency_key(
    capability_id: &str,
    tenant_id: &str,
    input_data: &serde_json::Value,
) -> String {
    let payload = json!({
        "capability_id": capability_id,
        "tenant_id": tenant_id,
        "input_data": input_data,
    });
    moat_redact::sha256_hex(&moat_redact::canonical_json(&payload))
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Async key-value store mapping `(tenant, key)` to a cached receipt.
///
/// Implementations must honour the TTL contract: a stored value must not
/// be returned after `ttl_seconds` has elapsed. `set` is an upsert and is
/// idempotent — repeated writes of the same triple produce the same
/// observable state. A store that is unavailable should report misses
/// rather than fail the request path.
#[async_trait]
pub trait IdempotencyStore<R>: Send + Sync
where
    R: Clone + Send + Sync + 'static,
{
    /// Return the cached value for `(tenant_id, key)`, or `None` if absent
    /// or expired.
    async fn get(&self, tenant_id: &str, key: &str) -> Option<R>;

    /// Persist `value` under `(tenant_id, key)` for `ttl_seconds`.
    async fn set(&self, tenant_id: &str, key: &str, value: R, ttl_seconds: u64);

    /// Remove all entries. Useful for test isolation.
    async fn clear(&self);
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct Entry<R> {
    value: R,
    expiry_at: DateTime<Utc>,
}

/// In-memory [`IdempotencyStore`] for single-process deployments and tests.
///
/// Entries expire lazily: an expired entry is evicted when `get` touches
/// it, not on a background timer.
pub struct MemoryIdempotencyStore<R> {
    entries: Mutex<HashMap<(String, String), Entry<R>>>,
}

impl<R> MemoryIdempotencyStore<R> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of entries currently held, including not-yet-evicted expired
    /// ones.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl<R> Default for MemoryIdempotencyStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> IdempotencyStore<R> for MemoryIdempotencyStore<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn get(&self, tenant_id: &str, key: &str) -> Option<R> {
        let mut entries = self.entries.lock().await;
        let map_key = (tenant_id.to_string(), key.to_string());
        match entries.get(&map_key) {
            None => None,
            Some(entry) if Utc::now() >= entry.expiry_at => {
                entries.remove(&map_key);
                debug!(tenant_id, idempotency_key = key, "expired entry evicted");
                None
            }
            Some(entry) => {
                debug!(tenant_id, idempotency_key = key, "idempotency cache hit");
                Some(entry.value.clone())
            }
        }
    }

    async fn set(&self, tenant_id: &str, key: &str, value: R, ttl_seconds: u64) {
        let expiry_at = Utc::now() + Duration::seconds(ttl_seconds as i64);
        self.entries.lock().await.insert(
            (tenant_id.to_string(), key.to_string()),
            Entry { value, expiry_at },
        );
        debug!(tenant_id, idempotency_key = key, ttl_seconds, "idempotency entry stored");
    }

    async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn key_generation_is_deterministic_and_order_independent() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"q":"hello","page":1}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"page":1,"q":"hello"}"#).unwrap();
        assert_eq!(
            generate_idempotency_key("cap_v1", "t1", &a),
            generate_idempotency_key("cap_v1", "t1", &b)
        );
    }

    #[test]
    fn key_changes_with_any_component() {
        let input = json!({"q": "hello"});
        let base = generate_idempotency_key("cap_v1", "t1", &input);
        assert_ne!(base, generate_idempotency_key("cap_v2", "t1", &input));
        assert_ne!(base, generate_idempotency_key("cap_v1", "t2", &input));
        assert_ne!(base, generate_idempotency_key("cap_v1", "t1", &json!({"q": "bye"})));
    }

    #[test]
    fn key_is_lowercase_hex() {
        let key = generate_idempotency_key("cap_v1", "t1", &json!({}));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn get_returns_stored_value_before_expiry() {
        let store = MemoryIdempotencyStore::new();
        store.set("t1", "k1", json!({"receipt_id": "r1"}), 300).await;
        let cached = store.get("t1", "k1").await.unwrap();
        assert_eq!(cached["receipt_id"], "r1");
    }

    #[tokio::test]
    async fn entries_are_scoped_by_tenant() {
        let store = MemoryIdempotencyStore::new();
        store.set("t1", "k1", json!("a"), 300).await;
        assert!(store.get("t2", "k1").await.is_none());
        assert!(store.get("t1", "k1").await.is_some());
    }

    #[tokio::test]
    async fn set_is_an_upsert() {
        let store = MemoryIdempotencyStore::new();
        store.set("t1", "k1", json!("first"), 300).await;
        store.set("t1", "k1", json!("second"), 300).await;
        assert_eq!(store.get("t1", "k1").await.unwrap(), json!("second"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn repeated_identical_writes_keep_state_stable() {
        let store = MemoryIdempotencyStore::new();
        for _ in 0..3 {
            store.set("t1", "k1", json!("same"), 300).await;
        }
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("t1", "k1").await.unwrap(), json!("same"));
    }

    #[tokio::test]
    async fn expired_entries_are_never_returned_and_get_evicted() {
        let store = MemoryIdempotencyStore::new();
        store.set("t1", "k1", json!("v"), 0).await;
        assert!(store.get("t1", "k1").await.is_none());
        // The expired read evicted the entry.
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = MemoryIdempotencyStore::new();
        store.set("t1", "k1", json!(1), 300).await;
        store.set("t2", "k2", json!(2), 300).await;
        store.clear().await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn store_is_usable_as_a_trait_object() {
        let store: Arc<dyn IdempotencyStore<serde_json::Value>> =
            Arc::new(MemoryIdempotencyStore::new());
        store.set("t1", "k1", json!("v"), DEFAULT_TTL_SECONDS).await;
        assert_eq!(store.get("t1", "k1").await.unwrap(), json!("v"));
    }

    #[tokio::test]
    async fn concurrent_writers_preserve_uniqueness() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.set("t1", "shared", json!(i), 300).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // Exactly one entry survives, whichever writer landed last.
        assert_eq!(store.len().await, 1);
        assert!(store.get("t1", "shared").await.is_some());
    }
}
