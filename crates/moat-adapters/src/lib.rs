// SPDX-License-Identifier: MIT OR Apache-2.0
//! Provider adapters for the Moat gateway.
//!
//! Each adapter wraps a single external provider and presents a uniform
//! async [`Adapter::execute`] interface. The [`AdapterRegistry`] maps
//! provider names to adapter instances; the gateway looks up the correct
//! adapter at execution time from the capability's `provider` field,
//! falling back to the [`StubAdapter`] when nothing is registered.

#![deny(unsafe_code)]

mod http_proxy;
mod net;
mod slack;
mod stub;

pub use http_proxy::HttpProxyAdapter;
pub use net::{is_private_host, parse_domain_allowlist, validate_url};
pub use slack::SlackAdapter;
pub use stub::StubAdapter;

use async_trait::async_trait;
use moat_core::ErrorTaxonomy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// AdapterError
// ---------------------------------------------------------------------------

/// Failure class of an adapter call, used to derive the outcome taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// The caller's params were rejected before any egress.
    Validation,
    /// The upstream call exceeded its deadline.
    Timeout,
    /// The upstream transport or protocol failed.
    Upstream,
    /// Anything else.
    Unknown,
}

/// Error raised by an adapter execution.
///
/// Carries the provider tag and, when available, the upstream status code
/// and request id so failures stay distinguishable without leaking
/// provider internals to the caller.
#[derive(Debug, thiserror::Error)]
#[error("[{provider}] {message}")]
pub struct AdapterError {
    /// Failure class.
    pub kind: AdapterErrorKind,
    /// Human-readable description. Never contains credentials.
    pub message: String,
    /// Provider tag of the adapter that failed.
    pub provider: String,
    /// Upstream HTTP status, if one was observed.
    pub status_code: Option<u16>,
    /// Provider-side request id for correlation, if one was returned.
    pub provider_request_id: Option<String>,
}

impl AdapterError {
    /// Parameter validation failure (no egress happened).
    pub fn validation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Validation,
            message: message.into(),
            provider: provider.into(),
            status_code: None,
            provider_request_id: None,
        }
    }

    /// Deadline exceeded talking to the upstream.
    pub fn timeout(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Timeout,
            message: message.into(),
            provider: provider.into(),
            status_code: None,
            provider_request_id: None,
        }
    }

    /// Upstream transport/protocol failure.
    pub fn upstream(
        provider: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self {
            kind: AdapterErrorKind::Upstream,
            message: message.into(),
            provider: provider.into(),
            status_code,
            provider_request_id: None,
        }
    }

    /// Attach the provider-side request id.
    pub fn with_provider_request_id(mut self, id: impl Into<String>) -> Self {
        self.provider_request_id = Some(id.into());
        self
    }

    /// Coarse error taxonomy for the outcome event derived from this error.
    pub fn taxonomy(&self) -> ErrorTaxonomy {
        match (self.kind, self.status_code) {
            (AdapterErrorKind::Timeout, _) => ErrorTaxonomy::Timeout,
            (AdapterErrorKind::Validation, _) => ErrorTaxonomy::Validation,
            (_, Some(429)) => ErrorTaxonomy::RateLimit,
            (_, Some(401)) | (_, Some(403)) => ErrorTaxonomy::Auth,
            (_, Some(code)) if code >= 500 => ErrorTaxonomy::Provider5xx,
            _ => ErrorTaxonomy::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Uniform execution interface over one external provider.
///
/// Implementations must perform all I/O asynchronously and must never log
/// or persist the raw credential value.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Canonical provider name (e.g. `"http_proxy"`).
    fn provider_name(&self) -> &'static str;

    /// Execute the capability against the upstream provider.
    ///
    /// `credential` is the plaintext secret resolved from the vault for
    /// this execution; it must never appear in logs or results.
    async fn execute(
        &self,
        capability_id: &str,
        capability_name: &str,
        params: &Value,
        credential: Option<&str>,
    ) -> Result<Value, AdapterError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry mapping provider names to [`Adapter`] instances.
///
/// Provider-to-adapter is one-to-one; re-registration silently replaces
/// the previous entry (allowing hot-swap in tests). Lookups for unknown
/// providers via [`AdapterRegistry::get_or_stub`] fall back to the stub.
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
    stub: Arc<StubAdapter>,
}

impl AdapterRegistry {
    /// Create a registry with only the stub fallback.
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            stub: Arc::new(StubAdapter::new()),
        }
    }

    /// Register an adapter under its provider name, replacing any previous
    /// entry for the same name.
    pub fn register(&self, adapter: Arc<dyn Adapter>) {
        let name = adapter.provider_name().to_string();
        let mut adapters = self.adapters.write().expect("adapter registry lock poisoned");
        if adapters.insert(name.clone(), adapter).is_some() {
            warn!(provider = %name, "replacing existing adapter for provider");
        } else {
            info!(provider = %name, "adapter registered");
        }
    }

    /// Return the adapter for `provider`, or `None` if not registered.
    pub fn get(&self, provider: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters
            .read()
            .expect("adapter registry lock poisoned")
            .get(provider)
            .cloned()
    }

    /// Return the adapter for `provider`, falling back to the stub.
    pub fn get_or_stub(&self, provider: &str) -> Arc<dyn Adapter> {
        match self.get(provider) {
            Some(adapter) => adapter,
            None => {
                warn!(provider, "no adapter registered for provider, using stub");
                Arc::clone(&self.stub) as Arc<dyn Adapter>
            }
        }
    }

    /// Names of all registered providers, unordered.
    pub fn registered_providers(&self) -> Vec<String> {
        self.adapters
            .read()
            .expect("adapter registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NamedAdapter(&'static str);

    #[async_trait]
    impl Adapter for NamedAdapter {
        fn provider_name(&self) -> &'static str {
            self.0
        }

        async fn execute(
            &self,
            _capability_id: &str,
            _capability_name: &str,
            _params: &Value,
            _credential: Option<&str>,
        ) -> Result<Value, AdapterError> {
            Ok(json!({"from": self.0}))
        }
    }

    #[tokio::test]
    async fn registry_lookup_and_replace() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(NamedAdapter("slack")));
        assert!(registry.get("slack").is_some());
        assert!(registry.get("missing").is_none());

        // Silent replacement keeps the mapping one-to-one.
        registry.register(Arc::new(NamedAdapter("slack")));
        assert_eq!(registry.registered_providers(), vec!["slack".to_string()]);
    }

    #[tokio::test]
    async fn get_or_stub_falls_back_for_unknown_providers() {
        let registry = AdapterRegistry::new();
        let adapter = registry.get_or_stub("nonexistent");
        assert_eq!(adapter.provider_name(), "stub");

        let result = adapter
            .execute("cap_x", "Cap X", &json!({"a": 1}), None)
            .await
            .unwrap();
        assert_eq!(result["echo_params"], json!({"a": 1}));
    }

    #[test]
    fn taxonomy_derivation_covers_the_table() {
        let t = AdapterError::timeout("p", "deadline").taxonomy();
        assert_eq!(t, ErrorTaxonomy::Timeout);

        let v = AdapterError::validation("p", "bad params").taxonomy();
        assert_eq!(v, ErrorTaxonomy::Validation);

        let rl = AdapterError::upstream("p", "slow down", Some(429)).taxonomy();
        assert_eq!(rl, ErrorTaxonomy::RateLimit);

        let auth = AdapterError::upstream("p", "denied", Some(401)).taxonomy();
        assert_eq!(auth, ErrorTaxonomy::Auth);

        let five = AdapterError::upstream("p", "boom", Some(503)).taxonomy();
        assert_eq!(five, ErrorTaxonomy::Provider5xx);

        let unknown = AdapterError::upstream("p", "conn reset", None).taxonomy();
        assert_eq!(unknown, ErrorTaxonomy::Unknown);
    }

    #[test]
    fn error_display_carries_provider_tag() {
        let err = AdapterError::upstream("http_proxy", "bad gateway", Some(502));
        assert_eq!(err.to_string(), "[http_proxy] bad gateway");
    }
}
