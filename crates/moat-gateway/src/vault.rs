// SPDX-License-Identifier: MIT OR Apache-2.0
//! Credential resolution by opaque reference.
//!
//! The execution path never accepts raw credentials: a tenant's connection
//! record names a credential *reference*, and the configured vault
//! resolves it to the plaintext secret at dispatch time. The resolved
//! value is handed to the adapter and nothing else; it is never logged.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Backend that turns an opaque credential reference into a secret.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Resolve `reference` to a plaintext credential, or `None` when the
    /// reference is unknown.
    async fn resolve(&self, reference: &str) -> Option<String>;
}

/// Vault that resolves `env:VAR_NAME` references from the process
/// environment. The default backend for single-node deployments.
pub struct EnvVault;

#[async_trait]
impl CredentialVault for EnvVault {
    async fn resolve(&self, reference: &str) -> Option<String> {
        let var = reference.strip_prefix("env:")?;
        std::env::var(var).ok().filter(|v| !v.is_empty())
    }
}

/// In-memory vault for tests.
#[derive(Default)]
pub struct MemoryVault {
    secrets: HashMap<String, String>,
}

impl MemoryVault {
    /// Build a vault from `(reference, secret)` pairs.
    pub fn new(secrets: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            secrets: secrets.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CredentialVault for MemoryVault {
    async fn resolve(&self, reference: &str) -> Option<String> {
        self.secrets.get(reference).cloned()
    }
}

/// Tenant connection records: which credential reference to use for a
/// given `(tenant, provider)` pair.
#[derive(Default)]
pub struct ConnectionStore {
    refs: RwLock<HashMap<(String, String), String>>,
}

impl ConnectionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the credential reference for a tenant/provider pair.
    pub fn upsert(&self, tenant_id: &str, provider: &str, credential_ref: &str) {
        self.refs.write().expect("connection store lock poisoned").insert(
            (tenant_id.to_string(), provider.to_string()),
            credential_ref.to_string(),
        );
    }

    /// Credential reference for this tenant/provider, if connected.
    pub fn credential_ref(&self, tenant_id: &str, provider: &str) -> Option<String> {
        let found = self
            .refs
            .read()
            .expect("connection store lock poisoned")
            .get(&(tenant_id.to_string(), provider.to_string()))
            .cloned();
        debug!(tenant_id, provider, connected = found.is_some(), "connection lookup");
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_vault_resolves_known_references() {
        let vault = MemoryVault::new([("conn-ref-1".to_string(), "s3cr3t".to_string())]);
        assert_eq!(vault.resolve("conn-ref-1").await.as_deref(), Some("s3cr3t"));
        assert!(vault.resolve("conn-ref-2").await.is_none());
    }

    #[tokio::test]
    async fn env_vault_only_accepts_env_references() {
        let vault = EnvVault;
        assert!(vault.resolve("plain-ref").await.is_none());
        assert!(vault.resolve("env:MOAT_TEST_UNSET_VARIABLE_XYZ").await.is_none());
    }

    #[test]
    fn connection_store_is_scoped_by_tenant_and_provider() {
        let store = ConnectionStore::new();
        store.upsert("t1", "slack", "ref-a");
        assert_eq!(store.credential_ref("t1", "slack").as_deref(), Some("ref-a"));
        assert!(store.credential_ref("t1", "github").is_none());
        assert!(store.credential_ref("t2", "slack").is_none());

        store.upsert("t1", "slack", "ref-b");
        assert_eq!(store.credential_ref("t1", "slack").as_deref(), Some("ref-b"));
    }
}
