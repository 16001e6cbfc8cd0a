// SPDX-License-Identifier: MIT OR Apache-2.0
//! Local cache for capability metadata fetched from the control plane.
//!
//! The gateway fetches capability details on the first request for a
//! given id and caches the result for five minutes, avoiding a registry
//! round-trip per execution. There is no cross-process coherence;
//! invalidation is by TTL expiry (or an explicit [`CapabilityCache::invalidate`]).
//!
//! When the registry is unreachable the cache can fall back to a
//! synthetic stub record so the gateway pipeline stays live; hardened
//! deployments disable this with `MOAT_ALLOW_STUB_CAPABILITY=false`.

use chrono::Utc;
use moat_core::{CapabilityManifest, CapabilityStatus, RiskClass};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Capability metadata as served by the control plane.
///
/// Looser than [`CapabilityManifest`]: registry records in flight may miss
/// fields that the manifest requires, so everything optional defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Capability identifier.
    #[serde(alias = "capability_id")]
    pub id: String,
    /// Logical name (used for name-based lookup fallback).
    #[serde(default)]
    pub name: String,
    /// Description for operators.
    #[serde(default)]
    pub description: String,
    /// Provider tag used for adapter lookup.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// Lifecycle status token (`active`, `published`, `draft`, ...).
    #[serde(default = "default_record_status")]
    pub status: String,
    /// Opaque input schema.
    #[serde(default)]
    pub input_schema: Value,
    /// Opaque output schema.
    #[serde(default)]
    pub output_schema: Value,
    /// Risk classification, when the registry carries one.
    #[serde(default)]
    pub risk_class: Option<RiskClass>,
    /// Host patterns this capability may reach.
    #[serde(default)]
    pub domain_allowlist: Vec<String>,
    /// Set when this record is a synthetic stub (registry unreachable).
    #[serde(default, rename = "_stub")]
    pub stub: bool,
}

fn default_provider() -> String {
    "stub".to_string()
}

fn default_version() -> String {
    "0.0.0".to_string()
}

fn default_record_status() -> String {
    "active".to_string()
}

impl CapabilityRecord {
    /// Whether the gateway may execute a capability in this state.
    pub fn is_executable(&self) -> bool {
        matches!(self.status.as_str(), "active" | "published")
    }

    /// Risk class, defaulting to low when the registry omits it.
    pub fn risk_class(&self) -> RiskClass {
        self.risk_class.unwrap_or(RiskClass::Low)
    }

    /// Project this record into the manifest shape the policy engine
    /// evaluates against. Missing registry fields get neutral defaults.
    pub fn to_manifest(&self) -> CapabilityManifest {
        let now = Utc::now();
        let status = match self.status.as_str() {
            "published" | "active" => CapabilityStatus::Published,
            "deprecated" => CapabilityStatus::Deprecated,
            "archived" => CapabilityStatus::Archived,
            _ => CapabilityStatus::Draft,
        };
        CapabilityManifest {
            id: self.id.clone(),
            name: if self.name.is_empty() { self.id.clone() } else { self.name.clone() },
            version: if moat_core::is_valid_semver(&self.version) {
                self.version.clone()
            } else {
                default_version()
            },
            provider: self.provider.clone(),
            method: "POST /execute".to_string(),
            description: if self.description.is_empty() {
                self.id.clone()
            } else {
                self.description.clone()
            },
            scopes: Default::default(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            risk_class: self.risk_class(),
            domain_allowlist: self.domain_allowlist.iter().cloned().collect(),
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// In-process TTL cache in front of the control-plane registry.
pub struct CapabilityCache {
    base_url: String,
    client: reqwest::Client,
    allow_stub: bool,
    entries: Mutex<HashMap<String, (CapabilityRecord, Instant)>>,
}

impl CapabilityCache {
    /// Create a cache talking to the registry at `base_url`.
    pub fn new(base_url: impl Into<String>, client: reqwest::Client, allow_stub: bool) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            allow_stub,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch capability metadata, using the local cache when fresh.
    ///
    /// Miss path: fetch by id; on 404 scan the listing by logical name;
    /// if the registry is unreachable, return (and cache) a synthetic
    /// stub record when stub fallback is enabled.
    pub async fn get(&self, capability_id: &str) -> Option<CapabilityRecord> {
        {
            let entries = self.entries.lock().await;
            if let Some((record, fetched_at)) = entries.get(capability_id) {
                if fetched_at.elapsed() < CACHE_TTL {
                    debug!(capability_id, "capability cache hit");
                    return Some(record.clone());
                }
            }
        }

        match self.fetch(capability_id).await {
            Ok(found) => {
                if let Some(record) = &found {
                    self.store(capability_id, record.clone()).await;
                }
                found
            }
            Err(err) => {
                if !self.allow_stub {
                    warn!(capability_id, error = %err, "registry unreachable, stub fallback disabled");
                    return None;
                }
                warn!(capability_id, error = %err, "registry unreachable, using stub capability");
                let stub = CapabilityRecord {
                    id: capability_id.to_string(),
                    name: format!("stub:{capability_id}"),
                    description: "Stub capability (registry unreachable)".to_string(),
                    provider: default_provider(),
                    version: default_version(),
                    status: default_record_status(),
                    input_schema: Value::Object(Default::default()),
                    output_schema: Value::Object(Default::default()),
                    risk_class: None,
                    domain_allowlist: Vec::new(),
                    stub: true,
                };
                self.store(capability_id, stub.clone()).await;
                Some(stub)
            }
        }
    }

    /// Erase a single cache entry.
    pub async fn invalidate(&self, capability_id: &str) {
        self.entries.lock().await.remove(capability_id);
    }

    async fn store(&self, capability_id: &str, record: CapabilityRecord) {
        self.entries
            .lock()
            .await
            .insert(capability_id.to_string(), (record, Instant::now()));
    }

    async fn fetch(&self, capability_id: &str) -> Result<Option<CapabilityRecord>, reqwest::Error> {
        let by_id = self
            .client
            .get(format!("{}/capabilities/{capability_id}", self.base_url))
            .send()
            .await?;

        if by_id.status() == reqwest::StatusCode::NOT_FOUND {
            // Fall back to name-based search (e.g. "openai.inference").
            let listing = self
                .client
                .get(format!("{}/capabilities", self.base_url))
                .send()
                .await?;
            if !listing.status().is_success() {
                return Ok(None);
            }
            let data: Value = listing.json().await?;
            let items = match &data {
                Value::Object(map) => map.get("items").and_then(Value::as_array).cloned(),
                Value::Array(items) => Some(items.clone()),
                _ => None,
            };
            let found = items.into_iter().flatten().find_map(|item| {
                let record: CapabilityRecord = serde_json::from_value(item).ok()?;
                (record.name == capability_id).then_some(record)
            });
            if found.is_some() {
                debug!(capability_id, "capability found by name");
            }
            return Ok(found);
        }

        let by_id = by_id.error_for_status()?;
        let record: CapabilityRecord = by_id.json().await?;
        debug!(capability_id, "capability fetched from control plane");
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_executability_accepts_active_and_published() {
        for status in ["active", "published"] {
            let record: CapabilityRecord =
                serde_json::from_value(json!({"id": "cap_x", "status": status})).unwrap();
            assert!(record.is_executable(), "status {status}");
        }
        for status in ["draft", "deprecated", "archived"] {
            let record: CapabilityRecord =
                serde_json::from_value(json!({"id": "cap_x", "status": status})).unwrap();
            assert!(!record.is_executable(), "status {status}");
        }
    }

    #[test]
    fn record_accepts_registry_and_stub_field_names() {
        let record: CapabilityRecord =
            serde_json::from_value(json!({"capability_id": "cap_y", "_stub": true})).unwrap();
        assert_eq!(record.id, "cap_y");
        assert!(record.stub);
        assert_eq!(record.provider, "stub");
        assert_eq!(record.status, "active");
    }

    #[test]
    fn manifest_projection_defaults_missing_fields() {
        let record: CapabilityRecord = serde_json::from_value(json!({
            "id": "cap_z",
            "status": "published",
            "version": "not-semver",
            "domain_allowlist": ["*.acme.com"],
        }))
        .unwrap();
        let manifest = record.to_manifest();
        manifest.validate().expect("projected manifest is valid");
        assert_eq!(manifest.version, "0.0.0");
        assert_eq!(manifest.risk_class, RiskClass::Low);
        assert!(manifest.domain_allowlist.contains("*.acme.com"));
        assert_eq!(manifest.status, CapabilityStatus::Published);
    }
}
