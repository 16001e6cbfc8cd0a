// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inbound on-chain intent bridge.
//!
//! When the chain indexer detects an on-chain intent that maps to a
//! capability, it POSTs the decoded event here. The bridge resolves the
//! sender address to a tenant and routes the intent through the standard
//! execution pipeline (policy, adapter, receipt, trust plane). This is the
//! one-way chain-to-gateway direction; the reverse (receipt-to-chain) is
//! the chain hook.
//!
//! The bridge depends on the [`Executor`] trait rather than the gateway
//! state directly, which keeps the gateway/bridge dependency acyclic.

use crate::execute::{ExecuteRequest, ReceiptResponse};
use async_trait::async_trait;
use moat_error::MoatError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// On-chain intent event forwarded by the indexer.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundIntentEvent {
    /// bytes32 intent hash (0x-prefixed).
    pub intent_hash: String,
    /// EIP-155 chain ID where the intent was emitted.
    pub chain_id: u64,
    /// Contract that emitted the intent.
    pub contract_address: String,
    /// Block containing the intent transaction.
    pub block_number: u64,
    /// Transaction hash (0x-prefixed).
    pub tx_hash: String,
    /// Capability ID mapped from the on-chain action.
    pub capability_id: String,
    /// Decoded parameters from calldata.
    #[serde(default)]
    pub params: Value,
    /// Tenant ID; derived from the sender when not provided.
    #[serde(default)]
    pub tenant_id: String,
    /// On-chain sender address (the agent).
    pub sender: String,
}

/// Re-entry point into the execution pipeline.
///
/// The gateway implements this; the bridge only sees the trait.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a capability under an already-authenticated tenant.
    async fn execute(
        &self,
        capability_id: &str,
        request: ExecuteRequest,
        auth_tenant: &str,
        request_id: &str,
    ) -> Result<ReceiptResponse, MoatError>;
}

/// Sender-address to tenant resolution.
///
/// Order: in-memory cache, then the upstream agent registry (agents whose
/// on-chain registry address equals the sender), then the static fallback
/// map from configuration.
pub struct TenantResolver {
    client: reqwest::Client,
    registry_url: String,
    fallback: HashMap<String, String>,
    cache: Mutex<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct AgentRecord {
    #[serde(default)]
    erc8004_registry_address: Option<String>,
    #[serde(default)]
    owner_tenant_id: Option<String>,
}

impl TenantResolver {
    /// Create a resolver against the agent registry at `registry_url`.
    pub fn new(
        client: reqwest::Client,
        registry_url: impl Into<String>,
        fallback: HashMap<String, String>,
    ) -> Self {
        Self {
            client,
            registry_url: registry_url.into(),
            fallback: fallback
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Parse a `0xabc=tenant1,0xdef=tenant2` fallback map.
    pub fn parse_fallback_map(raw: &str) -> HashMap<String, String> {
        raw.split(',')
            .filter_map(|pair| {
                let (address, tenant) = pair.split_once('=')?;
                let address = address.trim().to_ascii_lowercase();
                let tenant = tenant.trim();
                (!address.is_empty() && !tenant.is_empty())
                    .then(|| (address, tenant.to_string()))
            })
            .collect()
    }

    /// Resolve `sender` to a tenant id, or `None` when unregistered.
    pub async fn resolve(&self, sender: &str) -> Option<String> {
        let key = sender.to_ascii_lowercase();

        if let Some(tenant) = self.cache.lock().await.get(&key) {
            debug!(sender = %key, tenant_id = %tenant, "sender resolved from cache");
            return Some(tenant.clone());
        }

        if let Some(tenant) = self.query_registry(&key).await {
            self.cache.lock().await.insert(key.clone(), tenant.clone());
            return Some(tenant);
        }

        if let Some(tenant) = self.fallback.get(&key) {
            debug!(sender = %key, tenant_id = %tenant, "sender resolved from fallback map");
            return Some(tenant.clone());
        }

        None
    }

    async fn query_registry(&self, sender: &str) -> Option<String> {
        let response = self
            .client
            .get(format!("{}/agents", self.registry_url))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let data: Value = response.json().await.ok()?;
        let items = match &data {
            Value::Object(map) => map.get("items").and_then(Value::as_array).cloned(),
            Value::Array(items) => Some(items.clone()),
            _ => None,
        }?;
        for item in items {
            let Ok(agent) = serde_json::from_value::<AgentRecord>(item) else {
                continue;
            };
            let matches = agent
                .erc8004_registry_address
                .as_deref()
                .is_some_and(|address| address.eq_ignore_ascii_case(sender));
            if matches {
                if let Some(tenant) = agent.owner_tenant_id {
                    debug!(sender, tenant_id = %tenant, "sender resolved from agent registry");
                    return Some(tenant);
                }
            }
        }
        None
    }
}

/// Process an inbound intent: resolve the tenant and re-enter the
/// pipeline under it. The indexer is a trusted ingester, so the usual
/// caller-auth check is bypassed; sender resolution is the authorization.
pub async fn process_intent(
    executor: &dyn Executor,
    resolver: &TenantResolver,
    event: InboundIntentEvent,
    request_id: &str,
) -> Result<(ReceiptResponse, Value), MoatError> {
    let tenant_id = if event.tenant_id.is_empty() {
        resolver.resolve(&event.sender).await
    } else {
        Some(event.tenant_id.clone())
    };
    let Some(tenant_id) = tenant_id else {
        warn!(
            sender = %event.sender,
            intent_hash = %event.intent_hash,
            request_id,
            "inbound intent from unregistered sender"
        );
        return Err(MoatError::new(
            moat_error::ErrorCode::TenantMismatch,
            format!("sender {} is not registered as a tenant", event.sender),
        )
        .with_context("sender", &event.sender));
    };

    info!(
        intent_hash = %event.intent_hash,
        chain_id = event.chain_id,
        capability_id = %event.capability_id,
        tenant_id = %tenant_id,
        sender = %event.sender,
        block_number = event.block_number,
        request_id,
        "processing inbound intent"
    );

    let request = ExecuteRequest {
        params: event.params.clone(),
        tenant_id: tenant_id.clone(),
        scope: "execute".to_string(),
        idempotency_key: None,
    };

    let receipt = executor
        .execute(&event.capability_id, request, &tenant_id, request_id)
        .await?;

    let correlation = serde_json::json!({
        "intent_hash": event.intent_hash,
        "chain_id": event.chain_id,
        "tx_hash": event.tx_hash,
        "block_number": event.block_number,
        "contract_address": event.contract_address,
        "sender": event.sender,
    });

    Ok((receipt, correlation))
}
