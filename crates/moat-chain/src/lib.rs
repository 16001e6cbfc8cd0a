// SPDX-License-Identifier: MIT OR Apache-2.0
//! Post-execution hook that anchors gateway receipts on-chain.
//!
//! Every successful execution produces two audit records: the off-chain
//! gateway receipt, and an on-chain intent receipt submitted by this hook.
//! Both share the same intent hash, enabling cross-reference between the
//! off-chain audit log and the on-chain proof.
//!
//! The hook is strictly best-effort: it runs in the background after the
//! caller already has their response, and every failure degrades to one of
//! the dry-run/failed fallback states instead of surfacing.

#![deny(unsafe_code)]

pub mod hashes;
pub mod submit;

pub use hashes::{
    CanonicalIntentEnvelope, DOMAIN_OFFCHAIN, DOMAIN_ONCHAIN, IntentEnvelopeInputs,
};
pub use submit::{IntentReceipt, ReceiptHashes, SubmitOutcome};

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Identifier of the intent-hash construction pinned by this deployment.
pub const INTENT_HASH_SCHEME: &str = "cie-v1";

const DEFAULT_CHAIN_ID: u64 = 11_155_111; // Sepolia
const DEFAULT_RECEIPT_HUB: &str = "0xD66A1e880AA3939CA066a9EA1dD37ad3d01D977c";
const DEFAULT_SOLVER_ADDRESS: &str = "0x83Be08FFB22b61733eDf15b0ee9Caf5562cd888d";
const DEFAULT_AGENT_ID: u64 = 1319;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures inside the chain hook. Never propagated past the hook; they
/// collapse into [`ChainState::SepoliaFailed`].
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Configuration was unusable (bad address, bad URL).
    #[error("chain config error: {0}")]
    Config(String),

    /// The signer rejected the payload or the key was invalid.
    #[error("signer error: {0}")]
    Signer(String),

    /// JSON-RPC transport or contract call failure.
    #[error("rpc error: {0}")]
    Rpc(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime configuration for the chain hook.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Submit for real when false; log-only otherwise.
    pub dry_run: bool,
    /// JSON-RPC endpoint; absent degrades to `dry_run_no_rpc`.
    pub rpc_url: Option<String>,
    /// Solver signing key (hex); absent degrades to `dry_run_no_key`.
    pub signer_key: Option<String>,
    /// Pinned EIP-155 chain id.
    pub chain_id: u64,
    /// `IntentReceiptHub` contract address.
    pub receipt_hub: Address,
    /// Solver identity address (also the envelope operator).
    pub solver_address: Address,
    /// Configured numeric agent identity for the intent envelope.
    pub agent_id: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            rpc_url: None,
            signer_key: None,
            chain_id: DEFAULT_CHAIN_ID,
            receipt_hub: DEFAULT_RECEIPT_HUB.parse().expect("default hub address"),
            solver_address: DEFAULT_SOLVER_ADDRESS.parse().expect("default solver address"),
            agent_id: DEFAULT_AGENT_ID,
        }
    }
}

impl ChainConfig {
    /// Load configuration from the environment.
    ///
    /// The signing key is read from the file named by
    /// `MOAT_SOLVER_KEY_FILE` when present (preferred over the raw
    /// `MOAT_SOLVER_KEY` variable so the secret stays off the process
    /// environment).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let signer_key = std::env::var("MOAT_SOLVER_KEY_FILE")
            .ok()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .map(|contents| contents.trim().to_string())
            .or_else(|| std::env::var("MOAT_SOLVER_KEY").ok())
            .filter(|key| !key.is_empty());

        Self {
            dry_run: std::env::var("MOAT_DRY_RUN")
                .map(|v| v.to_ascii_lowercase() != "false")
                .unwrap_or(true),
            rpc_url: std::env::var("MOAT_RPC_URL").ok().filter(|v| !v.is_empty()),
            signer_key,
            chain_id: env_parse("MOAT_CHAIN_ID", defaults.chain_id),
            receipt_hub: env_address("MOAT_RECEIPT_HUB", defaults.receipt_hub),
            solver_address: env_address("MOAT_SOLVER_ADDRESS", defaults.solver_address),
            agent_id: env_parse("MOAT_AGENT_ID", defaults.agent_id),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_address(key: &str, default: Address) -> Address {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Chain receipt record
// ---------------------------------------------------------------------------

/// Where the receipt ended up, in degradation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// Dry-run mode is on; nothing was submitted.
    DryRun,
    /// No RPC endpoint configured; fell back to dry-run.
    DryRunNoRpc,
    /// No signing key available; fell back to dry-run.
    DryRunNoKey,
    /// Submission was attempted and failed.
    SepoliaFailed,
    /// Confirmed on chain.
    Sepolia,
}

/// The record returned by the hook: five linked hashes plus submission
/// metadata, mirroring what the off-chain audit log stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainReceipt {
    /// Canonical intent envelope hash (0x-prefixed).
    pub intent_hash: String,
    /// Execution result hash (0x-prefixed).
    pub outcome_hash: String,
    /// Policy constraints hash (0x-prefixed).
    pub constraints_hash: String,
    /// Execution route hash (0x-prefixed).
    pub route_hash: String,
    /// Full-receipt evidence hash (0x-prefixed).
    pub evidence_hash: String,
    /// Which intent-hash construction this deployment pinned.
    pub intent_hash_scheme: String,
    /// Solver identity address.
    pub solver: String,
    /// Capability that was executed.
    pub capability_id: String,
    /// Off-chain gateway receipt id.
    pub moat_receipt_id: String,
    /// Tenant the execution ran under.
    pub tenant_id: String,
    /// Execution timestamp carried over from the gateway receipt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Terminal state of the submission attempt.
    pub chain: ChainState,
    /// Error message when `chain` is `sepolia_failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Transaction hash when confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// On-chain receipt id parsed from the `ReceiptPosted` event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_chain_receipt_id: Option<String>,
    /// Block number when confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Gas consumed when confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    /// Solver nonce observed at submission time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solver_nonce: Option<u64>,
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

fn receipt_str<'v>(receipt: &'v Value, key: &str) -> &'v str {
    receipt.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Post a chain receipt for a successful gateway execution.
///
/// Called as a background task after the response has been returned.
/// Non-success receipts are skipped (`None`). Every failure degrades to a
/// fallback [`ChainState`]; this function never errors and never alters
/// the user-visible gateway response.
pub async fn post_chain_receipt(receipt: &Value, config: &ChainConfig) -> Option<ChainReceipt> {
    if receipt_str(receipt, "status") != "success" {
        debug!(
            receipt_id = receipt_str(receipt, "receipt_id"),
            "skipping chain receipt for non-success execution"
        );
        return None;
    }

    let tenant_id = receipt_str(receipt, "tenant_id").to_string();
    let capability_id = receipt_str(receipt, "capability_id").to_string();
    let executed_at = receipt.get("executed_at").and_then(Value::as_str).map(str::to_string);

    // The gateway always sets input_hash; fall back to hashing the result
    // so a hand-fed receipt still produces a stable envelope.
    let input_hash = match receipt.get("input_hash").and_then(Value::as_str) {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => moat_redact::sha256_hex(&moat_redact::canonical_json(
            receipt.get("result").unwrap_or(&Value::Null),
        )),
    };

    let domain = if receipt.get("web3").is_some() || receipt.get("intent_correlation").is_some() {
        DOMAIN_ONCHAIN
    } else {
        DOMAIN_OFFCHAIN
    };

    let timestamp = executed_at.as_deref().map(hashes::parse_timestamp).unwrap_or(0);

    let intent = hashes::intent_hash(&IntentEnvelopeInputs {
        tenant_id: tenant_id.clone(),
        capability_id: capability_id.clone(),
        input_hash,
        agent_address: config.solver_address,
        agent_id: config.agent_id,
        domain,
        nonce: 0,
        timestamp,
    });
    let outcome = hashes::outcome_hash(receipt);
    let constraints = hashes::constraints_hash(receipt);
    let route = hashes::route_hash(receipt);
    let evidence = hashes::evidence_hash(receipt);

    let now = Utc::now().timestamp().max(0) as u64;
    let receipt_hashes = ReceiptHashes {
        intent,
        constraints,
        route,
        outcome,
        evidence,
        created_at: now,
        expiry: now + 86_400,
    };

    let mut record = ChainReceipt {
        intent_hash: format!("{intent}"),
        outcome_hash: format!("{outcome}"),
        constraints_hash: format!("{constraints}"),
        route_hash: format!("{route}"),
        evidence_hash: format!("{evidence}"),
        intent_hash_scheme: INTENT_HASH_SCHEME.to_string(),
        solver: format!("{}", config.solver_address),
        capability_id: capability_id.clone(),
        moat_receipt_id: receipt_str(receipt, "receipt_id").to_string(),
        tenant_id,
        timestamp: executed_at,
        chain: ChainState::DryRun,
        error: None,
        tx_hash: None,
        on_chain_receipt_id: None,
        block_number: None,
        gas_used: None,
        solver_nonce: None,
    };

    if config.dry_run {
        info!(
            intent_hash = %record.intent_hash,
            moat_receipt_id = %record.moat_receipt_id,
            capability_id = %capability_id,
            "chain receipt (dry-run, not submitted)"
        );
        record.chain = ChainState::DryRun;
        return Some(record);
    }

    let Some(rpc_url) = config.rpc_url.as_deref() else {
        warn!(
            moat_receipt_id = %record.moat_receipt_id,
            "no RPC URL configured, falling back to dry-run"
        );
        record.chain = ChainState::DryRunNoRpc;
        return Some(record);
    };

    let Some(signer_key) = config.signer_key.as_deref() else {
        warn!(
            moat_receipt_id = %record.moat_receipt_id,
            "no signing key available, falling back to dry-run"
        );
        record.chain = ChainState::DryRunNoKey;
        return Some(record);
    };

    match submit(rpc_url, signer_key, config, receipt_hashes).await {
        Ok(outcome) => {
            info!(
                tx_hash = %outcome.tx_hash,
                block = outcome.block_number,
                gas = outcome.gas_used,
                intent_hash = %record.intent_hash,
                moat_receipt_id = %record.moat_receipt_id,
                "chain receipt submitted on-chain"
            );
            record.chain = ChainState::Sepolia;
            record.tx_hash = Some(outcome.tx_hash);
            record.on_chain_receipt_id = outcome.receipt_id;
            record.block_number = Some(outcome.block_number);
            record.gas_used = Some(outcome.gas_used);
            record.solver_nonce = Some(outcome.solver_nonce);
            Some(record)
        }
        Err(err) => {
            warn!(
                error = %err,
                intent_hash = %record.intent_hash,
                moat_receipt_id = %record.moat_receipt_id,
                "failed to submit chain receipt (non-fatal)"
            );
            record.chain = ChainState::SepoliaFailed;
            record.error = Some(err.to_string());
            Some(record)
        }
    }
}

async fn submit(
    rpc_url: &str,
    signer_key: &str,
    config: &ChainConfig,
    receipt_hashes: ReceiptHashes,
) -> Result<SubmitOutcome, ChainError> {
    let signer: PrivateKeySigner = signer_key
        .parse()
        .map_err(|e| ChainError::Signer(format!("invalid signer key: {e}")))?;

    let solver = submit::solver_id(config.solver_address);
    let domain = submit::signing_domain(config.chain_id, config.receipt_hub);
    let signature = submit::sign_receipt(&signer, &receipt_hashes, solver, &domain).await?;

    // No volume declared for capability executions.
    submit::submit_receipt(
        rpc_url,
        config.chain_id,
        config.receipt_hub,
        signer,
        receipt_hashes,
        solver,
        signature,
        0,
    )
    .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_receipt() -> Value {
        json!({
            "receipt_id": "8d2f1f9e-0000-0000-0000-000000000001",
            "capability_id": "cap_search_v1",
            "tenant_id": "tenant_abc",
            "status": "success",
            "result": {"answer": 42},
            "adapter": "stub",
            "scope": "execute",
            "input_hash": "a".repeat(64),
            "executed_at": "2023-11-14T22:13:20Z",
        })
    }

    #[tokio::test]
    async fn non_success_receipts_are_skipped() {
        let mut receipt = success_receipt();
        receipt["status"] = json!("failure");
        let config = ChainConfig::default();
        assert!(post_chain_receipt(&receipt, &config).await.is_none());
    }

    #[tokio::test]
    async fn dry_run_short_circuits_before_any_io() {
        let config = ChainConfig {
            dry_run: true,
            rpc_url: Some("https://rpc.example".into()),
            signer_key: Some("0x01".into()),
            ..ChainConfig::default()
        };
        let record = post_chain_receipt(&success_receipt(), &config).await.unwrap();
        assert_eq!(record.chain, ChainState::DryRun);
        assert!(record.tx_hash.is_none());
        assert_eq!(record.intent_hash_scheme, INTENT_HASH_SCHEME);
    }

    #[tokio::test]
    async fn missing_rpc_degrades_to_dry_run_no_rpc() {
        let config = ChainConfig {
            dry_run: false,
            rpc_url: None,
            signer_key: Some("0x01".into()),
            ..ChainConfig::default()
        };
        let record = post_chain_receipt(&success_receipt(), &config).await.unwrap();
        assert_eq!(record.chain, ChainState::DryRunNoRpc);
    }

    #[tokio::test]
    async fn missing_key_degrades_to_dry_run_no_key() {
        let config = ChainConfig {
            dry_run: false,
            rpc_url: Some("https://rpc.example".into()),
            signer_key: None,
            ..ChainConfig::default()
        };
        let record = post_chain_receipt(&success_receipt(), &config).await.unwrap();
        assert_eq!(record.chain, ChainState::DryRunNoKey);
    }

    #[tokio::test]
    async fn invalid_key_reports_sepolia_failed_not_a_panic() {
        let config = ChainConfig {
            dry_run: false,
            rpc_url: Some("https://rpc.example".into()),
            signer_key: Some("not-a-key".into()),
            ..ChainConfig::default()
        };
        let record = post_chain_receipt(&success_receipt(), &config).await.unwrap();
        assert_eq!(record.chain, ChainState::SepoliaFailed);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn hashes_are_zero_x_prefixed_bytes32() {
        let record =
            post_chain_receipt(&success_receipt(), &ChainConfig::default()).await.unwrap();
        for hex in [
            &record.intent_hash,
            &record.outcome_hash,
            &record.constraints_hash,
            &record.route_hash,
            &record.evidence_hash,
        ] {
            assert!(hex.starts_with("0x"), "{hex}");
            assert_eq!(hex.len(), 66, "{hex}");
        }
    }

    #[tokio::test]
    async fn intent_hash_is_stable_for_the_same_receipt() {
        let config = ChainConfig::default();
        let a = post_chain_receipt(&success_receipt(), &config).await.unwrap();
        let b = post_chain_receipt(&success_receipt(), &config).await.unwrap();
        assert_eq!(a.intent_hash, b.intent_hash);
        assert_eq!(a.evidence_hash, b.evidence_hash);
    }

    #[tokio::test]
    async fn inbound_correlated_receipts_use_the_onchain_domain() {
        let config = ChainConfig::default();
        let offchain = post_chain_receipt(&success_receipt(), &config).await.unwrap();

        let mut inbound = success_receipt();
        inbound["intent_correlation"] = json!({"chain_id": 11155111});
        let onchain = post_chain_receipt(&inbound, &config).await.unwrap();
        assert_ne!(offchain.intent_hash, onchain.intent_hash);
    }

    #[test]
    fn chain_state_serializes_to_the_wire_tokens() {
        assert_eq!(serde_json::to_string(&ChainState::DryRun).unwrap(), r#""dry_run""#);
        assert_eq!(
            serde_json::to_string(&ChainState::DryRunNoRpc).unwrap(),
            r#""dry_run_no_rpc""#
        );
        assert_eq!(
            serde_json::to_string(&ChainState::DryRunNoKey).unwrap(),
            r#""dry_run_no_key""#
        );
        assert_eq!(
            serde_json::to_string(&ChainState::SepoliaFailed).unwrap(),
            r#""sepolia_failed""#
        );
        assert_eq!(serde_json::to_string(&ChainState::Sepolia).unwrap(), r#""sepolia""#);
    }
}
