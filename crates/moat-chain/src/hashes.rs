// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hash construction for chain receipts.
//!
//! Five keccak-256 hashes anchor a gateway receipt to the chain: the
//! canonical intent envelope (an EIP-712 typed-struct hash), plus sorted-
//! JSON digests of the outcome, constraints, route, and full-receipt
//! evidence.

use alloy_primitives::{Address, B256, U256, keccak256};
use alloy_sol_types::{SolStruct, sol};
use serde_json::{Value, json};

sol! {
    /// Canonical intent envelope. The typed-struct hash of this record is
    /// the `intentHash` shared between the off-chain receipt and the
    /// on-chain attestation.
    struct CanonicalIntentEnvelope {
        uint8 version;
        bytes32 tenantId;
        address agentAddress;
        uint256 agentId;
        uint8 domain;
        bytes32 actionHash;
        bytes32 constraintsHash;
        uint256 nonce;
        uint64 timestamp;
        uint64 expiry;
        bytes32 extensionHash;
    }
}

/// Envelope domain discriminator: execution happened off-chain.
pub const DOMAIN_OFFCHAIN: u8 = 0;
/// Envelope domain discriminator: execution originated on-chain.
pub const DOMAIN_ONCHAIN: u8 = 1;

const EXPIRY_WINDOW_SECONDS: u64 = 86_400;

/// Inputs for the canonical intent envelope, filled deterministically from
/// a gateway receipt.
#[derive(Debug, Clone)]
pub struct IntentEnvelopeInputs {
    /// Tenant the execution ran under.
    pub tenant_id: String,
    /// Capability that was executed.
    pub capability_id: String,
    /// `input_hash` from the gateway receipt (64 hex chars).
    pub input_hash: String,
    /// Operator address submitting on behalf of the tenant.
    pub agent_address: Address,
    /// Configured numeric agent identity.
    pub agent_id: u64,
    /// [`DOMAIN_OFFCHAIN`] or [`DOMAIN_ONCHAIN`].
    pub domain: u8,
    /// Monotone envelope nonce; 0 when unsupplied.
    pub nonce: u64,
    /// Unix seconds of the execution.
    pub timestamp: u64,
}

/// Compute the canonical intent hash: the EIP-712 typed-struct hash of
/// [`CanonicalIntentEnvelope`] under its fixed type definition.
pub fn intent_hash(inputs: &IntentEnvelopeInputs) -> B256 {
    let expiry = if inputs.timestamp == 0 {
        EXPIRY_WINDOW_SECONDS
    } else {
        inputs.timestamp + EXPIRY_WINDOW_SECONDS
    };
    let envelope = CanonicalIntentEnvelope {
        version: 1,
        tenantId: keccak256(inputs.tenant_id.as_bytes()),
        agentAddress: inputs.agent_address,
        agentId: U256::from(inputs.agent_id),
        domain: inputs.domain,
        actionHash: keccak256(format!("{}:{}", inputs.capability_id, inputs.input_hash)),
        constraintsHash: keccak256(format!(
            "moat:policy:{}:{}",
            inputs.tenant_id, inputs.capability_id
        )),
        nonce: U256::from(inputs.nonce),
        timestamp: inputs.timestamp,
        expiry,
        extensionHash: B256::ZERO,
    };
    envelope.eip712_hash_struct()
}

fn keccak_sorted_json(value: &Value) -> B256 {
    keccak256(moat_redact::canonical_json(value))
}

/// keccak-256 of the execution result, sorted-key encoded.
pub fn outcome_hash(receipt: &Value) -> B256 {
    let result = receipt.get("result").cloned().unwrap_or_else(|| json!({}));
    keccak_sorted_json(&result)
}

/// keccak-256 of the policy constraints that governed this execution.
pub fn constraints_hash(receipt: &Value) -> B256 {
    let constraints = json!({
        "capability_id": receipt.get("capability_id").and_then(Value::as_str).unwrap_or(""),
        "scope": receipt.get("scope").and_then(Value::as_str).unwrap_or("execute"),
        "tenant_id": receipt.get("tenant_id").and_then(Value::as_str).unwrap_or(""),
    });
    keccak_sorted_json(&constraints)
}

/// keccak-256 of the execution route (adapter + capability).
pub fn route_hash(receipt: &Value) -> B256 {
    let route = json!({
        "adapter": receipt.get("adapter").and_then(Value::as_str).unwrap_or("unknown"),
        "capability_id": receipt.get("capability_id").and_then(Value::as_str).unwrap_or(""),
    });
    keccak_sorted_json(&route)
}

/// keccak-256 of the entire gateway receipt, the evidence bundle for this
/// execution.
pub fn evidence_hash(receipt: &Value) -> B256 {
    keccak_sorted_json(receipt)
}

/// Parse an execution timestamp that may be ISO-8601 or an epoch string.
pub fn parse_timestamp(raw: &str) -> u64 {
    if let Ok(epoch) = raw.parse::<u64>() {
        return epoch;
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp().max(0) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn inputs() -> IntentEnvelopeInputs {
        IntentEnvelopeInputs {
            tenant_id: "tenant_abc".into(),
            capability_id: "cap_search_v1".into(),
            input_hash: "a".repeat(64),
            agent_address: address!("0x83Be08FFB22b61733eDf15b0ee9Caf5562cd888d"),
            agent_id: 1319,
            domain: DOMAIN_OFFCHAIN,
            nonce: 0,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn envelope_type_definition_is_pinned() {
        let root = CanonicalIntentEnvelope::eip712_root_type();
        assert!(root.starts_with("CanonicalIntentEnvelope(uint8 version,bytes32 tenantId"));
        assert!(root.contains("uint64 expiry,bytes32 extensionHash)"));
    }

    #[test]
    fn intent_hash_is_deterministic() {
        assert_eq!(intent_hash(&inputs()), intent_hash(&inputs()));
    }

    #[test]
    fn intent_hash_changes_with_every_identity_field() {
        let base = intent_hash(&inputs());

        let mut other = inputs();
        other.tenant_id = "tenant_other".into();
        assert_ne!(base, intent_hash(&other));

        let mut other = inputs();
        other.capability_id = "cap_other".into();
        assert_ne!(base, intent_hash(&other));

        let mut other = inputs();
        other.input_hash = "b".repeat(64);
        assert_ne!(base, intent_hash(&other));

        let mut other = inputs();
        other.domain = DOMAIN_ONCHAIN;
        assert_ne!(base, intent_hash(&other));

        let mut other = inputs();
        other.timestamp += 1;
        assert_ne!(base, intent_hash(&other));
    }

    #[test]
    fn json_hashes_are_key_order_independent() {
        let a: Value = serde_json::from_str(
            r#"{"capability_id":"cap_x","tenant_id":"t1","result":{"b":2,"a":1}}"#,
        )
        .unwrap();
        let b: Value = serde_json::from_str(
            r#"{"result":{"a":1,"b":2},"tenant_id":"t1","capability_id":"cap_x"}"#,
        )
        .unwrap();
        assert_eq!(outcome_hash(&a), outcome_hash(&b));
        assert_eq!(evidence_hash(&a), evidence_hash(&b));
    }

    #[test]
    fn route_hash_defaults_adapter_to_unknown() {
        let with_adapter: Value =
            serde_json::from_str(r#"{"capability_id":"cap_x","adapter":"http_proxy"}"#).unwrap();
        let without: Value = serde_json::from_str(r#"{"capability_id":"cap_x"}"#).unwrap();
        assert_ne!(route_hash(&with_adapter), route_hash(&without));
        assert_eq!(
            route_hash(&without),
            keccak256(r#"{"adapter":"unknown","capability_id":"cap_x"}"#)
        );
    }

    #[test]
    fn timestamp_parsing_accepts_both_forms() {
        assert_eq!(parse_timestamp("1700000000"), 1_700_000_000);
        assert_eq!(parse_timestamp("2023-11-14T22:13:20Z"), 1_700_000_000);
        assert_eq!(parse_timestamp("2023-11-14T22:13:20+00:00"), 1_700_000_000);
        assert_eq!(parse_timestamp("garbage"), 0);
    }
}
