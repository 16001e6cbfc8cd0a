// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed-data signing and on-chain submission of intent receipts.

use crate::ChainError;
use alloy_network::EthereumWallet;
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::ProviderBuilder;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use std::time::Duration;
use tracing::{info, warn};

const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

sol! {
    /// Typed-data payload signed by the solver. The contract recomputes
    /// this digest and recovers the signer before accepting the receipt.
    struct IntentReceipt {
        bytes32 intentHash;
        bytes32 constraintsHash;
        bytes32 routeHash;
        bytes32 outcomeHash;
        bytes32 evidenceHash;
        uint64 createdAt;
        uint64 expiry;
        bytes32 solverId;
    }
}

sol! {
    #[sol(rpc)]
    contract IntentReceiptHub {
        struct ReceiptAttestation {
            bytes32 intentHash;
            bytes32 constraintsHash;
            bytes32 routeHash;
            bytes32 outcomeHash;
            bytes32 evidenceHash;
            uint64 createdAt;
            uint64 expiry;
            bytes32 solverId;
            bytes solverSig;
        }

        function postReceipt(ReceiptAttestation receipt, uint256 declaredVolume)
            external
            returns (bytes32 receiptId);

        function solverNonces(bytes32 solverId) external view returns (uint256);

        event ReceiptPosted(
            bytes32 indexed receiptId,
            bytes32 indexed intentHash,
            bytes32 indexed solverId,
            uint64 expiry
        );
    }
}

/// The five linked hashes plus timing fields of one chain receipt.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptHashes {
    /// Canonical intent envelope hash.
    pub intent: B256,
    /// Policy constraints hash.
    pub constraints: B256,
    /// Execution route hash.
    pub route: B256,
    /// Execution result hash.
    pub outcome: B256,
    /// Full-receipt evidence hash.
    pub evidence: B256,
    /// Unix seconds the receipt was created.
    pub created_at: u64,
    /// Unix seconds the settlement window closes.
    pub expiry: u64,
}

/// Outcome of a confirmed on-chain submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Transaction hash (0x-prefixed).
    pub tx_hash: String,
    /// On-chain receipt id parsed from the `ReceiptPosted` event.
    pub receipt_id: Option<String>,
    /// Block the transaction landed in.
    pub block_number: u64,
    /// Gas consumed.
    pub gas_used: u64,
    /// Solver nonce observed before submission.
    pub solver_nonce: u64,
    /// Whether the transaction status was success.
    pub confirmed: bool,
}

/// EIP-712 domain for the intent-receipt signature.
pub fn signing_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    eip712_domain! {
        name: "MoatIntentReceipt",
        version: "1",
        chain_id: chain_id,
        verifying_contract: verifying_contract,
    }
}

/// Left-pad an address into the bytes32 solver identity.
pub fn solver_id(address: Address) -> B256 {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address.as_slice());
    B256::from(out)
}

/// The EIP-712 signing hash the solver commits to.
pub fn receipt_signing_hash(hashes: &ReceiptHashes, solver: B256, domain: &Eip712Domain) -> B256 {
    let payload = IntentReceipt {
        intentHash: hashes.intent,
        constraintsHash: hashes.constraints,
        routeHash: hashes.route,
        outcomeHash: hashes.outcome,
        evidenceHash: hashes.evidence,
        createdAt: hashes.created_at,
        expiry: hashes.expiry,
        solverId: solver,
    };
    payload.eip712_signing_hash(domain)
}

/// Sign the receipt payload, returning the 65-byte `(r, s, v)` signature
/// with `v` in `{27, 28}`.
pub async fn sign_receipt(
    signer: &PrivateKeySigner,
    hashes: &ReceiptHashes,
    solver: B256,
    domain: &Eip712Domain,
) -> Result<[u8; 65], ChainError> {
    let digest = receipt_signing_hash(hashes, solver, domain);
    let signature = signer
        .sign_hash(&digest)
        .await
        .map_err(|e| ChainError::Signer(e.to_string()))?;
    Ok(signature.as_bytes())
}

/// Submit a signed receipt to the `IntentReceiptHub`.
///
/// Reads the current solver nonce, broadcasts `postReceipt` with the
/// node-suggested gas price and the sender's transaction count (both
/// supplied by the provider's fill stack), then waits up to 60 s for
/// inclusion and parses the `ReceiptPosted` event.
#[allow(clippy::too_many_arguments)]
pub async fn submit_receipt(
    rpc_url: &str,
    chain_id: u64,
    hub_address: Address,
    signer: PrivateKeySigner,
    hashes: ReceiptHashes,
    solver: B256,
    signature: [u8; 65],
    declared_volume: u64,
) -> Result<SubmitOutcome, ChainError> {
    let url = rpc_url
        .parse()
        .map_err(|e| ChainError::Config(format!("invalid rpc url: {e}")))?;
    let signer = signer.with_chain_id(Some(chain_id));
    let wallet = EthereumWallet::from(signer);
    let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);
    let hub = IntentReceiptHub::new(hub_address, provider);

    let solver_nonce = hub
        .solverNonces(solver)
        .call()
        .await
        .map_err(|e| ChainError::Rpc(format!("solverNonces read failed: {e}")))?;
    let solver_nonce = u64::try_from(solver_nonce).unwrap_or(u64::MAX);

    let attestation = IntentReceiptHub::ReceiptAttestation {
        intentHash: hashes.intent,
        constraintsHash: hashes.constraints,
        routeHash: hashes.route,
        outcomeHash: hashes.outcome,
        evidenceHash: hashes.evidence,
        createdAt: hashes.created_at,
        expiry: hashes.expiry,
        solverId: solver,
        solverSig: Bytes::copy_from_slice(&signature),
    };

    let pending = hub
        .postReceipt(attestation, U256::from(declared_volume))
        .send()
        .await
        .map_err(|e| ChainError::Rpc(format!("postReceipt broadcast failed: {e}")))?;

    info!(
        tx_hash = %pending.tx_hash(),
        solver_nonce,
        intent_hash = %hashes.intent,
        "chain receipt tx broadcast"
    );

    let receipt = pending
        .with_timeout(Some(CONFIRMATION_TIMEOUT))
        .get_receipt()
        .await
        .map_err(|e| ChainError::Rpc(format!("confirmation wait failed: {e}")))?;

    let mut receipt_id = None;
    for log in receipt.inner.logs() {
        if let Ok(decoded) = log.log_decode::<IntentReceiptHub::ReceiptPosted>() {
            receipt_id = Some(format!("{}", decoded.inner.data.receiptId));
            break;
        }
    }
    if receipt_id.is_none() {
        warn!(tx_hash = %receipt.transaction_hash, "no ReceiptPosted event in confirmed tx");
    }

    Ok(SubmitOutcome {
        tx_hash: format!("{}", receipt.transaction_hash),
        receipt_id,
        block_number: receipt.block_number.unwrap_or(0),
        gas_used: receipt.gas_used,
        solver_nonce,
        confirmed: receipt.status(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn hashes() -> ReceiptHashes {
        ReceiptHashes {
            intent: B256::repeat_byte(0x11),
            constraints: B256::repeat_byte(0x22),
            route: B256::repeat_byte(0x33),
            outcome: B256::repeat_byte(0x44),
            evidence: B256::repeat_byte(0x55),
            created_at: 1_700_000_000,
            expiry: 1_700_086_400,
        }
    }

    fn test_signer() -> PrivateKeySigner {
        // Deterministic throwaway key for signature-shape tests only.
        "0x0000000000000000000000000000000000000000000000000000000000000001"
            .parse()
            .expect("valid test key")
    }

    #[test]
    fn solver_id_left_pads_the_address() {
        let addr = address!("0x83Be08FFB22b61733eDf15b0ee9Caf5562cd888d");
        let id = solver_id(addr);
        assert_eq!(&id[..12], &[0u8; 12]);
        assert_eq!(&id[12..], addr.as_slice());
    }

    #[test]
    fn signing_hash_is_domain_separated() {
        let hub = address!("0xD66A1e880AA3939CA066a9EA1dD37ad3d01D977c");
        let solver = solver_id(address!("0x83Be08FFB22b61733eDf15b0ee9Caf5562cd888d"));

        let sepolia = signing_domain(11_155_111, hub);
        let mainnet = signing_domain(1, hub);
        assert_ne!(
            receipt_signing_hash(&hashes(), solver, &sepolia),
            receipt_signing_hash(&hashes(), solver, &mainnet)
        );
    }

    #[tokio::test]
    async fn signature_recovers_to_the_solver_address() {
        let signer = test_signer();
        let hub = address!("0xD66A1e880AA3939CA066a9EA1dD37ad3d01D977c");
        let domain = signing_domain(11_155_111, hub);
        let solver = solver_id(signer.address());
        let hashes = hashes();

        let raw = sign_receipt(&signer, &hashes, solver, &domain).await.unwrap();
        assert_eq!(raw.len(), 65);
        assert!(raw[64] == 27 || raw[64] == 28);

        let digest = receipt_signing_hash(&hashes, solver, &domain);
        let signature = alloy_primitives::Signature::from_raw(&raw).unwrap();
        let recovered = signature.recover_address_from_prehash(&digest).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[tokio::test]
    async fn signature_changes_with_the_payload() {
        let signer = test_signer();
        let hub = address!("0xD66A1e880AA3939CA066a9EA1dD37ad3d01D977c");
        let domain = signing_domain(11_155_111, hub);
        let solver = solver_id(signer.address());

        let first = sign_receipt(&signer, &hashes(), solver, &domain).await.unwrap();
        let mut tampered = hashes();
        tampered.outcome = B256::repeat_byte(0x99);
        let second = sign_receipt(&signer, &tampered, solver, &domain).await.unwrap();
        assert_ne!(first, second);
    }
}
