// SPDX-License-Identifier: MIT OR Apache-2.0
//! The capability execution pipeline.
//!
//! Steps, in order: tenant consistency, capability fetch, lifecycle
//! check, policy evaluation, idempotency lookup, credential resolution,
//! adapter dispatch, receipt build, background emission (outcome event +
//! chain receipt), idempotency persistence, spend recording.
//!
//! Failure modes: policy/lifecycle problems abort before dispatch with a
//! typed error; adapter failures still produce a (failure) receipt so the
//! audit chain is unbroken; background failures never surface.

use crate::AppState;
use chrono::Utc;
use moat_core::{ExecutionStatus, OutcomeEvent, new_uuid};
use moat_error::{ErrorCode, MoatError};
use moat_idempotency::DEFAULT_TTL_SECONDS;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{error, info, warn};

/// Payload for a capability execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Input parameters for the capability.
    #[serde(default = "default_params")]
    pub params: Value,
    /// Tenant making the request; must match the authenticated tenant.
    pub tenant_id: String,
    /// Permission scope (e.g. `execute`, `read`, `admin`).
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Optional idempotency key. When a prior request with the same
    /// tenant and key succeeded, the cached receipt is returned without
    /// re-executing the capability.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn default_scope() -> String {
    "execute".to_string()
}

fn default_params() -> Value {
    Value::Object(Default::default())
}

/// Receipt returned after a capability execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptResponse {
    /// Unique receipt id.
    pub receipt_id: String,
    /// Capability that was executed.
    pub capability_id: String,
    /// Tenant the execution ran under.
    pub tenant_id: String,
    /// Terminal execution status.
    pub status: ExecutionStatus,
    /// Raw adapter result (pass-through JSON).
    pub result: Value,
    /// Idempotency key used, if any.
    pub idempotency_key: Option<String>,
    /// RFC 3339 timestamp when execution started.
    pub executed_at: String,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: f64,
    /// True when this receipt came from the idempotency cache.
    #[serde(default)]
    pub cached: bool,
    /// Risk class of the capability at evaluation time.
    pub policy_risk_class: String,
    /// SHA-256 of the redacted input params.
    pub input_hash: String,
    /// SHA-256 of the redacted result.
    pub output_hash: String,
    /// Generic error token on non-success receipts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Run the full execution pipeline for one request.
pub async fn run_pipeline(
    state: &AppState,
    capability_id: &str,
    request: ExecuteRequest,
    auth_tenant: &str,
    request_id: &str,
) -> Result<ReceiptResponse, MoatError> {
    // Step 0: tenant in the body must match the authenticated tenant.
    if request.tenant_id != auth_tenant {
        warn!(
            body_tenant_id = %request.tenant_id,
            auth_tenant_id = %auth_tenant,
            capability_id,
            request_id,
            "tenant id mismatch"
        );
        return Err(MoatError::new(
            ErrorCode::TenantMismatch,
            "tenant_id in request body does not match authenticated tenant",
        ));
    }

    // Step 1: fetch capability metadata (cached locally for 5 minutes).
    let Some(capability) = state.cache.get(capability_id).await else {
        warn!(capability_id, request_id, "capability not found");
        return Err(MoatError::new(
            ErrorCode::CapabilityNotFound,
            format!("capability '{capability_id}' not found"),
        )
        .with_context("capability_id", capability_id));
    };

    // Step 2: lifecycle check.
    if !capability.is_executable() {
        return Err(MoatError::new(
            ErrorCode::CapabilityInactive,
            format!(
                "capability '{capability_id}' is not active (status: {})",
                capability.status
            ),
        )
        .with_context("capability_id", capability_id)
        .with_context("status", &capability.status));
    }

    // Step 3: policy evaluation.
    let manifest = capability.to_manifest();
    let decision = state
        .policy
        .evaluate(&request.tenant_id, &manifest, &request.scope, request_id);
    if !decision.allowed {
        warn!(
            capability_id,
            tenant_id = %request.tenant_id,
            rule_hit = %decision.rule_hit,
            request_id,
            "policy denied execution"
        );
        let code = if decision.rule_hit.starts_with("budget_daily_exceeded") {
            ErrorCode::BudgetExceeded
        } else {
            ErrorCode::PolicyDenied
        };
        return Err(MoatError::new(code, "policy denied the execution")
            .with_context("rule_hit", &decision.rule_hit)
            .with_context("capability_id", capability_id)
            .with_context("tenant_id", &request.tenant_id)
            .with_context("risk_class", capability.risk_class().as_str()));
    }

    // Step 4: idempotency lookup. A hit returns the original receipt and
    // skips the adapter entirely.
    if let Some(key) = request.idempotency_key.as_deref() {
        if let Some(mut cached) = state.idempotency.get(&request.tenant_id, key).await {
            info!(
                capability_id,
                tenant_id = %request.tenant_id,
                idempotency_key = key,
                receipt_id = %cached.receipt_id,
                request_id,
                "idempotency cache hit, returning cached receipt"
            );
            cached.cached = true;
            return Ok(cached);
        }
    }

    // Step 5: credential resolution by opaque reference. The plaintext
    // value flows only into the adapter call below.
    let credential = match state
        .connections
        .credential_ref(&request.tenant_id, &capability.provider)
    {
        Some(reference) => state.vault.resolve(&reference).await,
        None => None,
    };

    // Step 6: adapter dispatch.
    let adapter = state.registry.get_or_stub(&capability.provider);
    let started_at = Utc::now();
    let started = Instant::now();
    let dispatch = adapter
        .execute(
            capability_id,
            &capability.name,
            &request.params,
            credential.as_deref(),
        )
        .await;
    let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

    let (result, status, error_code, taxonomy) = match dispatch {
        Ok(result) => (result, ExecutionStatus::Success, None, None),
        Err(err) => {
            error!(
                capability_id,
                provider = %capability.provider,
                error = %err,
                request_id,
                "adapter execution failed"
            );
            let status = match err.taxonomy() {
                moat_core::ErrorTaxonomy::Timeout => ExecutionStatus::Timeout,
                _ => ExecutionStatus::Failure,
            };
            // The internal error text stays in the logs; the caller gets
            // a generic token plus the provider tag.
            (
                json!({"error": "adapter_execution_failed", "provider": capability.provider}),
                status,
                Some("adapter_execution_failed".to_string()),
                Some(err.taxonomy()),
            )
        }
    };

    // Step 7: build the receipt. Inputs and outputs are stored only as
    // hashes of their redacted forms.
    let no_extra = BTreeSet::new();
    let input_hash = moat_redact::hash_redacted(&request.params, &no_extra);
    let output_hash = moat_redact::hash_redacted(&result, &no_extra);
    let receipt = ReceiptResponse {
        receipt_id: new_uuid(),
        capability_id: capability_id.to_string(),
        tenant_id: request.tenant_id.clone(),
        status,
        result,
        idempotency_key: request.idempotency_key.clone(),
        executed_at: started_at.to_rfc3339(),
        latency_ms: (latency_ms * 100.0).round() / 100.0,
        cached: false,
        policy_risk_class: capability.risk_class().as_str().to_string(),
        input_hash,
        output_hash,
        error_code,
    };

    // Step 8: schedule background work; the caller never waits on it.
    let event = match OutcomeEvent::new(
        receipt.receipt_id.clone(),
        receipt.capability_id.clone(),
        receipt.tenant_id.clone(),
        status.is_success(),
        receipt.latency_ms,
        taxonomy,
    ) {
        Ok(event) => Some(event),
        Err(err) => {
            error!(error = %err, request_id, "outcome event construction failed");
            None
        }
    };
    if let Some(event) = event {
        state.enqueue_background(crate::worker::BackgroundJob::EmitOutcome {
            event,
            execution_status: status.as_str().to_string(),
        });
    }
    let mut chain_receipt = serde_json::to_value(&receipt)
        .expect("receipt serialisation is infallible");
    chain_receipt["adapter"] = json!(capability.provider);
    chain_receipt["scope"] = json!(request.scope);
    state.enqueue_background(crate::worker::BackgroundJob::PostChainReceipt(chain_receipt));

    // Step 9: persist idempotency, successful executions only.
    if let (Some(key), true) = (request.idempotency_key.as_deref(), status.is_success()) {
        state
            .idempotency
            .set(&request.tenant_id, key, receipt.clone(), DEFAULT_TTL_SECONDS)
            .await;
    }

    // Step 10: record spend for budget enforcement (1 cent per successful
    // call in the reference design).
    if status.is_success() {
        state.policy.record_spend(&request.tenant_id, 1);
    }

    info!(
        capability_id,
        tenant_id = %receipt.tenant_id,
        provider = %capability.provider,
        status = %status,
        latency_ms = receipt.latency_ms,
        request_id,
        "capability executed"
    );

    Ok(receipt)
}
