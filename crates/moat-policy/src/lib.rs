// SPDX-License-Identifier: MIT OR Apache-2.0
//! Policy evaluation engine for Moat.
//!
//! [`evaluate_policy`] is the single evaluation entry point. It receives a
//! [`PolicyBundle`] (tenant-scoped rules) and a [`CapabilityManifest`]
//! (what is being requested), plus runtime state (requested scope and
//! current spend), and returns an immutable [`PolicyDecision`].
//!
//! # Evaluation order
//!
//! Rules are checked in priority order and the first failure
//! short-circuits:
//!
//! 1. `scope_not_allowed` — the requested scope is absent from the bundle.
//! 2. `budget_daily_exceeded` — current spend meets or exceeds the ceiling.
//! 3. `domain_allowlist_conflict` — the bundle restricts domains and the
//!    capability's own allowlist is not a subset.
//! 4. `require_approval` — the bundle requires human approval (always deny
//!    at evaluation time; the approval flow is handled upstream).
//! 5. `all_checks_passed` — every rule passed; the request is allowed.
//!
//! # Default-deny
//!
//! If no bundle is configured (the caller passes `None`), the engine
//! returns a denied decision with `rule_hit = "no_policy_bundle"`, so new
//! capabilities start inaccessible until explicitly unlocked.

#![deny(unsafe_code)]

use chrono::Utc;
use moat_core::{CapabilityManifest, PolicyBundle, PolicyDecision, new_uuid};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;
use tracing::debug;

/// Rule-hit token returned when evaluation succeeds.
pub const RULE_ALL_CHECKS_PASSED: &str = "all_checks_passed";

/// Rule-hit token returned under default-deny (no bundle configured).
pub const RULE_NO_POLICY_BUNDLE: &str = "no_policy_bundle";

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate whether a request is permitted under the given policy bundle.
///
/// Always returns a [`PolicyDecision`]; the engine never fails. A
/// `request_id` is synthesized when the caller supplies an empty one.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use moat_core::{CapabilityManifest, CapabilityStatus, PolicyBundle, RiskClass};
/// use moat_policy::evaluate_policy;
///
/// let now = Utc::now();
/// let bundle = PolicyBundle {
///     id: "b1".into(),
///     tenant_id: "t1".into(),
///     capability_id: "cap_v1".into(),
///     allowed_scopes: ["search:read".to_string()].into(),
///     budget_daily: Some(500),
///     budget_monthly: None,
///     domain_allowlist: Default::default(),
///     require_approval: false,
///     created_at: now,
/// };
/// let manifest = CapabilityManifest {
///     id: "cap_v1".into(),
///     name: "Search".into(),
///     version: "1.0.0".into(),
///     provider: "acme".into(),
///     method: "POST /search".into(),
///     description: "Search".into(),
///     scopes: Default::default(),
///     input_schema: serde_json::Value::Null,
///     output_schema: serde_json::Value::Null,
///     risk_class: RiskClass::Low,
///     domain_allowlist: Default::default(),
///     status: CapabilityStatus::Published,
///     created_at: now,
///     updated_at: now,
/// };
/// let decision = evaluate_policy(Some(&bundle), &manifest, "search:read", 100, "");
/// assert!(decision.allowed);
/// ```
pub fn evaluate_policy(
    bundle: Option<&PolicyBundle>,
    capability: &CapabilityManifest,
    scope: &str,
    current_spend_cents: u64,
    request_id: &str,
) -> PolicyDecision {
    let request_id = if request_id.is_empty() {
        new_uuid()
    } else {
        request_id.to_string()
    };
    let started = Instant::now();

    // Default-deny: no bundle configured.
    let Some(bundle) = bundle else {
        return decision(
            "__none__",
            "__unknown__",
            &capability.id,
            false,
            RULE_NO_POLICY_BUNDLE.to_string(),
            started,
            request_id,
        );
    };

    // Rule 1: scope must be in allowed_scopes.
    if !bundle.allowed_scopes.contains(scope) {
        return decision(
            &bundle.id,
            &bundle.tenant_id,
            &capability.id,
            false,
            format!("scope_not_allowed:{scope}"),
            started,
            request_id,
        );
    }

    // Rule 2: daily budget ceiling.
    if let Some(limit) = bundle.budget_daily {
        if current_spend_cents >= limit {
            return decision(
                &bundle.id,
                &bundle.tenant_id,
                &capability.id,
                false,
                format!("budget_daily_exceeded:spend={current_spend_cents},limit={limit}"),
                started,
                request_id,
            );
        }
    }

    // Rule 3: domain allowlist. An empty bundle allowlist means "no domain
    // restriction"; otherwise every capability domain must appear verbatim
    // in the bundle's allowlist. Exact comparison; glob expansion is out of
    // scope for the core engine.
    if !bundle.domain_allowlist.is_empty() {
        let disallowed: Vec<&String> = capability
            .domain_allowlist
            .difference(&bundle.domain_allowlist)
            .collect();
        if !disallowed.is_empty() {
            return decision(
                &bundle.id,
                &bundle.tenant_id,
                &capability.id,
                false,
                format!("domain_allowlist_conflict:disallowed={disallowed:?}"),
                started,
                request_id,
            );
        }
    }

    // Rule 4: require_approval blocks automated execution.
    if bundle.require_approval {
        return decision(
            &bundle.id,
            &bundle.tenant_id,
            &capability.id,
            false,
            "require_approval".to_string(),
            started,
            request_id,
        );
    }

    decision(
        &bundle.id,
        &bundle.tenant_id,
        &capability.id,
        true,
        RULE_ALL_CHECKS_PASSED.to_string(),
        started,
        request_id,
    )
}

fn decision(
    bundle_id: &str,
    tenant_id: &str,
    capability_id: &str,
    allowed: bool,
    rule_hit: String,
    started: Instant,
    request_id: String,
) -> PolicyDecision {
    PolicyDecision {
        id: new_uuid(),
        policy_bundle_id: bundle_id.to_string(),
        tenant_id: tenant_id.to_string(),
        capability_id: capability_id.to_string(),
        allowed,
        rule_hit,
        evaluation_ms: started.elapsed().as_secs_f64() * 1_000.0,
        timestamp: Utc::now(),
        request_id,
    }
}

// ---------------------------------------------------------------------------
// PolicyEngine
// ---------------------------------------------------------------------------

/// Tenant-scoped bundle registry plus daily spend accounting.
///
/// This is the stateful wrapper the gateway holds: bundles are keyed by
/// `(tenant_id, capability_id)`, and spend counters are keyed by tenant
/// and UTC day so they reset at midnight without a sweeper.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    bundles: RwLock<HashMap<(String, String), PolicyBundle>>,
    spend: RwLock<HashMap<(String, String), u64>>,
}

impl PolicyEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the bundle for `(bundle.tenant_id, bundle.capability_id)`.
    pub fn upsert_bundle(&self, bundle: PolicyBundle) {
        let key = (bundle.tenant_id.clone(), bundle.capability_id.clone());
        self.bundles
            .write()
            .expect("bundle map lock poisoned")
            .insert(key, bundle);
    }

    /// Fetch the bundle configured for a tenant/capability pair.
    pub fn bundle(&self, tenant_id: &str, capability_id: &str) -> Option<PolicyBundle> {
        self.bundles
            .read()
            .expect("bundle map lock poisoned")
            .get(&(tenant_id.to_string(), capability_id.to_string()))
            .cloned()
    }

    /// Evaluate the configured bundle for this tenant against `capability`.
    pub fn evaluate(
        &self,
        tenant_id: &str,
        capability: &CapabilityManifest,
        scope: &str,
        request_id: &str,
    ) -> PolicyDecision {
        let bundle = self.bundle(tenant_id, &capability.id);
        let spend = self.current_spend(tenant_id);
        let result = evaluate_policy(bundle.as_ref(), capability, scope, spend, request_id);
        debug!(
            tenant_id,
            capability_id = %capability.id,
            allowed = result.allowed,
            rule_hit = %result.rule_hit,
            "policy evaluated"
        );
        result
    }

    /// Accumulated spend for `tenant_id` in the current UTC day, in cents.
    pub fn current_spend(&self, tenant_id: &str) -> u64 {
        self.spend
            .read()
            .expect("spend map lock poisoned")
            .get(&(tenant_id.to_string(), today()))
            .copied()
            .unwrap_or(0)
    }

    /// Add `cents` to the tenant's counter for the current UTC day.
    pub fn record_spend(&self, tenant_id: &str, cents: u64) {
        let mut spend = self.spend.write().expect("spend map lock poisoned");
        *spend.entry((tenant_id.to_string(), today())).or_insert(0) += cents;
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
