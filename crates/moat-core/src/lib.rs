// SPDX-License-Identifier: MIT OR Apache-2.0
//! Domain models for the Moat execution plane.
//!
//! Every record that crosses a service boundary lives here: capability
//! manifests, policy bundles and decisions, execution receipts, outcome
//! events, and the Web3 correlation context. Models are plain serde
//! structs; invariants that the wire format cannot express are enforced
//! by [`validate`](CapabilityManifest::validate)-style methods and typed
//! constructors, returning [`ModelError`] instead of panicking.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Validation failures raised by model constructors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A version string did not match `MAJOR.MINOR.PATCH[-pre]`.
    #[error("version '{0}' is not valid semver (expected MAJOR.MINOR.PATCH[-pre])")]
    InvalidSemver(String),

    /// A hash field was not a 64-character lowercase hex SHA-256 digest.
    #[error("{field} must be a lowercase hex SHA-256 digest")]
    InvalidSha256Hex {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A required string field was empty.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// `updated_at` preceded `created_at`.
    #[error("updated_at must not be earlier than created_at")]
    UpdatedBeforeCreated,

    /// A latency or duration was negative.
    #[error("{0} must be non-negative")]
    NegativeDuration(&'static str),

    /// The success flag and error taxonomy disagreed.
    #[error("error_taxonomy must be set exactly when success is false")]
    TaxonomyMismatch,
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Ordered severity tiers for capability risk classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    /// Read-only, reversible operations.
    Low,
    /// Writes with bounded blast radius.
    Medium,
    /// Writes with external side-effects.
    High,
    /// Irreversible or fund-moving operations.
    Critical,
}

impl RiskClass {
    /// Stable lowercase string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a published capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    /// Not yet visible to tenants.
    Draft,
    /// Live and executable.
    Published,
    /// Executable but slated for removal.
    Deprecated,
    /// No longer executable.
    Archived,
}

impl CapabilityStatus {
    /// Whether the gateway may execute a capability in this state.
    pub fn is_executable(&self) -> bool {
        matches!(self, Self::Published)
    }
}

/// Terminal status of a single capability invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The adapter returned a result.
    Success,
    /// The adapter failed.
    Failure,
    /// The adapter exceeded its deadline.
    Timeout,
    /// Policy denied the request before dispatch.
    PolicyDenied,
}

impl ExecutionStatus {
    /// Stable lowercase string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::PolicyDenied => "policy_denied",
        }
    }

    /// `true` only for [`ExecutionStatus::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse-grained error categories for outcome reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTaxonomy {
    /// Credential rejected upstream.
    Auth,
    /// Upstream rate limit hit.
    RateLimit,
    /// Deadline exceeded.
    Timeout,
    /// Upstream 5xx.
    Provider5xx,
    /// Input failed validation.
    Validation,
    /// Policy denied the request.
    PolicyDenied,
    /// Anything else.
    Unknown,
}

impl ErrorTaxonomy {
    /// Stable lowercase string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Provider5xx => "provider_5xx",
            Self::Validation => "validation",
            Self::PolicyDenied => "policy_denied",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorTaxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Return a fresh UUID v4 string.
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn numeric_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_digit())
        && (s.len() == 1 || !s.starts_with('0'))
}

/// Check a version string against `MAJOR.MINOR.PATCH[-pre]`.
///
/// Pre-release segments are dot-separated ASCII alphanumerics and hyphens,
/// matching the semver grammar the registry enforces.
pub fn is_valid_semver(version: &str) -> bool {
    let (core, pre) = match version.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (version, None),
    };
    let mut parts = core.split('.');
    let valid_core = matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(major), Some(minor), Some(patch), None)
            if numeric_identifier(major) && numeric_identifier(minor) && numeric_identifier(patch)
    );
    if !valid_core {
        return false;
    }
    match pre {
        None => true,
        Some(pre) => {
            !pre.is_empty()
                && pre.split('.').all(|seg| {
                    !seg.is_empty()
                        && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                })
        }
    }
}

/// Check a string is a 64-character lowercase hex digest.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

// ---------------------------------------------------------------------------
// CapabilityManifest
// ---------------------------------------------------------------------------

/// Registry entry describing a verifiable agent capability.
///
/// Manifests are immutable once constructed; updates produce a new record
/// with a bumped `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityManifest {
    /// Stable unique capability identifier.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Semantic version string, e.g. `1.2.3` or `2.0.0-beta.1`.
    pub version: String,
    /// Identifier of the organisation publishing this capability.
    pub provider: String,
    /// HTTP method + path, e.g. `POST /v1/search`.
    pub method: String,
    /// Plain-English capability description.
    pub description: String,
    /// OAuth-style scopes required to invoke this capability.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// JSON Schema describing the expected request payload (opaque).
    #[serde(default)]
    pub input_schema: serde_json::Value,
    /// JSON Schema describing the response payload (opaque).
    #[serde(default)]
    pub output_schema: serde_json::Value,
    /// Risk classification tier.
    pub risk_class: RiskClass,
    /// Host patterns this capability is allowed to reach.
    #[serde(default)]
    pub domain_allowlist: BTreeSet<String>,
    /// Current lifecycle state.
    #[serde(default = "default_status")]
    pub status: CapabilityStatus,
    /// UTC timestamp when the manifest was first created.
    pub created_at: DateTime<Utc>,
    /// UTC timestamp of the most recent update.
    pub updated_at: DateTime<Utc>,
}

fn default_status() -> CapabilityStatus {
    CapabilityStatus::Draft
}

impl CapabilityManifest {
    /// Check construction invariants: non-empty identity fields, valid
    /// semver, and `updated_at >= created_at`.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.is_empty() {
            return Err(ModelError::EmptyField("id"));
        }
        if self.name.is_empty() {
            return Err(ModelError::EmptyField("name"));
        }
        if self.provider.is_empty() {
            return Err(ModelError::EmptyField("provider"));
        }
        if self.method.is_empty() {
            return Err(ModelError::EmptyField("method"));
        }
        if self.description.is_empty() {
            return Err(ModelError::EmptyField("description"));
        }
        if !is_valid_semver(&self.version) {
            return Err(ModelError::InvalidSemver(self.version.clone()));
        }
        if self.updated_at < self.created_at {
            return Err(ModelError::UpdatedBeforeCreated);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

/// Immutable audit record produced after each capability invocation.
///
/// Inputs and outputs are stored only as SHA-256 hashes of their redacted
/// representations; no raw payloads or secrets ever enter the receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Receipt {
    /// Unique receipt UUID.
    pub id: String,
    /// Capability that was executed.
    pub capability_id: String,
    /// Version of the capability at execution time.
    pub capability_version: String,
    /// Tenant under which the execution ran.
    pub tenant_id: String,
    /// UTC timestamp of the execution.
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied or generated idempotency key.
    pub idempotency_key: String,
    /// SHA-256 hex digest of the redacted input payload.
    pub input_hash: String,
    /// SHA-256 hex digest of the redacted output payload.
    pub output_hash: String,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: f64,
    /// Terminal execution status.
    pub status: ExecutionStatus,
    /// Short machine-readable error code, present on non-success outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Upstream provider's request identifier for correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_request_id: Option<String>,
}

impl Receipt {
    /// Check construction invariants: non-empty identity fields, hash
    /// shape, and non-negative latency.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.capability_id.is_empty() {
            return Err(ModelError::EmptyField("capability_id"));
        }
        if self.capability_version.is_empty() {
            return Err(ModelError::EmptyField("capability_version"));
        }
        if self.tenant_id.is_empty() {
            return Err(ModelError::EmptyField("tenant_id"));
        }
        if self.idempotency_key.is_empty() {
            return Err(ModelError::EmptyField("idempotency_key"));
        }
        if !is_sha256_hex(&self.input_hash) {
            return Err(ModelError::InvalidSha256Hex { field: "input_hash" });
        }
        if !is_sha256_hex(&self.output_hash) {
            return Err(ModelError::InvalidSha256Hex { field: "output_hash" });
        }
        if self.latency_ms < 0.0 {
            return Err(ModelError::NegativeDuration("latency_ms"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OutcomeEvent
// ---------------------------------------------------------------------------

/// Lightweight analytics event derived from a [`Receipt`].
///
/// Emitted to the trust plane after each invocation. The constructor
/// enforces the core invariant: `success` holds exactly when
/// `error_taxonomy` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutcomeEvent {
    /// Unique event UUID.
    pub id: String,
    /// Receipt this event was derived from.
    pub receipt_id: String,
    /// Capability that was executed.
    pub capability_id: String,
    /// Tenant that triggered the execution.
    pub tenant_id: String,
    /// Whether the execution succeeded.
    pub success: bool,
    /// End-to-end latency in milliseconds.
    pub latency_ms: f64,
    /// Coarse error category; `None` exactly when `success` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_taxonomy: Option<ErrorTaxonomy>,
    /// UTC timestamp when the execution occurred.
    pub occurred_at: DateTime<Utc>,
}

impl OutcomeEvent {
    /// Construct an event, enforcing the success/taxonomy invariant.
    pub fn new(
        receipt_id: impl Into<String>,
        capability_id: impl Into<String>,
        tenant_id: impl Into<String>,
        success: bool,
        latency_ms: f64,
        error_taxonomy: Option<ErrorTaxonomy>,
    ) -> Result<Self, ModelError> {
        if success == error_taxonomy.is_some() {
            return Err(ModelError::TaxonomyMismatch);
        }
        if latency_ms < 0.0 {
            return Err(ModelError::NegativeDuration("latency_ms"));
        }
        Ok(Self {
            id: new_uuid(),
            receipt_id: receipt_id.into(),
            capability_id: capability_id.into(),
            tenant_id: tenant_id.into(),
            success,
            latency_ms,
            error_taxonomy,
            occurred_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// PolicyBundle
// ---------------------------------------------------------------------------

/// Tenant-scoped policy controlling access and spend for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyBundle {
    /// Bundle identifier.
    pub id: String,
    /// Tenant this bundle applies to.
    pub tenant_id: String,
    /// Capability this bundle governs.
    pub capability_id: String,
    /// Scopes the tenant may request. Empty denies every scope.
    #[serde(default)]
    pub allowed_scopes: BTreeSet<String>,
    /// Daily spend ceiling in cents (USD). `None` = unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_daily: Option<u64>,
    /// Monthly spend ceiling in cents (USD). Reserved; never evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_monthly: Option<u64>,
    /// Hosts permitted under this bundle. Empty = no domain restriction.
    #[serde(default)]
    pub domain_allowlist: BTreeSet<String>,
    /// When true, every invocation requires explicit human approval.
    #[serde(default)]
    pub require_approval: bool,
    /// UTC timestamp when the bundle was created.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PolicyDecision
// ---------------------------------------------------------------------------

/// Immutable result of evaluating a [`PolicyBundle`] against a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyDecision {
    /// Decision identifier.
    pub id: String,
    /// Bundle that was evaluated, or `__none__` under default-deny.
    pub policy_bundle_id: String,
    /// Tenant the decision applies to.
    pub tenant_id: String,
    /// Capability the decision applies to.
    pub capability_id: String,
    /// Whether the request is permitted.
    pub allowed: bool,
    /// Token naming the rule that determined the outcome.
    pub rule_hit: String,
    /// Wall-clock evaluation time in milliseconds.
    pub evaluation_ms: f64,
    /// UTC timestamp of the evaluation.
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied or synthesized trace identifier.
    pub request_id: String,
}

// ---------------------------------------------------------------------------
// Web3ExecutionContext
// ---------------------------------------------------------------------------

/// Correlation metadata for receipts that touch Web3, in either direction:
/// inbound intents from the chain indexer or outbound chain receipts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Web3ExecutionContext {
    /// EIP-155 chain ID (e.g. 11155111 for Sepolia).
    pub chain_id: u64,
    /// Target contract address (0x-prefixed).
    #[serde(default)]
    pub contract_address: String,
    /// Transaction hash (0x-prefixed hex).
    #[serde(default)]
    pub tx_hash: String,
    /// Block number of the transaction.
    #[serde(default)]
    pub block_number: u64,
    /// Domain of the RPC endpoint used.
    #[serde(default)]
    pub rpc_url_domain: String,
    /// `outbound` (Moat -> chain) or `inbound` (chain -> Moat).
    #[serde(default = "default_direction")]
    pub direction: String,
    /// Canonical intent envelope hash (0x-prefixed bytes32 hex).
    #[serde(default)]
    pub intent_hash: String,
}

fn default_direction() -> String {
    "outbound".to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest() -> CapabilityManifest {
        let now = Utc::now();
        CapabilityManifest {
            id: "cap_search_v1".into(),
            name: "Web Search".into(),
            version: "1.0.0".into(),
            provider: "acme-corp".into(),
            method: "POST /search".into(),
            description: "Searches the web and returns ranked results.".into(),
            scopes: ["search:read".to_string()].into(),
            input_schema: json!({"type": "object"}),
            output_schema: json!({"type": "object"}),
            risk_class: RiskClass::Low,
            domain_allowlist: ["*.acme.com".to_string()].into(),
            status: CapabilityStatus::Published,
            created_at: now,
            updated_at: now,
        }
    }

    fn receipt() -> Receipt {
        Receipt {
            id: new_uuid(),
            capability_id: "cap_search_v1".into(),
            capability_version: "1.0.0".into(),
            tenant_id: "tenant_abc".into(),
            timestamp: Utc::now(),
            idempotency_key: "idem_xyz".into(),
            input_hash: "a".repeat(64),
            output_hash: "b".repeat(64),
            latency_ms: 142.5,
            status: ExecutionStatus::Success,
            error_code: None,
            provider_request_id: None,
        }
    }

    #[test]
    fn valid_manifest_passes() {
        manifest().validate().expect("valid manifest");
    }

    #[test]
    fn semver_accepts_release_and_prerelease() {
        for v in ["0.0.1", "1.2.3", "10.20.30", "2.0.0-beta.1", "1.0.0-rc-2"] {
            assert!(is_valid_semver(v), "expected valid: {v}");
        }
    }

    #[test]
    fn semver_rejects_malformed_versions() {
        for v in ["1.0", "1.0.0.0", "01.0.0", "1.0.x", "v1.0.0", "1.0.0-", "1.0.0-a..b", ""] {
            assert!(!is_valid_semver(v), "expected invalid: {v}");
        }
    }

    #[test]
    fn manifest_rejects_bad_semver() {
        let mut m = manifest();
        m.version = "not-semver".into();
        assert!(matches!(m.validate(), Err(ModelError::InvalidSemver(_))));
    }

    #[test]
    fn manifest_rejects_updated_before_created() {
        let mut m = manifest();
        m.updated_at = m.created_at - chrono::Duration::seconds(1);
        assert!(matches!(m.validate(), Err(ModelError::UpdatedBeforeCreated)));
    }

    #[test]
    fn receipt_validates_hash_shape() {
        let mut r = receipt();
        r.input_hash = "A".repeat(64);
        assert!(matches!(
            r.validate(),
            Err(ModelError::InvalidSha256Hex { field: "input_hash" })
        ));

        let mut r = receipt();
        r.output_hash = "zz".repeat(32);
        assert!(matches!(
            r.validate(),
            Err(ModelError::InvalidSha256Hex { field: "output_hash" })
        ));

        receipt().validate().expect("valid receipt");
    }

    #[test]
    fn receipt_rejects_negative_latency() {
        let mut r = receipt();
        r.latency_ms = -1.0;
        assert!(matches!(r.validate(), Err(ModelError::NegativeDuration(_))));
    }

    #[test]
    fn outcome_event_requires_taxonomy_on_failure() {
        let err = OutcomeEvent::new("r1", "cap", "t1", false, 10.0, None);
        assert!(matches!(err, Err(ModelError::TaxonomyMismatch)));
    }

    #[test]
    fn outcome_event_forbids_taxonomy_on_success() {
        let err = OutcomeEvent::new("r1", "cap", "t1", true, 10.0, Some(ErrorTaxonomy::Timeout));
        assert!(matches!(err, Err(ModelError::TaxonomyMismatch)));
    }

    #[test]
    fn outcome_event_invariant_holds_on_construction() {
        let ok = OutcomeEvent::new("r1", "cap", "t1", true, 10.0, None).unwrap();
        assert!(ok.success && ok.error_taxonomy.is_none());

        let failed =
            OutcomeEvent::new("r1", "cap", "t1", false, 10.0, Some(ErrorTaxonomy::Provider5xx))
                .unwrap();
        assert!(!failed.success && failed.error_taxonomy.is_some());
    }

    #[test]
    fn execution_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::PolicyDenied).unwrap(),
            r#""policy_denied""#
        );
        assert_eq!(
            serde_json::to_string(&ErrorTaxonomy::Provider5xx).unwrap(),
            r#""provider_5xx""#
        );
    }

    #[test]
    fn risk_class_is_ordered() {
        assert!(RiskClass::Low < RiskClass::Medium);
        assert!(RiskClass::Medium < RiskClass::High);
        assert!(RiskClass::High < RiskClass::Critical);
    }

    #[test]
    fn manifest_serde_roundtrip() {
        let m = manifest();
        let json = serde_json::to_string(&m).unwrap();
        let back: CapabilityManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn receipt_serde_roundtrip_keeps_optional_fields() {
        let mut r = receipt();
        r.status = ExecutionStatus::Failure;
        r.error_code = Some("adapter_execution_failed".into());
        let json = serde_json::to_string(&r).unwrap();
        let back: Receipt = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn bundle_defaults_are_permissive_fields_not_rules() {
        let raw = json!({
            "id": "b1",
            "tenant_id": "t1",
            "capability_id": "cap_v1",
            "created_at": Utc::now(),
        });
        let bundle: PolicyBundle = serde_json::from_value(raw).unwrap();
        assert!(bundle.allowed_scopes.is_empty());
        assert!(bundle.budget_daily.is_none());
        assert!(bundle.domain_allowlist.is_empty());
        assert!(!bundle.require_approval);
    }

    #[test]
    fn web3_context_defaults_to_outbound() {
        let ctx: Web3ExecutionContext =
            serde_json::from_value(json!({"chain_id": 11155111})).unwrap();
        assert_eq!(ctx.direction, "outbound");
        assert_eq!(ctx.block_number, 0);
    }
}
