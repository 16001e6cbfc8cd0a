//! Unified error taxonomy with stable error codes for Moat.
//!
//! Every Moat error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. The Python-era class hierarchy
//! (`BudgetExceededError` inheriting from `PolicyDeniedError` inheriting
//! from `MoatError`) collapses into one code enum plus structured context;
//! callers discriminate on [`ErrorCode`] or [`ErrorCategory`] instead of
//! `isinstance` chains.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Policy evaluation denials.
    Policy,
    /// Capability registry / lifecycle errors.
    Capability,
    /// Upstream adapter errors.
    Adapter,
    /// Idempotency key conflicts.
    Idempotency,
    /// Authentication errors.
    Auth,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Policy => "policy",
            Self::Capability => "capability",
            Self::Adapter => "adapter",
            Self::Idempotency => "idempotency",
            Self::Auth => "auth",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Policy --
    /// A policy rule denied the operation.
    PolicyDenied,
    /// A spend budget (daily) would be exceeded.
    BudgetExceeded,
    /// Tenant in the request body does not match the authenticated tenant.
    TenantMismatch,

    // -- Capability --
    /// The referenced capability does not exist in the registry.
    CapabilityNotFound,
    /// The capability exists but its lifecycle state forbids execution.
    CapabilityInactive,

    // -- Adapter --
    /// The upstream provider call failed.
    AdapterError,
    /// The upstream provider call exceeded its deadline.
    AdapterTimeout,

    // -- Idempotency --
    /// Same idempotency key seen with a different payload.
    IdempotencyConflict,

    // -- Auth --
    /// No credentials were presented.
    AuthMissing,
    /// The presented token has expired.
    AuthExpired,
    /// The presented token is malformed or its signature is invalid.
    AuthInvalid,

    // -- Config --
    /// Configuration value is invalid or unsafe for the environment.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PolicyDenied | Self::BudgetExceeded | Self::TenantMismatch => {
                ErrorCategory::Policy
            }
            Self::CapabilityNotFound | Self::CapabilityInactive => ErrorCategory::Capability,
            Self::AdapterError | Self::AdapterTimeout => ErrorCategory::Adapter,
            Self::IdempotencyConflict => ErrorCategory::Idempotency,
            Self::AuthMissing | Self::AuthExpired | Self::AuthInvalid => ErrorCategory::Auth,
            Self::ConfigInvalid => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation (e.g. `"POLICY_DENIED"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyDenied => "POLICY_DENIED",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::TenantMismatch => "TENANT_MISMATCH",
            Self::CapabilityNotFound => "CAPABILITY_NOT_FOUND",
            Self::CapabilityInactive => "CAPABILITY_INACTIVE",
            Self::AdapterError => "ADAPTER_ERROR",
            Self::AdapterTimeout => "ADAPTER_TIMEOUT",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::AuthMissing => "AUTH_MISSING",
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::AuthInvalid => "AUTH_INVALID",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }

    /// HTTP status the gateway maps this code to at the API boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::PolicyDenied
            | Self::BudgetExceeded
            | Self::TenantMismatch
            | Self::CapabilityInactive => 403,
            Self::CapabilityNotFound => 404,
            Self::IdempotencyConflict => 409,
            Self::AuthMissing | Self::AuthExpired | Self::AuthInvalid => 401,
            Self::AdapterError | Self::AdapterTimeout => 502,
            Self::ConfigInvalid | Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MoatError
// ---------------------------------------------------------------------------

/// Unified Moat error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use moat_error::{ErrorCode, MoatError};
///
/// let err = MoatError::new(ErrorCode::BudgetExceeded, "daily budget reached")
///     .with_context("spend_cents", 500)
///     .with_context("limit_cents", 500);
/// assert_eq!(err.code.http_status(), 403);
/// ```
pub struct MoatError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl MoatError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Shorthand for a policy denial carrying its rule-hit token.
    pub fn policy_denied(message: impl Into<String>, rule_hit: impl Into<String>) -> Self {
        Self::new(ErrorCode::PolicyDenied, message).with_context("rule_hit", rule_hit.into())
    }

    /// Shorthand for an internal error with a generic client-safe message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for MoatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("MoatError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for MoatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for MoatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`MoatError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoatErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&MoatError> for MoatErrorDto {
    fn from(err: &MoatError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
