// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs carrying `sub` (the tenant id), `exp`, and `iat`.
//! When auth is disabled — permitted only in local/test environments, see
//! [`crate::config::Settings::validate`] — the tenant is read from the
//! `X-Tenant-ID` header instead, defaulting to `dev-tenant`.

use crate::config::Settings;
use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use moat_error::{ErrorCode, MoatError};
use serde::{Deserialize, Serialize};

/// Claims carried by a gateway bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Tenant identifier.
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: i64,
    /// Issued-at, unix seconds.
    pub iat: i64,
}

/// Resolve the authenticated tenant from the request headers.
pub fn authenticate(settings: &Settings, headers: &HeaderMap) -> Result<String, MoatError> {
    if settings.auth_disabled {
        let tenant = headers
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("dev-tenant");
        return Ok(tenant.to_string());
    }

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| MoatError::new(ErrorCode::AuthMissing, "authentication required"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| MoatError::new(ErrorCode::AuthInvalid, "malformed Authorization header"))?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["sub", "exp", "iat"]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            MoatError::new(ErrorCode::AuthExpired, "token has expired")
        }
        _ => MoatError::new(ErrorCode::AuthInvalid, "invalid authentication token"),
    })?;

    Ok(data.claims.sub)
}

/// Mint a token for `tenant_id`, valid for `ttl_seconds`.
pub fn create_token(secret: &str, tenant_id: &str, ttl_seconds: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: tenant_id.to_string(),
        iat: now,
        exp: now + ttl_seconds,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("HS256 token encoding is infallible for valid claims")
}
