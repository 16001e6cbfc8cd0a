// SPDX-License-Identifier: MIT OR Apache-2.0
//! Environment-driven settings for the gateway service.

use moat_error::{ErrorCode, MoatError};
use std::env;

const MIN_SECRET_LENGTH: usize = 32;

/// Runtime settings for `moat-gateway`, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Service identity used in logs and health responses.
    pub service_name: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Base URL of the capability registry (control plane).
    pub control_plane_url: String,
    /// Base URL of the trust plane for outcome emission.
    pub trust_plane_url: String,
    /// Outbound HTTP timeout in seconds.
    pub http_timeout_secs: f64,
    /// Log filter (e.g. `info`, `moat_gateway=debug`).
    pub log_level: String,
    /// Deployment environment tag: `local|test|dev|staging|prod`.
    pub environment: String,
    /// Allowed CORS origins, comma-separated; empty disables CORS.
    pub cors_origins: Vec<String>,
    /// HS256 secret for bearer-token verification.
    pub jwt_secret: String,
    /// Whether authentication is disabled (local/test only).
    pub auth_disabled: bool,
    /// Whether an unreachable registry falls back to a stub capability.
    pub allow_stub_capability: bool,
    /// Comma-separated domain allowlist for the HTTPS proxy adapter.
    pub http_proxy_allowlist: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_name: "moat-gateway".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8002,
            control_plane_url: "http://localhost:8001".to_string(),
            trust_plane_url: "http://localhost:8003".to_string(),
            http_timeout_secs: 30.0,
            log_level: "info".to_string(),
            environment: "local".to_string(),
            cors_origins: Vec::new(),
            jwt_secret: String::new(),
            auth_disabled: false,
            allow_stub_capability: true,
            http_proxy_allowlist: String::new(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment and validate them.
    ///
    /// Validation failures are configuration errors the process must not
    /// start with: auth disabled outside `local`/`test`, or a missing or
    /// short JWT secret while auth is enabled.
    pub fn from_env() -> Result<Self, MoatError> {
        let defaults = Self::default();
        let settings = Self {
            service_name: env_or("MOAT_SERVICE_NAME", &defaults.service_name),
            host: env_or("MOAT_HOST", &defaults.host),
            port: env_parse("MOAT_PORT", defaults.port),
            control_plane_url: env_or("MOAT_CONTROL_PLANE_URL", &defaults.control_plane_url),
            trust_plane_url: env_or("MOAT_TRUST_PLANE_URL", &defaults.trust_plane_url),
            http_timeout_secs: env_parse("MOAT_HTTP_TIMEOUT", defaults.http_timeout_secs),
            log_level: env_or("MOAT_LOG_LEVEL", &defaults.log_level),
            environment: env_or("MOAT_ENVIRONMENT", &defaults.environment),
            cors_origins: env::var("MOAT_CORS_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            jwt_secret: env::var("MOAT_JWT_SECRET").unwrap_or_default(),
            auth_disabled: env_flag("MOAT_AUTH_DISABLED"),
            allow_stub_capability: env::var("MOAT_ALLOW_STUB_CAPABILITY")
                .map(|v| v.to_ascii_lowercase() != "false")
                .unwrap_or(true),
            http_proxy_allowlist: env::var("HTTP_PROXY_DOMAIN_ALLOWLIST").unwrap_or_default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Enforce the auth-safety rules on this settings value.
    pub fn validate(&self) -> Result<(), MoatError> {
        if self.auth_disabled {
            if !matches!(self.environment.as_str(), "local" | "test") {
                return Err(MoatError::new(
                    ErrorCode::ConfigInvalid,
                    format!(
                        "MOAT_AUTH_DISABLED=true is not allowed in '{}' environment; \
                         only 'local' and 'test' can disable auth",
                        self.environment
                    ),
                ));
            }
        } else if self.jwt_secret.len() < MIN_SECRET_LENGTH {
            return Err(MoatError::new(
                ErrorCode::ConfigInvalid,
                format!(
                    "MOAT_JWT_SECRET must be at least {MIN_SECRET_LENGTH} characters when \
                     authentication is enabled; set MOAT_AUTH_DISABLED=true for local development"
                ),
            ));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_disabled_is_rejected_outside_local_and_test() {
        for environment in ["dev", "staging", "prod"] {
            let settings = Settings {
                auth_disabled: true,
                environment: environment.to_string(),
                ..Settings::default()
            };
            let err = settings.validate().unwrap_err();
            assert_eq!(err.code, ErrorCode::ConfigInvalid, "environment {environment}");
        }
    }

    #[test]
    fn auth_disabled_is_accepted_in_local_and_test() {
        for environment in ["local", "test"] {
            let settings = Settings {
                auth_disabled: true,
                environment: environment.to_string(),
                ..Settings::default()
            };
            settings.validate().expect("should validate");
        }
    }

    #[test]
    fn enabled_auth_requires_a_long_secret() {
        let short = Settings {
            jwt_secret: "too-short".to_string(),
            ..Settings::default()
        };
        assert!(short.validate().is_err());

        let ok = Settings {
            jwt_secret: "x".repeat(MIN_SECRET_LENGTH),
            ..Settings::default()
        };
        ok.validate().expect("should validate");
    }
}
