// SPDX-License-Identifier: MIT OR Apache-2.0
//! Environment-driven settings for the trust-plane service.

use crate::Thresholds;
use std::env;

/// Runtime settings for `moat-trustd`, read from the environment.
#[derive(Debug, Clone)]
pub struct TrustSettings {
    /// Service identity used in logs and health responses.
    pub service_name: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Log filter (e.g. `info`, `moat_trust=debug`).
    pub log_level: String,
    /// Allowed CORS origins, comma-separated; empty disables CORS.
    pub cors_origins: Vec<String>,
    /// Reliability thresholds for hide/throttle/verified decisions.
    pub thresholds: Thresholds,
}

impl TrustSettings {
    /// Load settings from the process environment, applying defaults.
    pub fn from_env() -> Self {
        let thresholds = Thresholds {
            min_success_rate_7d: env_parse("MOAT_MIN_SUCCESS_RATE_7D", 0.80),
            max_p95_latency_ms: env_parse("MOAT_MAX_P95_LATENCY_MS", 10_000.0),
        };
        Self {
            service_name: env_or("MOAT_SERVICE_NAME", "moat-trust-plane"),
            host: env_or("MOAT_HOST", "0.0.0.0"),
            port: env_parse("MOAT_PORT", 8003),
            log_level: env_or("MOAT_LOG_LEVEL", "info"),
            cors_origins: env::var("MOAT_CORS_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            thresholds,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
