// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stub adapter for development and testing.

use crate::{Adapter, AdapterError};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const SYNTHETIC_LATENCY_MS: u64 = 25;

/// Fake provider adapter that returns a synthetic success response.
///
/// Exercises the full gateway pipeline (policy evaluation, idempotency,
/// receipts) without real provider credentials. It echoes the submitted
/// params back in the result after a small synthetic latency, and is the
/// fallback returned by [`crate::AdapterRegistry::get_or_stub`] for any
/// provider with no registered adapter.
pub struct StubAdapter {
    latency: Duration,
}

impl StubAdapter {
    /// Create a stub with the default synthetic latency.
    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(SYNTHETIC_LATENCY_MS),
        }
    }

    /// Create a stub with a custom synthetic latency (tests).
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for StubAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for StubAdapter {
    fn provider_name(&self) -> &'static str {
        "stub"
    }

    async fn execute(
        &self,
        capability_id: &str,
        capability_name: &str,
        params: &Value,
        credential: Option<&str>,
    ) -> Result<Value, AdapterError> {
        tokio::time::sleep(self.latency).await;

        debug!(
            capability_id,
            capability_name,
            latency_ms = self.latency.as_millis() as u64,
            has_credential = credential.is_some(),
            // credential value is intentionally NOT logged
            "stub adapter executed"
        );

        Ok(json!({
            "status": "success",
            "capability_id": capability_id,
            "capability_name": capability_name,
            "echo_params": params,
            "latency_ms": self.latency.as_millis() as u64,
            "stub": true,
            "executed_at": Utc::now().to_rfc3339(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_params_and_flags_itself() {
        let stub = StubAdapter::with_latency(Duration::ZERO);
        let result = stub
            .execute("cap_x", "Cap X", &json!({"q": "hello"}), Some("secret-value"))
            .await
            .unwrap();
        assert_eq!(result["stub"], true);
        assert_eq!(result["echo_params"], json!({"q": "hello"}));
        assert_eq!(result["capability_id"], "cap_x");
        // The credential never appears in the result.
        assert!(!result.to_string().contains("secret-value"));
    }
}
