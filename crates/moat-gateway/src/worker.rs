// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded background worker for post-response work.
//!
//! The request path enqueues jobs and returns immediately; a worker task
//! drains the channel with its own timeouts. Outcome emission and the
//! chain hook are both best-effort: failures are logged and dropped, and
//! neither can block or fail a caller's request.

use moat_chain::ChainConfig;
use moat_core::OutcomeEvent;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Queue depth before enqueues start dropping (with a log line).
pub const QUEUE_CAPACITY: usize = 1024;

const OUTCOME_TIMEOUT: Duration = Duration::from_secs(5);

/// Work item processed off the request path.
#[derive(Debug)]
pub enum BackgroundJob {
    /// POST an outcome event to the trust plane.
    EmitOutcome {
        /// The derived analytics event.
        event: OutcomeEvent,
        /// Execution status token for the trust-plane wire format.
        execution_status: String,
    },
    /// Run the chain receipt hook over a serialized receipt.
    PostChainReceipt(Value),
}

/// Spawn the background worker; jobs sent on the returned channel are
/// processed in order until the channel closes.
pub fn spawn_background_worker(
    trust_plane_url: String,
    chain_config: ChainConfig,
    client: reqwest::Client,
) -> (mpsc::Sender<BackgroundJob>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<BackgroundJob>(QUEUE_CAPACITY);
    let handle = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                BackgroundJob::EmitOutcome {
                    event,
                    execution_status,
                } => emit_outcome(&client, &trust_plane_url, &event, &execution_status).await,
                BackgroundJob::PostChainReceipt(receipt) => {
                    let record = moat_chain::post_chain_receipt(&receipt, &chain_config).await;
                    if let Some(record) = record {
                        debug!(
                            chain = ?record.chain,
                            intent_hash = %record.intent_hash,
                            moat_receipt_id = %record.moat_receipt_id,
                            "chain receipt hook finished"
                        );
                    }
                }
            }
        }
    });
    (tx, handle)
}

/// Send an outcome event to the trust plane. Non-fatal on every failure:
/// trust-plane stats may lag, but execution is never blocked.
async fn emit_outcome(
    client: &reqwest::Client,
    trust_plane_url: &str,
    event: &OutcomeEvent,
    execution_status: &str,
) {
    let payload = json!({
        "event_id": event.id,
        "capability_id": event.capability_id,
        "tenant_id": event.tenant_id,
        "receipt_id": event.receipt_id,
        "execution_status": execution_status,
        "latency_ms": event.latency_ms,
        "occurred_at": event.occurred_at.to_rfc3339(),
    });

    let response = client
        .post(format!("{trust_plane_url}/events"))
        .timeout(OUTCOME_TIMEOUT)
        .json(&payload)
        .send()
        .await;

    match response {
        Ok(response) if !matches!(response.status().as_u16(), 200 | 201 | 204) => {
            warn!(
                status_code = response.status().as_u16(),
                receipt_id = %event.receipt_id,
                "trust plane returned unexpected status"
            );
        }
        Ok(_) => {
            debug!(receipt_id = %event.receipt_id, "outcome event emitted");
        }
        Err(err) => {
            warn!(
                error = %err,
                receipt_id = %event.receipt_id,
                "failed to emit outcome event to trust plane"
            );
        }
    }
}
