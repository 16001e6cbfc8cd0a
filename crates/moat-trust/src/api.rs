// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP surface of the trust plane.
//!
//! The gateway POSTs an outcome event to `/events` after each capability
//! execution; events drive the rolling reliability statistics. Stats and
//! derived trust signals are served under `/capabilities`. These are
//! internal service-to-service APIs.

use crate::{CapabilityStats, EventRecord, StatsStore, should_hide, should_throttle};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for the trust-plane router.
#[derive(Clone)]
pub struct TrustState {
    /// Rolling stats store.
    pub store: Arc<StatsStore>,
    /// Service identity reported by `/healthz`.
    pub service_name: String,
}

/// Outcome event payload sent by the gateway after each execution.
#[derive(Debug, Deserialize)]
pub struct OutcomeEventRequest {
    /// Unique event ID (UUID v4).
    pub event_id: String,
    /// Capability that was executed.
    pub capability_id: String,
    /// Tenant that triggered the execution.
    #[serde(default)]
    pub tenant_id: String,
    /// Receipt ID from the gateway.
    #[serde(default)]
    pub receipt_id: String,
    /// Execution result, e.g. `success` or `failure`.
    pub execution_status: String,
    /// End-to-end execution latency in milliseconds.
    #[serde(default)]
    pub latency_ms: f64,
    /// ISO-8601 timestamp when the execution occurred; defaults to now.
    #[serde(default)]
    pub occurred_at: Option<String>,
}

/// Acknowledgement returned for an ingested event.
#[derive(Debug, Serialize)]
pub struct EventIngestResponse {
    /// Echoed event ID.
    pub event_id: String,
    /// Echoed capability ID.
    pub capability_id: String,
    /// Whether the event was accepted.
    pub accepted: bool,
    /// Human-readable status message.
    pub message: String,
}

/// Reliability statistics for a single capability, with trust signals.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Capability the stats describe.
    pub capability_id: String,
    /// Success rate over the trailing 7 days.
    pub success_rate_7d: f64,
    /// p95 latency over the trailing 7 days, milliseconds.
    pub p95_latency_ms: f64,
    /// Number of executions in the window.
    pub total_executions_7d: usize,
    /// Timestamp of the most recent event, if any.
    pub last_checked: Option<String>,
    /// Whether the capability has earned verified status.
    pub verified: bool,
    /// Suppress from marketplace listings.
    pub should_hide: bool,
    /// Throttle at the gateway.
    pub should_throttle: bool,
}

/// Envelope for the all-capabilities listing.
#[derive(Debug, Serialize)]
pub struct AllStatsResponse {
    /// Per-capability stats.
    pub items: Vec<StatsResponse>,
    /// Number of items.
    pub total: usize,
}

/// Build the trust-plane router.
pub fn build_router(state: TrustState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/events", post(ingest_event))
        .route("/events/count", get(event_count))
        .route("/capabilities", get(list_all_stats))
        .route("/capabilities/{capability_id}/stats", get(get_capability_stats))
        .with_state(state)
}

async fn healthz(State(state): State<TrustState>) -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "service": state.service_name}))
}

async fn ingest_event(
    State(state): State<TrustState>,
    Json(body): Json<OutcomeEventRequest>,
) -> (StatusCode, Json<EventIngestResponse>) {
    let occurred_at = match body.occurred_at.as_deref() {
        Some(raw) => parse_occurred_at(raw).unwrap_or_else(|| {
            warn!(event_id = %body.event_id, occurred_at = raw, "invalid occurred_at, using now");
            Utc::now()
        }),
        None => Utc::now(),
    };

    let success = matches!(
        body.execution_status.to_ascii_lowercase().as_str(),
        "success" | "succeeded" | "ok"
    );

    state.store.record(EventRecord {
        capability_id: body.capability_id.clone(),
        success,
        latency_ms: body.latency_ms,
        occurred_at,
        tenant_id: body.tenant_id.clone(),
        receipt_id: body.receipt_id.clone(),
    });

    info!(
        event_id = %body.event_id,
        capability_id = %body.capability_id,
        success,
        latency_ms = body.latency_ms,
        "outcome event ingested"
    );

    (
        StatusCode::CREATED,
        Json(EventIngestResponse {
            event_id: body.event_id,
            capability_id: body.capability_id,
            accepted: true,
            message: "Event accepted and stats updated.".to_string(),
        }),
    )
}

fn parse_occurred_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            raw.parse::<chrono::NaiveDateTime>()
                .ok()
                .map(|naive| naive.and_utc())
        })
}

async fn event_count(State(state): State<TrustState>) -> Json<serde_json::Value> {
    Json(json!({"total_events_in_window": state.store.total_events_in_window()}))
}

async fn get_capability_stats(
    State(state): State<TrustState>,
    Path(capability_id): Path<String>,
) -> Json<StatsResponse> {
    Json(to_response(state.store.get_stats(&capability_id), &state))
}

async fn list_all_stats(State(state): State<TrustState>) -> Json<AllStatsResponse> {
    let items: Vec<StatsResponse> = state
        .store
        .all_capability_ids()
        .iter()
        .map(|id| to_response(state.store.get_stats(id), &state))
        .collect();
    let total = items.len();
    Json(AllStatsResponse { items, total })
}

fn to_response(stats: CapabilityStats, state: &TrustState) -> StatsResponse {
    let thresholds = state.store.thresholds();
    StatsResponse {
        should_hide: should_hide(&stats, &thresholds),
        should_throttle: should_throttle(&stats, &thresholds),
        capability_id: stats.capability_id,
        success_rate_7d: stats.success_rate_7d,
        p95_latency_ms: stats.p95_latency_ms,
        total_executions_7d: stats.total_executions_7d,
        last_checked: stats.last_checked.map(|dt| dt.to_rfc3339()),
        verified: stats.verified,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    fn test_router() -> Router {
        build_router(TrustState {
            store: Arc::new(StatsStore::default()),
            service_name: "moat-trust-plane".to_string(),
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_event(capability_id: &str, status: &str, latency_ms: f64) -> Request<Body> {
        let payload = json!({
            "event_id": moat_core::new_uuid(),
            "capability_id": capability_id,
            "tenant_id": "t1",
            "receipt_id": "r1",
            "execution_status": status,
            "latency_ms": latency_ms,
        });
        Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_service() {
        let response = test_router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "moat-trust-plane");
    }

    #[tokio::test]
    async fn ingest_returns_201_and_updates_stats() {
        let router = test_router();

        let response = router
            .clone()
            .oneshot(post_event("cap_x", "success", 120.0))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let ack = body_json(response).await;
        assert_eq!(ack["accepted"], true);
        assert_eq!(ack["capability_id"], "cap_x");

        let response = router
            .oneshot(Request::get("/capabilities/cap_x/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["total_executions_7d"], 1);
        assert_eq!(stats["success_rate_7d"], 1.0);
        assert_eq!(stats["verified"], false);
    }

    #[tokio::test]
    async fn non_success_statuses_count_as_failures() {
        let router = test_router();
        for status in ["failure", "timeout", "policy_denied"] {
            router
                .clone()
                .oneshot(post_event("cap_f", status, 10.0))
                .await
                .unwrap();
        }
        router.clone().oneshot(post_event("cap_f", "OK", 10.0)).await.unwrap();

        let response = router
            .oneshot(Request::get("/capabilities/cap_f/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["total_executions_7d"], 4);
        assert_eq!(stats["success_rate_7d"], 0.25);
    }

    #[tokio::test]
    async fn listing_covers_all_tracked_capabilities() {
        let router = test_router();
        router.clone().oneshot(post_event("cap_a", "success", 5.0)).await.unwrap();
        router.clone().oneshot(post_event("cap_b", "failure", 5.0)).await.unwrap();

        let response = router
            .clone()
            .oneshot(Request::get("/capabilities").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["items"][0]["capability_id"], "cap_a");
        assert_eq!(body["items"][1]["capability_id"], "cap_b");

        let response = router
            .oneshot(Request::get("/events/count").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["total_events_in_window"], 2);
    }

    #[tokio::test]
    async fn unknown_capability_gets_zero_event_defaults() {
        let response = test_router()
            .oneshot(
                Request::get("/capabilities/cap_missing/stats").body(Body::empty()).unwrap(),
            )
            .await
            .unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["success_rate_7d"], 1.0);
        assert_eq!(stats["total_executions_7d"], 0);
        assert_eq!(stats["last_checked"], serde_json::Value::Null);
        assert_eq!(stats["should_hide"], false);
        assert_eq!(stats["should_throttle"], false);
    }

    #[tokio::test]
    async fn explicit_occurred_at_is_honoured() {
        let router = test_router();
        let payload = json!({
            "event_id": "e1",
            "capability_id": "cap_t",
            "execution_status": "success",
            "latency_ms": 10.0,
            "occurred_at": "2020-01-01T00:00:00Z",
        });
        let request = Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        router.clone().oneshot(request).await.unwrap();

        // An event that old falls outside the 7-day window immediately.
        let response = router
            .oneshot(Request::get("/capabilities/cap_t/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["total_executions_7d"], 0);
    }
}
