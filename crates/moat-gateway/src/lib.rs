// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Moat execution gateway.
//!
//! Agents do not call external providers directly: they call this
//! service, which evaluates policy, deduplicates retries, dispatches to a
//! provider adapter, records a redacted-hash receipt, feeds the trust
//! plane, and (best-effort) anchors successful executions on-chain.

#![deny(unsafe_code)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod execute;
pub mod intents;
pub mod vault;
pub mod worker;

pub use config::Settings;
pub use execute::{ExecuteRequest, ReceiptResponse};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cache::CapabilityCache;
use intents::{Executor, InboundIntentEvent, TenantResolver};
use moat_adapters::AdapterRegistry;
use moat_core::new_uuid;
use moat_error::MoatError;
use moat_idempotency::IdempotencyStore;
use moat_policy::PolicyEngine;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use vault::{ConnectionStore, CredentialVault};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Everything a request handler needs, shared behind an `Arc`.
pub struct AppState {
    /// Service settings.
    pub settings: Settings,
    /// TTL cache in front of the capability registry.
    pub cache: CapabilityCache,
    /// Policy bundles and spend counters.
    pub policy: PolicyEngine,
    /// Provider adapter registry.
    pub registry: AdapterRegistry,
    /// Idempotency store for receipt deduplication.
    pub idempotency: Arc<dyn IdempotencyStore<ReceiptResponse>>,
    /// Credential vault.
    pub vault: Arc<dyn CredentialVault>,
    /// Tenant connection records (credential references).
    pub connections: ConnectionStore,
    /// Sender-address to tenant resolution for inbound intents.
    pub resolver: TenantResolver,
    background: mpsc::Sender<worker::BackgroundJob>,
}

impl AppState {
    /// Assemble the state from its parts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        cache: CapabilityCache,
        policy: PolicyEngine,
        registry: AdapterRegistry,
        idempotency: Arc<dyn IdempotencyStore<ReceiptResponse>>,
        vault: Arc<dyn CredentialVault>,
        connections: ConnectionStore,
        resolver: TenantResolver,
        background: mpsc::Sender<worker::BackgroundJob>,
    ) -> Self {
        Self {
            settings,
            cache,
            policy,
            registry,
            idempotency,
            vault,
            connections,
            resolver,
            background,
        }
    }

    /// Enqueue background work without waiting. A saturated queue drops
    /// the job with a log line.
    pub fn enqueue_background(&self, job: worker::BackgroundJob) {
        if let Err(err) = self.background.try_send(job) {
            warn!(error = %err, "background queue saturated, dropping job");
        }
    }
}

#[async_trait]
impl Executor for AppState {
    async fn execute(
        &self,
        capability_id: &str,
        request: ExecuteRequest,
        auth_tenant: &str,
        request_id: &str,
    ) -> Result<ReceiptResponse, MoatError> {
        execute::run_pipeline(self, capability_id, request, auth_tenant, request_id).await
    }
}

// ---------------------------------------------------------------------------
// API error envelope
// ---------------------------------------------------------------------------

/// HTTP projection of a [`MoatError`].
pub struct ApiError(pub MoatError);

impl From<MoatError> for ApiError {
    fn from(err: MoatError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Internal details never reach the wire for 5xx classes.
        let message = if status.is_server_error() {
            "internal error".to_string()
        } else {
            err.message.clone()
        };
        let body = Json(json!({
            "error": err.code.as_str(),
            "message": message,
            "context": err.context,
        }));
        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert("www-authenticate", HeaderValue::from_static("Bearer"));
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Pin a request id on the way in (so handlers and logs agree on it) and
/// echo it on the way out.
async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(new_uuid);
    if let Ok(value) = HeaderValue::from_str(&id) {
        request.headers_mut().insert("x-request-id", value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-request-id", value);
        return response;
    }
    next.run(request).await
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(new_uuid)
}

/// Build the gateway router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/execute/{capability_id}", post(execute_capability))
        .route("/intents/inbound", post(receive_intent))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "service": state.settings.service_name}))
}

async fn execute_capability(
    State(state): State<Arc<AppState>>,
    Path(capability_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ExecuteRequest>,
) -> Result<Json<ReceiptResponse>, ApiError> {
    let request_id = request_id(&headers);
    let tenant = auth::authenticate(&state.settings, &headers)?;
    let receipt =
        execute::run_pipeline(&state, &capability_id, body, &tenant, &request_id).await?;
    Ok(Json(receipt))
}

async fn receive_intent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<InboundIntentEvent>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // The indexer is a trusted ingester; sender resolution authorizes the
    // request instead of the bearer-token check.
    let request_id = request_id(&headers);
    let (receipt, correlation) =
        intents::process_intent(state.as_ref(), &state.resolver, event, &request_id).await?;
    Ok(Json(json!({
        "receipt": receipt,
        "intent_correlation": correlation,
        "request_id": request_id,
    })))
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Wire the default production state: memory idempotency store, env
/// vault, stub + HTTPS-proxy adapters, and the background worker.
pub fn build_default_state(
    settings: Settings,
) -> (Arc<AppState>, tokio::task::JoinHandle<()>) {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs_f64(settings.http_timeout_secs))
        .build()
        .expect("gateway http client construction");

    let registry = AdapterRegistry::new();
    registry.register(Arc::new(moat_adapters::StubAdapter::new()));
    registry.register(Arc::new(moat_adapters::SlackAdapter::new()));
    registry.register(Arc::new(moat_adapters::HttpProxyAdapter::new(
        moat_adapters::parse_domain_allowlist(&settings.http_proxy_allowlist),
    )));

    let cache = CapabilityCache::new(
        settings.control_plane_url.clone(),
        client.clone(),
        settings.allow_stub_capability,
    );

    let resolver = TenantResolver::new(
        client.clone(),
        settings.control_plane_url.clone(),
        TenantResolver::parse_fallback_map(
            &std::env::var("MOAT_INTENT_SENDER_MAP").unwrap_or_default(),
        ),
    );

    let (background, worker_handle) = worker::spawn_background_worker(
        settings.trust_plane_url.clone(),
        moat_chain::ChainConfig::from_env(),
        client,
    );

    let state = Arc::new(AppState::new(
        settings,
        cache,
        PolicyEngine::new(),
        registry,
        Arc::new(moat_idempotency::MemoryIdempotencyStore::new()),
        Arc::new(vault::EnvVault),
        ConnectionStore::new(),
        resolver,
        background,
    ));
    (state, worker_handle)
}
