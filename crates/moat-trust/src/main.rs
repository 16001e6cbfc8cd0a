// SPDX-License-Identifier: MIT OR Apache-2.0
//! `moat-trustd` — the trust-plane service binary.

use anyhow::Context;
use clap::Parser;
use moat_trust::api::{TrustState, build_router};
use moat_trust::config::TrustSettings;
use moat_trust::StatsStore;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "moat-trustd", about = "Moat trust-plane service", version)]
struct Args {
    /// Bind host (overrides MOAT_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides MOAT_PORT).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut settings = TrustSettings::from_env();
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    let state = TrustState {
        store: Arc::new(StatsStore::new(settings.thresholds)),
        service_name: settings.service_name.clone(),
    };

    let mut app = build_router(state);
    if !settings.cors_origins.is_empty() {
        let origins: Vec<_> = settings
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        app = app.layer(CorsLayer::new().allow_origin(AllowOrigin::list(origins)));
    }

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(service = %settings.service_name, %addr, "trust plane listening");

    axum::serve(listener, app).await.context("serve trust plane")?;
    Ok(())
}
