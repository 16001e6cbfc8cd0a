// SPDX-License-Identifier: MIT OR Apache-2.0
//! `moat-gateway` — the execution gateway service binary.

use anyhow::Context;
use clap::Parser;
use moat_gateway::{Settings, build_default_state, build_router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "moat-gateway", about = "Moat execution gateway", version)]
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
    let mut settings = Settings::from_env().context("load gateway settings")?;
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

    let cors_origins = settings.cors_origins.clone();
    let addr = format!("{}:{}", settings.host, settings.port);
    let service_name = settings.service_name.clone();

    let (state, _worker) = build_default_state(settings);
    let mut app = build_router(state);
    if !cors_origins.is_empty() {
        let origins: Vec<_> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        app = app.layer(CorsLayer::new().allow_origin(AllowOrigin::list(origins)));
    }

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(service = %service_name, %addr, "gateway listening");

    axum::serve(listener, app).await.context("serve gateway")?;
    Ok(())
}
