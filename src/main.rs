// =============================================================================
// FlowNexus — Main Entry Point
// =============================================================================
//
// Real-time options-flow aggregation service: live vendor WebSocket ingest,
// periodic REST backfill, an enrichment pipeline into a bounded trade
// store, and a query/fan-out API for downstream clients.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broadcast;
mod config;
mod flow;
mod gex;
mod ingest;
mod market_data;
mod pricing;
mod scanner;
mod symbol;
mod types;
mod vendor;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    vendor::client::warn_if_unkeyed(&config.api_key);

    info!(
        port = config.port,
        environment = %config.environment,
        tickers = ?config.hot_tickers,
        "FlowNexus starting up"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));
    let cancel = CancellationToken::new();

    // ── 3. Live WebSocket ingest (serialized reconnect loop) ─────────────
    let stream_state = state.clone();
    let stream_cancel = cancel.clone();
    tokio::spawn(async move {
        ingest::stream::run_stream_loop(stream_state, stream_cancel).await;
    });

    // ── 4. Periodic REST backfill ────────────────────────────────────────
    let backfill_state = state.clone();
    let backfill_cancel = cancel.clone();
    tokio::spawn(async move {
        ingest::backfill::run_backfill_loop(backfill_state, backfill_cancel).await;
    });

    // ── 5. HTTP + WS API server ──────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let bind_addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        let shutdown = async move { server_cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %e, "API server failed");
        }
    });

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");
    cancel.cancel();

    if let Err(e) = server_handle.await {
        warn!(error = %e, "API server task ended abnormally");
    }

    info!(
        store_size = state.store.len(),
        uptime_secs = state.uptime_secs(),
        "FlowNexus shut down complete"
    );
    Ok(())
}
