// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Public data-plane surface:
//
//   GET  /health                      liveness
//   GET  /api/options-flow            paged, filtered flows
//   POST /api/options-flow/refresh    fire-and-forget backfill trigger
//   GET  /api/options-flow/stats      store-level aggregates
//   GET  /api/gex/:ticker             GEX surface
//   GET  /api/gex/:ticker/heatmap     GEX heatmap + key levels
//   GET  /api/live-scanner            watchlist alerts
//   GET  /api/options-chain/:ticker   vendor pass-through
//   GET  /ws                          live fan-out WebSocket
//
// CORS: a single FRONTEND_URL origin in production; permissive in
// development (localhost included).
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderValue,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::error::ApiError;
use crate::app_state::AppState;
use crate::flow::query::{run_query, FlowQuery, QueryResponse};
use crate::gex;
use crate::ingest::backfill;
use crate::scanner::{self, ScannerQuery, ScannerResponse};
use crate::types::{OptionKind, TradeType};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/options-flow", get(options_flow))
        .route("/api/options-flow/refresh", post(refresh))
        .route("/api/options-flow/stats", get(stats))
        .route("/api/gex/:ticker", get(gex_surface))
        .route("/api/gex/:ticker/heatmap", get(gex_heatmap))
        .route("/api/live-scanner", get(live_scanner))
        .route("/api/options-chain/:ticker", get(options_chain))
        .route("/ws", get(crate::api::ws::ws_handler))
        .layer(cors_layer(&state))
        .with_state(state)
}

fn cors_layer(state: &Arc<AppState>) -> CorsLayer {
    if !state.config.is_development() {
        if let Some(origin) = &state.config.frontend_url {
            match origin.parse::<HeaderValue>() {
                Ok(value) => {
                    return CorsLayer::new()
                        .allow_origin(value)
                        .allow_methods(Any)
                        .allow_headers(Any);
                }
                Err(_) => warn!(%origin, "invalid FRONTEND_URL — falling back to permissive CORS"),
            }
        }
    }
    // Development (localhost clients) and unconfigured production.
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "flownexus",
        "uptimeSecs": state.uptime_secs(),
        "storeSize": state.store.len(),
    }))
}

// =============================================================================
// Options flow
// =============================================================================

async fn options_flow(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
) -> Result<Json<QueryResponse>, ApiError> {
    // A ticker-scoped query pulls that ticker directly from the vendor
    // before snapshotting, so cold tickers still answer.
    if let Some(ticker) = query.effective_ticker() {
        let fetched = backfill::fetch_ticker_flows(&state, &ticker).await;
        info!(ticker = %ticker, fetched, "ticker-scoped direct fetch");
    }

    let market_status = state.market_status.current().await;
    let snapshot = state.store.snapshot();
    let store_size = state.store.len();

    Ok(Json(run_query(&query, snapshot, store_size, market_status)))
}

async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_size = state.store.len();
    let task_state = state.clone();
    tokio::spawn(async move {
        backfill::run_once(&task_state).await;
    });

    Json(json!({
        "success": true,
        "message": "refresh started",
        "storeSize": store_size,
    }))
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    success: bool,
    total_trades: usize,
    total_premium: f64,
    call_sweeps: usize,
    put_sweeps: usize,
    call_put_ratio: f64,
    call_volume: f64,
    put_volume: f64,
    unusual_activity: usize,
    dropped: crate::flow::enrich::DropSnapshot,
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();

    let total_trades = snapshot.len();
    let total_premium: f64 = snapshot.iter().map(|f| f.premium).sum();
    let call_sweeps = snapshot
        .iter()
        .filter(|f| f.kind == OptionKind::Call && f.trade_type == TradeType::Sweep)
        .count();
    let put_sweeps = snapshot
        .iter()
        .filter(|f| f.kind == OptionKind::Put && f.trade_type == TradeType::Sweep)
        .count();
    let call_volume: f64 = snapshot
        .iter()
        .filter(|f| f.kind == OptionKind::Call)
        .map(|f| f.volume)
        .sum();
    let put_volume: f64 = snapshot
        .iter()
        .filter(|f| f.kind == OptionKind::Put)
        .map(|f| f.volume)
        .sum();
    let call_put_ratio = if put_volume > 0.0 {
        call_volume / put_volume
    } else {
        call_volume
    };
    let unusual_activity = snapshot.iter().filter(|f| f.high_probability).count();

    Json(StatsResponse {
        success: true,
        total_trades,
        total_premium,
        call_sweeps,
        put_sweeps,
        call_put_ratio,
        call_volume,
        put_volume,
        unusual_activity,
        dropped: state.enricher.drops.snapshot(),
    })
}

// =============================================================================
// GEX
// =============================================================================

async fn gex_surface(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<Json<gex::GexResponse>, ApiError> {
    validate_ticker(&ticker)?;
    let surface = gex::compute_gex(&state, &ticker)
        .await
        .map_err(|e| with_ticker(e.into(), &ticker))?;
    Ok(Json(surface))
}

async fn gex_heatmap(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_ticker(&ticker)?;
    let surface = gex::compute_gex(&state, &ticker)
        .await
        .map_err(|e| with_ticker(e.into(), &ticker))?;

    Ok(Json(json!({
        "success": true,
        "ticker": surface.ticker,
        "spotPrice": surface.spot_price,
        "keyLevels": surface.key_levels,
        "heatmap": surface.heatmap,
    })))
}

fn validate_ticker(ticker: &str) -> Result<(), ApiError> {
    let clean = ticker.trim();
    if clean.is_empty() || clean.len() > 10 || !clean.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(ApiError::Validation(format!(
            "invalid ticker '{ticker}': expected 1-10 letters"
        )));
    }
    Ok(())
}

fn with_ticker(err: ApiError, ticker: &str) -> ApiError {
    match err {
        ApiError::NotFound { message, .. } => ApiError::NotFound {
            message,
            ticker: Some(ticker.to_uppercase()),
        },
        other => other,
    }
}

// =============================================================================
// Scanner
// =============================================================================

async fn live_scanner(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScannerQuery>,
) -> Json<ScannerResponse> {
    Json(scanner::scan(&state, &query).await)
}

// =============================================================================
// Options chain pass-through
// =============================================================================

async fn options_chain(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_ticker(&ticker)?;
    let body = state
        .vendor
        .chain_snapshot_raw(&ticker)
        .await
        .map_err(|e| with_ticker(ApiError::Vendor(e), &ticker))?;
    Ok(Json(body))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_validation() {
        assert!(validate_ticker("SPY").is_ok());
        assert!(validate_ticker("brkb").is_ok());
        assert!(validate_ticker("").is_err());
        assert!(validate_ticker("SPY'; DROP").is_err());
        assert!(validate_ticker("TOOLONGTICKER").is_err());
    }

    #[test]
    fn router_builds() {
        let state = Arc::new(AppState::new(crate::config::Config::default()));
        let _router = router(state);
    }
}
