// =============================================================================
// Vendor WebSocket Session — live options trade stream
// =============================================================================
//
// Protocol: connect, send `{"action":"auth","params":<key>}`, wait for the
// `auth_success` status event, then subscribe to `O.<TKR>*` for the hot
// ticker set. Trade events carry `ev == "O"` with fields
// `sym, x, p, s, c, t, bp, ap`.
//
// Live ticks are gated on market hours: while the market is closed the
// stream is drained but nothing is ingested (the REST backfill keeps
// running regardless).
//
// One session per call; the caller owns the reconnect loop, so connection
// attempts are naturally serialised.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::flow::enrich::{TradeTick, WS_MIN_PREMIUM};
use crate::types::MarketStatus;

/// Delay between reconnect attempts.
const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// Build the subscription parameter string: `O.SPY*,O.QQQ*,...`.
fn subscription_params(tickers: &[String]) -> String {
    tickers
        .iter()
        .map(|t| format!("O.{}*", t.to_uppercase()))
        .collect::<Vec<_>>()
        .join(",")
}

/// A vendor frame is a JSON array of events (rarely a single object).
fn parse_events(text: &str) -> Vec<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(events)) => events,
        Ok(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    }
}

/// Extract a trade tick from an `ev == "O"` event.
fn trade_from_event(event: &Value) -> Option<TradeTick> {
    let symbol = event.get("sym")?.as_str()?.to_string();
    let price = event.get("p")?.as_f64()?;
    let size = event.get("s")?.as_f64()?;
    let timestamp_ms = event.get("t")?.as_i64()?;

    Some(TradeTick {
        symbol,
        exchange: event.get("x").and_then(Value::as_i64),
        price,
        size,
        timestamp_ms,
        bid: event.get("bp").and_then(Value::as_f64).unwrap_or(0.0),
        ask: event.get("ap").and_then(Value::as_f64).unwrap_or(0.0),
    })
}

/// Run a single WebSocket session until close or error.
pub async fn run_session(state: &Arc<AppState>) -> Result<()> {
    let url = &state.config.ws_url;
    info!(url = %url, "connecting to vendor options stream");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to vendor WebSocket")?;
    let (mut write, mut read) = ws_stream.split();

    // Authenticate first; the subscribe goes out on auth_success.
    let auth = json!({ "action": "auth", "params": state.config.api_key }).to_string();
    write
        .send(Message::Text(auth))
        .await
        .context("failed to send auth frame")?;

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                for event in parse_events(&text) {
                    handle_event(state, &mut write, &event).await?;
                }
            }
            Some(Ok(Message::Ping(data))) => {
                write.send(Message::Pong(data)).await.ok();
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(?frame, "vendor WebSocket closed");
                return Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(error = %e, "vendor WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!("vendor WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

async fn handle_event<S>(state: &Arc<AppState>, write: &mut S, event: &Value) -> Result<()>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    match event.get("ev").and_then(Value::as_str) {
        Some("status") => {
            let status = event.get("status").and_then(Value::as_str).unwrap_or("");
            let message = event.get("message").and_then(Value::as_str).unwrap_or("");
            debug!(status, message, "stream status event");

            if status == "auth_success" {
                let params = subscription_params(&state.config.hot_tickers);
                info!(%params, "authenticated — subscribing to options trades");
                let frame = json!({ "action": "subscribe", "params": params }).to_string();
                write
                    .send(Message::Text(frame))
                    .await
                    .context("failed to send subscribe frame")?;
            } else if status == "auth_failed" {
                anyhow::bail!("vendor rejected WebSocket auth: {message}");
            }
        }
        Some("O") => {
            // Live-only path: drop ticks outside market hours.
            if state.market_status.current().await != MarketStatus::Open {
                return Ok(());
            }

            if let Some(tick) = trade_from_event(event) {
                if let Some(flow) = state.enricher.enrich_ws_trade(&tick, WS_MIN_PREMIUM).await {
                    state.broadcaster.publish(&flow);
                    state.store.insert(flow);
                }
            }
        }
        _ => {} // unknown event codes are ignored
    }
    Ok(())
}

/// Reconnecting session loop; exits only on cancellation.
pub async fn run_stream_loop(state: Arc<AppState>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("stream loop cancelled");
                return;
            }
            result = run_session(&state) => {
                match result {
                    Ok(()) => warn!("stream session ended — reconnecting in 5s"),
                    Err(e) => error!(error = %e, "stream session failed — reconnecting in 5s"),
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}
