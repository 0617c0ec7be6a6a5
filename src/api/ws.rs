// =============================================================================
// WebSocket Handler — live options-flow fan-out
// =============================================================================
//
// Clients connect to `/ws` and immediately receive a `connected` frame.
// Control frames (client → server):
//
//   { "type": "subscribe", "channel": "options-flow" }
//   { "type": "subscribe-ticker", "ticker": "<SYMBOL>" | "*" }
//   { "type": "unsubscribe-ticker", "ticker": "<SYMBOL>" }
//
// Unknown types are ignored. Flow frames (`options-trade`) arrive from the
// broadcaster; a fresh connection with an empty subscription set receives
// every flow until it narrows itself down.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Manage one connection: register with the broadcaster, pump broadcast
/// frames out, and process control frames in, until either side closes.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (id, mut frames) = state.broadcaster.register();
    let (mut sender, mut receiver) = socket.split();

    let hello = json!({
        "type": "connected",
        "message": "live options flow stream",
    })
    .to_string();
    if sender.send(Message::Text(hello)).await.is_err() {
        state.broadcaster.unregister(id);
        return;
    }

    loop {
        tokio::select! {
            // ── Broadcast frames out ────────────────────────────────────
            frame = frames.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = sender.send(Message::Text(text)).await {
                            debug!(subscriber = %id, error = %e, "send failed — disconnecting");
                            break;
                        }
                    }
                    None => break, // broadcaster dropped the channel
                }
            }

            // ── Control frames in ───────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ack) = handle_control(&state, id, &text) {
                            if sender.send(Message::Text(ack)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(subscriber = %id, "close frame received");
                        break;
                    }
                    Some(Ok(_)) => {} // binary / pong ignored
                    Some(Err(e)) => {
                        warn!(subscriber = %id, error = %e, "receive error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.broadcaster.unregister(id);
}

/// Process one control frame; returns the acknowledgement to send, if any.
fn handle_control(state: &Arc<AppState>, id: Uuid, text: &str) -> Option<String> {
    let frame: Value = serde_json::from_str(text).ok()?;

    match frame.get("type").and_then(Value::as_str)? {
        "subscribe" => {
            let channel = frame.get("channel").and_then(Value::as_str).unwrap_or("");
            if channel == "options-flow" {
                Some(json!({ "type": "subscribed", "channel": "options-flow" }).to_string())
            } else {
                None
            }
        }
        "subscribe-ticker" => {
            let ticker = frame.get("ticker").and_then(Value::as_str)?.trim();
            if ticker.is_empty() {
                return None;
            }
            state.broadcaster.subscribe_ticker(id, ticker);
            Some(
                json!({ "type": "subscribed-ticker", "ticker": ticker.to_uppercase() })
                    .to_string(),
            )
        }
        "unsubscribe-ticker" => {
            let ticker = frame.get("ticker").and_then(Value::as_str)?.trim();
            if ticker.is_empty() {
                return None;
            }
            state.broadcaster.unsubscribe_ticker(id, ticker);
            Some(
                json!({ "type": "unsubscribed-ticker", "ticker": ticker.to_uppercase() })
                    .to_string(),
            )
        }
        // Unknown control types are ignored.
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default()))
    }

    #[test]
    fn subscribe_channel_acks() {
        let state = state();
        let (id, _rx) = state.broadcaster.register();
        let ack = handle_control(
            &state,
            id,
            r#"{"type":"subscribe","channel":"options-flow"}"#,
        )
        .unwrap();
        let v: Value = serde_json::from_str(&ack).unwrap();
        assert_eq!(v["type"], "subscribed");
    }

    #[test]
    fn subscribe_ticker_acks_uppercase() {
        let state = state();
        let (id, _rx) = state.broadcaster.register();
        let ack = handle_control(
            &state,
            id,
            r#"{"type":"subscribe-ticker","ticker":"aapl"}"#,
        )
        .unwrap();
        let v: Value = serde_json::from_str(&ack).unwrap();
        assert_eq!(v["type"], "subscribed-ticker");
        assert_eq!(v["ticker"], "AAPL");
    }

    #[test]
    fn unsubscribe_ticker_acks() {
        let state = state();
        let (id, _rx) = state.broadcaster.register();
        let ack = handle_control(
            &state,
            id,
            r#"{"type":"unsubscribe-ticker","ticker":"AAPL"}"#,
        )
        .unwrap();
        let v: Value = serde_json::from_str(&ack).unwrap();
        assert_eq!(v["type"], "unsubscribed-ticker");
    }

    #[test]
    fn unknown_and_malformed_frames_are_ignored() {
        let state = state();
        let (id, _rx) = state.broadcaster.register();
        assert!(handle_control(&state, id, r#"{"type":"mystery"}"#).is_none());
        assert!(handle_control(&state, id, "not json").is_none());
        assert!(handle_control(&state, id, r#"{"type":"subscribe-ticker"}"#).is_none());
    }
}
