// =============================================================================
// Broadcaster — live fan-out of enriched flows to WebSocket subscribers
// =============================================================================
//
// Each connected client owns an unbounded channel; the socket task drains it
// into the wire. Publishing serialises the frame once and walks a cloned
// handle list, so a slow or dead subscriber never blocks the producer —
// failures are logged and the transport layer handles the close.
//
// Subscription semantics: an empty ticker set receives everything (the
// historical default), `*` receives everything, otherwise exact upper-cased
// ticker match.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

use crate::flow::FlowRecord;

struct Subscriber {
    tx: UnboundedSender<String>,
    tickers: HashSet<String>,
}

#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber; returns its handle id and the frame
    /// receiver the socket task drains.
    pub fn register(&self) -> (Uuid, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.lock().insert(
            id,
            Subscriber {
                tx,
                tickers: HashSet::new(),
            },
        );
        info!(subscriber = %id, "live subscriber registered");
        (id, rx)
    }

    /// Drop a subscriber and its subscription set.
    pub fn unregister(&self, id: Uuid) {
        if self.subscribers.lock().remove(&id).is_some() {
            info!(subscriber = %id, "live subscriber removed");
        }
    }

    /// Add a ticker (or `*`) to a subscriber's filter set.
    pub fn subscribe_ticker(&self, id: Uuid, ticker: &str) {
        let mut subs = self.subscribers.lock();
        if let Some(sub) = subs.get_mut(&id) {
            sub.tickers.insert(ticker.trim().to_uppercase());
        }
    }

    /// Remove a ticker from the filter set; also clears any `*` so the
    /// unsubscribe takes effect.
    pub fn unsubscribe_ticker(&self, id: Uuid, ticker: &str) {
        let mut subs = self.subscribers.lock();
        if let Some(sub) = subs.get_mut(&id) {
            sub.tickers.remove(&ticker.trim().to_uppercase());
            sub.tickers.remove("*");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Fan a flow out to every subscriber whose set admits its ticker.
    /// Returns the number of frames handed to the transport.
    pub fn publish(&self, flow: &FlowRecord) -> usize {
        let frame = json!({
            "type": "options-trade",
            "data": flow,
            "timestamp": Utc::now().timestamp_millis(),
        })
        .to_string();

        // Clone the eligible senders so the lock is not held across sends.
        let targets: Vec<(Uuid, UnboundedSender<String>)> = {
            let subs = self.subscribers.lock();
            subs.iter()
                .filter(|(_, sub)| {
                    sub.tickers.is_empty()
                        || sub.tickers.contains("*")
                        || sub.tickers.contains(&flow.ticker)
                })
                .map(|(id, sub)| (*id, sub.tx.clone()))
                .collect()
        };

        let mut sent = 0;
        for (id, tx) in targets {
            if tx.send(frame.clone()).is_err() {
                // The socket task is gone; close handling will unregister.
                debug!(subscriber = %id, "send to closed subscriber channel");
            } else {
                sent += 1;
            }
        }
        sent
    }
}
