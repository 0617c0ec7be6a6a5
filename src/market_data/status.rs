// =============================================================================
// Market Status Tracker — cached session state for the ingest gate
// =============================================================================
//
// The WS ingest path drops ticks while markets are closed and the query
// response reports the session, so this is called on hot paths. The vendor
// answer is cached for 60 s; on failure the last known status is reused.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::types::MarketStatus;
use crate::vendor::VendorClient;

const STATUS_TTL: Duration = Duration::from_secs(60);

struct Cached {
    status: MarketStatus,
    fetched_at: Option<Instant>,
}

pub struct MarketStatusTracker {
    client: Arc<VendorClient>,
    cached: Mutex<Cached>,
}

impl MarketStatusTracker {
    pub fn new(client: Arc<VendorClient>) -> Self {
        Self {
            client,
            cached: Mutex::new(Cached {
                status: MarketStatus::Closed,
                fetched_at: None,
            }),
        }
    }

    /// Current session, refreshed from the vendor at most once per minute.
    pub async fn current(&self) -> MarketStatus {
        {
            let cached = self.cached.lock();
            if let Some(at) = cached.fetched_at {
                if at.elapsed() < STATUS_TTL {
                    return cached.status;
                }
            }
        }

        match self.client.market_status().await {
            Ok(status) => {
                let mut cached = self.cached.lock();
                cached.status = status;
                cached.fetched_at = Some(Instant::now());
                status
            }
            Err(e) => {
                warn!(error = %e, "market status refresh failed — using last known");
                // Stamp the failure too, so a dead vendor is polled once a
                // minute instead of on every tick.
                let mut cached = self.cached.lock();
                cached.fetched_at = Some(Instant::now());
                cached.status
            }
        }
    }

    /// Last known status without touching the vendor.
    pub fn last_known(&self) -> MarketStatus {
        self.cached.lock().status
    }

    /// Test/seed hook: force a status without a vendor round-trip.
    pub fn set(&self, status: MarketStatus) {
        let mut cached = self.cached.lock();
        cached.status = status;
        cached.fetched_at = Some(Instant::now());
    }
}
