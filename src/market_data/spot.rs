// =============================================================================
// Spot Oracle — cached, rate-limited underlying price lookup
// =============================================================================
//
// `get()` answers from a 5-minute TTL cache when it can. Misses funnel
// through a single async gate that spaces vendor calls at least 200 ms
// apart process-wide; concurrent callers queue on the gate and re-check the
// cache once they hold it, so a burst of misses for the same ticker costs
// one upstream call.
//
// 429/401 responses return NotAvailable silently (the rate-limit tracker
// upstream already logged); other failures are counted.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::vendor::{VendorClient, VendorError};

/// Cache entries stay valid this long.
const SPOT_TTL: Duration = Duration::from_secs(300);
/// Minimum spacing between vendor calls, process-wide.
const MIN_INTERVAL: Duration = Duration::from_millis(200);

struct CachedSpot {
    price: f64,
    fetched_at: Instant,
}

#[derive(Default)]
struct Gate {
    last_call: Option<Instant>,
}

/// Cached, throttled lookup of underlying last prices.
pub struct SpotOracle {
    client: Arc<VendorClient>,
    cache: Mutex<HashMap<String, CachedSpot>>,
    gate: tokio::sync::Mutex<Gate>,
    failures: AtomicU64,
}

impl SpotOracle {
    pub fn new(client: Arc<VendorClient>) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
            gate: tokio::sync::Mutex::new(Gate::default()),
            failures: AtomicU64::new(0),
        }
    }

    /// Current spot for `underlying`, or `None` when unavailable.
    ///
    /// Never fabricates a price: callers that receive `None` must skip
    /// spot-derived fields rather than substitute a strike.
    pub async fn get(&self, underlying: &str) -> Option<f64> {
        let key = underlying.to_uppercase();

        if let Some(price) = self.cached(&key) {
            return Some(price);
        }

        let mut gate = self.gate.lock().await;

        // A caller ahead of us may have already filled the cache.
        if let Some(price) = self.cached(&key) {
            return Some(price);
        }

        if let Some(last) = gate.last_call {
            let since = last.elapsed();
            if since < MIN_INTERVAL {
                tokio::time::sleep(MIN_INTERVAL - since).await;
            }
        }
        gate.last_call = Some(Instant::now());

        match self.client.prev_close(&key).await {
            Ok(price) => {
                debug!(underlying = %key, price, "spot fetched");
                self.cache.lock().insert(
                    key,
                    CachedSpot {
                        price,
                        fetched_at: Instant::now(),
                    },
                );
                Some(price)
            }
            // Silent: these are expected under throttling / key problems and
            // the record simply goes out without spot-derived fields.
            Err(VendorError::RateLimited) | Err(VendorError::Unauthorized) => None,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(underlying = %key, error = %e, "spot lookup failed");
                None
            }
        }
    }

    /// Seed the cache from a price observed inside a vendor payload
    /// (e.g. `underlying_asset.price` on a chain snapshot).
    pub fn observe(&self, underlying: &str, price: f64) {
        if price <= 0.0 {
            return;
        }
        self.cache.lock().insert(
            underlying.to_uppercase(),
            CachedSpot {
                price,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Non-blocking cache probe used by synchronous enrichment paths.
    pub fn peek(&self, underlying: &str) -> Option<f64> {
        self.cached(&underlying.to_uppercase())
    }

    /// Total failed vendor lookups (excludes 429/401).
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn cached(&self, key: &str) -> Option<f64> {
        let cache = self.cache.lock();
        cache
            .get(key)
            .filter(|c| c.fetched_at.elapsed() < SPOT_TTL)
            .map(|c| c.price)
    }
}
