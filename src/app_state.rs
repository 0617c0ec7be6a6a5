// =============================================================================
// Central Application State — FlowNexus service container
// =============================================================================
//
// The single owner of every process-scoped service: the bounded trade
// store, the enricher, the spot oracle, the market-status tracker, the
// broadcaster, and the vendor client. Subsystems manage their own interior
// mutability; AppState wires them together and is shared as Arc<AppState>
// across the WS ingest task, the backfill task, and every request handler.
// No hidden globals — everything reachable flows through here.
// =============================================================================

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::flow::{Enricher, SweepDetector, TradeStore};
use crate::market_data::{MarketStatusTracker, SpotOracle};
use crate::vendor::VendorClient;

pub struct AppState {
    pub config: Config,

    pub vendor: Arc<VendorClient>,
    pub store: Arc<TradeStore>,
    pub enricher: Arc<Enricher>,
    pub spot: Arc<SpotOracle>,
    pub market_status: Arc<MarketStatusTracker>,
    pub broadcaster: Arc<Broadcaster>,

    /// Backfill in-flight guard: reentry while a run is active is a no-op.
    pub backfill_running: AtomicBool,

    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let vendor = Arc::new(VendorClient::new(&config.api_key, &config.rest_base));
        let spot = Arc::new(SpotOracle::new(vendor.clone()));
        let enricher = Arc::new(Enricher::new(spot.clone(), Arc::new(SweepDetector::new())));

        Self {
            vendor: vendor.clone(),
            store: Arc::new(TradeStore::new()),
            enricher,
            spot,
            market_status: Arc::new(MarketStatusTracker::new(vendor)),
            broadcaster: Arc::new(Broadcaster::new()),
            backfill_running: AtomicBool::new(false),
            start_time: Instant::now(),
            config,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
