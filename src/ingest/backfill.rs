// =============================================================================
// REST Backfill — periodic chain-snapshot ingestion
// =============================================================================
//
// A 10-second cadence (after a 2-second warm-up) walks the hot-ticker set
// through the vendor's cursor-paginated chain snapshot. An atomic in-flight
// guard makes reentry a no-op while a run is active.
//
// Each run:
//   1. Age-sweeps the store when it is past half capacity (unconditionally
//      past 80%).
//   2. Fetches up to 5 pages per ticker (10 when the store is already
//      large), 100 rows each. 429 sleeps 2 s and retries the page once;
//      401 abandons the ticker.
//   3. Enriches and inserts: the first 500 rows synchronously so the
//      caller returns promptly, the remainder in spawned batches of 500.
//
// The backfill runs regardless of market hours — it is the historical
// complement to the live-only WS path.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::flow::enrich::REST_MIN_PREMIUM;
use crate::flow::store::MAX_AGE;
use crate::vendor::VendorError;

/// Warm-up before the first run.
const WARMUP: Duration = Duration::from_secs(2);
/// Cadence between runs.
const INTERVAL: Duration = Duration::from_secs(10);
/// Pause between pages of one ticker.
const INTER_PAGE_DELAY: Duration = Duration::from_millis(75);
/// Back-off after a 429 before retrying the page.
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(2);
/// Rows per page (vendor maximum).
const PAGE_LIMIT: u32 = 100;
/// Page budget per ticker, normally / when the store is already large.
const PAGE_BUDGET: usize = 5;
const PAGE_BUDGET_LARGE: usize = 10;
/// Rows processed synchronously before the rest is handed to tasks.
const SYNC_BATCH: usize = 500;
/// Result cap for a ticker-scoped direct fetch.
const TICKER_FETCH_CAP: usize = 2000;

/// Periodic loop; exits only on cancellation.
pub async fn run_backfill_loop(state: Arc<AppState>, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(WARMUP) => {}
    }

    let mut interval = tokio::time::interval(INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("backfill loop cancelled");
                return;
            }
            _ = interval.tick() => {
                run_once(&state).await;
            }
        }
    }
}

/// One backfill run. Returns the number of flows inserted synchronously;
/// reentry while a run is in flight is a no-op returning 0.
pub async fn run_once(state: &Arc<AppState>) -> usize {
    if state
        .backfill_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("backfill already running — skipping");
        return 0;
    }

    let inserted = run_guarded(state).await;
    state.backfill_running.store(false, Ordering::SeqCst);
    inserted
}

async fn run_guarded(state: &Arc<AppState>) -> usize {
    let size = state.store.len();
    let cap = state.store.capacity();

    if size > cap * 8 / 10 {
        // Past 80%: sweep before fetching, no questions asked.
        state.store.age_sweep(MAX_AGE);
    } else if size > cap / 2 {
        state.store.age_sweep(MAX_AGE);
    }

    let budget = if state.store.len() > cap / 2 {
        PAGE_BUDGET_LARGE
    } else {
        PAGE_BUDGET
    };

    let tickers = state.config.hot_tickers.clone();
    let mut inserted = 0;
    for ticker in &tickers {
        let results = fetch_ticker_pages(state, ticker, budget).await;
        inserted += process_results(state, ticker, results).await;
    }

    info!(inserted, store_size = state.store.len(), "backfill run complete");
    inserted
}

/// Fetch up to `max_pages` snapshot pages for one ticker, following
/// `next_url` cursors (with the API key re-injected by the client).
pub async fn fetch_ticker_pages(
    state: &Arc<AppState>,
    ticker: &str,
    max_pages: usize,
) -> Vec<Value> {
    let mut results = Vec::new();
    let mut cursor: Option<String> = None;
    let mut retried_page = false;
    let mut pages_fetched = 0;

    while pages_fetched < max_pages {
        let fetched = match &cursor {
            None => {
                state
                    .vendor
                    .option_chain_page(ticker, PAGE_LIMIT, None)
                    .await
            }
            Some(next) => state.vendor.follow_cursor(next).await,
        };

        match fetched {
            Ok(page) => {
                retried_page = false;
                pages_fetched += 1;
                results.extend(page.results);
                match page.next_url {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            Err(VendorError::RateLimited) => {
                if retried_page {
                    warn!(ticker, pages_fetched, "repeat 429 — abandoning run for ticker");
                    break;
                }
                debug!(ticker, pages_fetched, "rate limited — retrying page in 2s");
                retried_page = true;
                tokio::time::sleep(RATE_LIMIT_DELAY).await;
                // Loop again with the same cursor.
                continue;
            }
            Err(VendorError::Unauthorized) => {
                warn!(ticker, "vendor 401 — abandoning ticker");
                break;
            }
            Err(e) => {
                warn!(ticker, pages_fetched, error = %e, "snapshot page failed — abandoning ticker");
                break;
            }
        }

        tokio::time::sleep(INTER_PAGE_DELAY).await;
    }

    results
}

/// Enrich and insert fetched rows: first 500 synchronously, the remainder
/// in spawned batches so the caller returns promptly.
pub async fn process_results(
    state: &Arc<AppState>,
    ticker: &str,
    mut results: Vec<Value>,
) -> usize {
    let tail = if results.len() > SYNC_BATCH {
        results.split_off(SYNC_BATCH)
    } else {
        Vec::new()
    };

    let inserted = ingest_batch(state, ticker, &results).await;

    if !tail.is_empty() {
        for chunk in tail.chunks(SYNC_BATCH) {
            let state = state.clone();
            let ticker = ticker.to_string();
            let chunk: Vec<Value> = chunk.to_vec();
            tokio::spawn(async move {
                let n = ingest_batch(&state, &ticker, &chunk).await;
                debug!(ticker = %ticker, inserted = n, "async backfill batch done");
            });
        }
    }

    inserted
}

async fn ingest_batch(state: &Arc<AppState>, ticker: &str, batch: &[Value]) -> usize {
    let mut inserted = 0;
    for raw in batch {
        if let Some(flow) = state
            .enricher
            .enrich_snapshot(raw, Some(ticker), REST_MIN_PREMIUM)
            .await
        {
            state.broadcaster.publish(&flow);
            state.store.insert(flow);
            inserted += 1;
        }
    }
    inserted
}

/// Ticker-scoped direct fetch used by queries that name a ticker: pull up
/// to 2 000 rows for it and ingest them inline before the snapshot is taken.
pub async fn fetch_ticker_flows(state: &Arc<AppState>, ticker: &str) -> usize {
    let max_pages = TICKER_FETCH_CAP / PAGE_LIMIT as usize;
    let mut results = fetch_ticker_pages(state, ticker, max_pages).await;
    results.truncate(TICKER_FETCH_CAP);
    ingest_batch(state, ticker, &results).await
}
