// =============================================================================
// Live Scanner — watchlist sweep producing alert-grade flows
// =============================================================================
//
// For each watchlist ticker (≤10) the scanner pulls a bounded chain
// snapshot (2 pages × 100), enriches the contracts, applies the request
// filters with leniency rules, classifies a GEX position, and attaches a
// trade plan to every qualifying alert.
//
// GEX position uses a strike-distance proxy (<2% of spot → "at", else
// above/below spot). This approximates the real classifier — which compares
// against the gamma wall — and can diverge from it; the true GEX engine is
// only consulted when the request filters on position and fewer than 50
// alerts exist, bounded by a 500 ms race with a timer.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::flow::enrich::REST_MIN_PREMIUM;
use crate::flow::FlowRecord;
use crate::gex;
use crate::ingest::backfill;
use crate::types::{OptionKind, Sentiment, TradeType};

/// Watchlist cap per request.
const MAX_WATCHLIST: usize = 10;
/// Snapshot pages per ticker.
const PAGES_PER_TICKER: usize = 2;
/// Alert cap per request.
const MAX_ALERTS: usize = 500;
/// Stop consulting the real GEX engine past this many alerts.
const GEX_CHECK_ALERT_CAP: usize = 50;
/// Deadline for one real-GEX consultation.
const GEX_CHECK_TIMEOUT: Duration = Duration::from_millis(500);
/// Strike within this fraction of the reference level counts as "at".
const AT_LEVEL_BAND: f64 = 0.02;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerQuery {
    /// Comma list of tickers; defaults to the hot-ticker set.
    pub watchlist: Option<String>,
    pub min_volume: Option<f64>,
    pub min_premium: Option<f64>,
    pub max_dte: Option<i64>,
    /// "all" | "above" | "at" | "below".
    pub gex_position: Option<String>,
    pub min_score: Option<f64>,
}

impl ScannerQuery {
    fn watchlist(&self, fallback: &[String]) -> Vec<String> {
        let from_param: Vec<String> = self
            .watchlist
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(|t| t.trim().to_uppercase())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let list = if from_param.is_empty() {
            fallback.to_vec()
        } else {
            from_param
        };
        list.into_iter().take(MAX_WATCHLIST).collect()
    }

    fn min_score(&self) -> f64 {
        self.min_score.unwrap_or(7.0)
    }

    fn position_filter(&self) -> Option<String> {
        self.gex_position
            .as_deref()
            .map(str::to_ascii_lowercase)
            .filter(|p| p != "all" && !p.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradePlan {
    pub entry: f64,
    pub stop_loss: f64,
    pub stop_loss_pct: f64,
    pub target1: f64,
    pub target2: f64,
    pub why: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerAlert {
    #[serde(flatten)]
    pub flow: FlowRecord,
    /// "above" | "at" | "below" (relative to spot, or to the gamma wall
    /// when the real engine was consulted).
    pub gex_position: &'static str,
    pub plan: TradePlan,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerResponse {
    pub success: bool,
    pub count: usize,
    pub alerts: Vec<ScannerAlert>,
}

// ---------------------------------------------------------------------------
// Classification & planning
// ---------------------------------------------------------------------------

/// Strike-distance proxy for GEX position.
pub fn classify_position(strike: f64, reference: f64) -> &'static str {
    if reference <= 0.0 {
        return "above";
    }
    let dist = (strike - reference) / reference;
    if dist.abs() < AT_LEVEL_BAND {
        "at"
    } else if dist > 0.0 {
        "above"
    } else {
        "below"
    }
}

/// Stop-loss percent by (kind, GEX position, score).
fn stop_loss_pct(kind: OptionKind, gex_position: &str, score: f64) -> f64 {
    let base = if gex_position == "at" {
        0.20
    } else if score < 6.0 {
        0.30
    } else {
        0.25
    };
    match kind {
        OptionKind::Call => base,
        // Puts get extra room: theta and a pinned tape work against them.
        OptionKind::Put => base + 0.05,
    }
}

/// Profit targets by score tier.
fn targets(entry: f64, score: f64) -> (f64, f64) {
    if score >= 9.0 {
        (entry * 2.0, entry * 3.0)
    } else if score >= 8.0 {
        (entry * 1.5, entry * 2.0)
    } else {
        (entry * 1.25, entry * 1.5)
    }
}

fn build_plan(flow: &FlowRecord, gex_position: &str) -> TradePlan {
    let entry = flow.price;
    let pct = stop_loss_pct(flow.kind, gex_position, flow.score);
    let (target1, target2) = targets(entry, flow.score);

    let mut why = vec![format!("Setup score {:.1}", flow.score)];
    if matches!(flow.trade_type, TradeType::Sweep) {
        why.push("Sweep order flow".to_string());
    }
    if matches!(flow.trade_type, TradeType::Block) {
        why.push("Block print".to_string());
    }
    if flow.volume > flow.open_interest && flow.open_interest > 0.0 {
        why.push("Volume exceeds open interest".to_string());
    }
    if gex_position == "at" {
        why.push("Trading at the gamma wall".to_string());
    }
    if flow.premium >= 100_000.0 {
        why.push(format!("${:.0}K premium", flow.premium / 1000.0));
    }
    if flow.sentiment == Sentiment::Bull {
        why.push("Bullish aggressor".to_string());
    } else if flow.sentiment == Sentiment::Bear {
        why.push("Bearish aggressor".to_string());
    }

    TradePlan {
        entry,
        stop_loss: entry * (1.0 - pct),
        stop_loss_pct: pct * 100.0,
        target1,
        target2,
        why,
    }
}

/// Request filters with the scanner's leniency rules.
fn qualifies(flow: &FlowRecord, query: &ScannerQuery) -> bool {
    let min_volume = query.min_volume.unwrap_or(0.0);
    let volume_ok = flow.volume >= min_volume
        || (flow.volume == 0.0 && flow.open_interest >= 10.0 * min_volume && min_volume > 0.0);
    if !volume_ok {
        return false;
    }

    if flow.premium < query.min_premium.unwrap_or(0.0) {
        return false;
    }

    if flow.dte > query.max_dte.unwrap_or(45) {
        return false;
    }

    // Within one point of the requested score still qualifies.
    flow.score >= query.min_score() - 1.0
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

pub async fn scan(state: &Arc<AppState>, query: &ScannerQuery) -> ScannerResponse {
    let watchlist = query.watchlist(&state.config.hot_tickers);
    let position_filter = query.position_filter();

    let mut alerts: Vec<ScannerAlert> = Vec::new();
    // One real-GEX consultation per ticker, cached for the request.
    let mut walls: HashMap<String, Option<f64>> = HashMap::new();

    for ticker in &watchlist {
        let contracts = backfill::fetch_ticker_pages(state, ticker, PAGES_PER_TICKER).await;
        if contracts.is_empty() {
            continue;
        }

        // Spot for classification: the oracle first, contract metadata as
        // the fallback when the aggs endpoint is down.
        let spot = match state.spot.get(ticker).await {
            Some(s) => Some(s),
            None => gex::engine::resolve_spot(&contracts),
        };

        for raw in &contracts {
            let Some(flow) = state
                .enricher
                .enrich_snapshot(raw, Some(ticker), REST_MIN_PREMIUM)
                .await
            else {
                continue;
            };

            if !qualifies(&flow, query) {
                continue;
            }

            let reference = match spot {
                Some(s) => s,
                None => continue, // no spot, no position — skip the contract
            };
            let mut gex_position = classify_position(flow.strike, reference);

            // Refine against the real gamma wall only when the request
            // actually filters on position and the alert set is still small.
            if position_filter.is_some() && alerts.len() < GEX_CHECK_ALERT_CAP {
                let wall = match walls.get(ticker) {
                    Some(cached) => *cached,
                    None => {
                        let computed =
                            match tokio::time::timeout(GEX_CHECK_TIMEOUT, gex::compute_gex(state, ticker))
                                .await
                            {
                                Ok(Ok(surface)) => surface.key_levels.gamma_wall,
                                Ok(Err(e)) => {
                                    debug!(ticker = %ticker, error = %e, "gex check failed");
                                    None
                                }
                                Err(_) => {
                                    debug!(ticker = %ticker, "gex check timed out");
                                    None
                                }
                            };
                        walls.insert(ticker.clone(), computed);
                        computed
                    }
                };
                if let Some(wall) = wall {
                    gex_position = classify_position(flow.strike, wall);
                }
            }

            if let Some(wanted) = &position_filter {
                if gex_position != wanted {
                    continue;
                }
            }

            let plan = build_plan(&flow, gex_position);
            alerts.push(ScannerAlert {
                flow,
                gex_position,
                plan,
            });
        }
    }

    alerts.sort_by(|a, b| b.flow.score.total_cmp(&a.flow.score));
    alerts.truncate(MAX_ALERTS);

    info!(
        tickers = watchlist.len(),
        alerts = alerts.len(),
        "scanner sweep complete"
    );

    ScannerResponse {
        success: true,
        count: alerts.len(),
        alerts,
    }
}
