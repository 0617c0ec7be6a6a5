// =============================================================================
// Query Engine — filter / sort / paginate the trade store
// =============================================================================
//
// Operational order is fixed: snapshot the store, apply every active
// predicate (AND across filters, OR within list-valued ones), sort the full
// filtered set, then slice the requested page. Sorting never happens under
// the store lock — the caller hands in a detached snapshot.
// =============================================================================

use serde::{Deserialize, Serialize};

use super::record::FlowRecord;
use crate::types::{MarketStatus, Moneyness, OptionKind, Sentiment, SideLabel, TradeType};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// All supported query parameters of `GET /api/options-flow`.
///
/// Everything is optional; list-valued filters arrive comma-separated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowQuery {
    pub ticker: Option<String>,
    pub filter_ticker: Option<String>,

    /// "call" | "put".
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub calls: Option<bool>,
    pub puts: Option<bool>,

    /// Comma list of "Sweep" / "Block" / "Split".
    pub trade_type: Option<String>,
    pub sweeps: Option<bool>,
    pub blocks: Option<bool>,
    pub splits: Option<bool>,

    pub min_premium: Option<f64>,
    pub max_premium: Option<f64>,
    pub min_strike: Option<f64>,
    pub max_strike: Option<f64>,
    pub min_bidask: Option<f64>,
    pub max_bidask: Option<f64>,

    pub itm: Option<bool>,
    pub otm: Option<bool>,
    pub atm: Option<bool>,

    pub above_ask: Option<bool>,
    pub below_bid: Option<bool>,

    pub vol_gt_oi: Option<bool>,

    pub short_expiry: Option<bool>,
    pub leaps: Option<bool>,
    /// Comma list of exact DTE values.
    pub dte: Option<String>,

    /// Comma list of "under25" / "25to75" / "75to150" / "over150".
    pub stock_price: Option<String>,
    /// Comma list of "under1k" / "1kto5k" / "5kto25k" / "over25k".
    pub open_interest: Option<String>,
    pub volume: Option<String>,

    pub min_volume: Option<f64>,
    pub filter_max_dte: Option<f64>,
    pub min_confidence: Option<f64>,

    /// Comma list of underlyings to reject.
    pub exclude_symbols: Option<String>,

    /// "time" (default) | "premium" | "volume" | "confidence" | "iv".
    pub sort: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

fn csv_set(s: &Option<String>) -> Vec<String> {
    s.as_deref()
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn flag(b: Option<bool>) -> bool {
    b == Some(true)
}

impl FlowQuery {
    /// Ticker filter, whichever spelling the client used.
    pub fn effective_ticker(&self) -> Option<String> {
        self.ticker
            .as_deref()
            .or(self.filter_ticker.as_deref())
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
    }

    fn kind_filter(&self) -> Option<OptionKind> {
        if let Some(t) = self.kind.as_deref() {
            return OptionKind::from_vendor(t);
        }
        match (flag(self.calls), flag(self.puts)) {
            (true, false) => Some(OptionKind::Call),
            (false, true) => Some(OptionKind::Put),
            // Both or neither: no constraint.
            _ => None,
        }
    }

    fn trade_type_set(&self) -> Vec<TradeType> {
        let mut set = Vec::new();
        for token in csv_set(&self.trade_type) {
            match token.to_ascii_lowercase().as_str() {
                "sweep" | "sweeps" => set.push(TradeType::Sweep),
                "block" | "blocks" => set.push(TradeType::Block),
                "split" | "splits" => set.push(TradeType::Split),
                _ => {}
            }
        }
        if flag(self.sweeps) {
            set.push(TradeType::Sweep);
        }
        if flag(self.blocks) {
            set.push(TradeType::Block);
        }
        if flag(self.splits) {
            set.push(TradeType::Split);
        }
        set.dedup();
        set
    }

    fn moneyness_set(&self) -> Vec<Moneyness> {
        let mut set = Vec::new();
        if flag(self.itm) {
            set.push(Moneyness::Itm);
        }
        if flag(self.otm) {
            set.push(Moneyness::Otm);
        }
        if flag(self.atm) {
            set.push(Moneyness::Atm);
        }
        set
    }

    /// Evaluate every active predicate against one flow.
    pub fn matches(&self, flow: &FlowRecord) -> bool {
        if let Some(t) = self.effective_ticker() {
            if flow.ticker != t {
                return false;
            }
        }

        if let Some(kind) = self.kind_filter() {
            if flow.kind != kind {
                return false;
            }
        }

        let trade_types = self.trade_type_set();
        if !trade_types.is_empty() && !trade_types.contains(&flow.trade_type) {
            return false;
        }

        if let Some(min) = self.min_premium {
            if flow.premium < min {
                return false;
            }
        }
        if let Some(max) = self.max_premium {
            if flow.premium > max {
                return false;
            }
        }
        if let Some(min) = self.min_strike {
            if flow.strike < min {
                return false;
            }
        }
        if let Some(max) = self.max_strike {
            if flow.strike > max {
                return false;
            }
        }

        let spread = flow.spread();
        if let Some(min) = self.min_bidask {
            if spread < min {
                return false;
            }
        }
        if let Some(max) = self.max_bidask {
            if spread > max {
                return false;
            }
        }

        let moneyness = self.moneyness_set();
        if !moneyness.is_empty() && !moneyness.contains(&flow.moneyness) {
            return false;
        }

        // Side-equality flags form one OR group.
        if flag(self.above_ask) || flag(self.below_bid) {
            let hit = (flag(self.above_ask) && flow.side == SideLabel::AboveAsk)
                || (flag(self.below_bid) && flow.side == SideLabel::BelowBid);
            if !hit {
                return false;
            }
        }

        if flag(self.vol_gt_oi) && flow.volume <= flow.open_interest {
            return false;
        }

        if flag(self.short_expiry) && flow.dte > 30 {
            return false;
        }
        if flag(self.leaps) && flow.dte < 365 {
            return false;
        }

        let dte_set = csv_set(&self.dte);
        if !dte_set.is_empty() {
            let hit = dte_set
                .iter()
                .filter_map(|d| d.parse::<i64>().ok())
                .any(|d| flow.dte == d);
            if !hit {
                return false;
            }
        }

        let price_ranges = csv_set(&self.stock_price);
        if !price_ranges.is_empty() {
            let Some(spot) = flow.spot else { return false };
            let hit = price_ranges.iter().any(|r| match r.as_str() {
                "under25" => spot < 25.0,
                "25to75" => (25.0..=75.0).contains(&spot),
                "75to150" => (75.0..=150.0).contains(&spot),
                "over150" => spot > 150.0,
                _ => false,
            });
            if !hit {
                return false;
            }
        }

        if !band_match(&csv_set(&self.open_interest), flow.open_interest) {
            return false;
        }
        if !band_match(&csv_set(&self.volume), flow.volume) {
            return false;
        }

        if let Some(min) = self.min_volume {
            if flow.volume < min {
                return false;
            }
        }
        if let Some(max) = self.filter_max_dte {
            if flow.dte as f64 > max {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if flow.score < min {
                return false;
            }
        }

        let excluded = csv_set(&self.exclude_symbols);
        if excluded.iter().any(|s| s.to_uppercase() == flow.ticker) {
            return false;
        }

        true
    }
}

/// Activity bands used by both the OI and volume filters.
fn band_match(tokens: &[String], value: f64) -> bool {
    if tokens.is_empty() {
        return true;
    }
    tokens.iter().any(|t| match t.as_str() {
        "under1k" => value < 1000.0,
        "1kto5k" => (1000.0..5000.0).contains(&value),
        "5kto25k" => (5000.0..25_000.0).contains(&value),
        "over25k" => value >= 25_000.0,
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Sorting & pagination
// ---------------------------------------------------------------------------

fn sort_flows(flows: &mut [FlowRecord], key: &str) {
    match key {
        "premium" => flows.sort_by(|a, b| b.premium.total_cmp(&a.premium)),
        "volume" => flows.sort_by(|a, b| b.volume.total_cmp(&a.volume)),
        "confidence" => flows.sort_by(|a, b| b.score.total_cmp(&a.score)),
        "iv" => flows.sort_by(|a, b| {
            let a = a.iv_fraction().unwrap_or(f64::NEG_INFINITY);
            let b = b.iv_fraction().unwrap_or(f64::NEG_INFINITY);
            b.total_cmp(&a)
        }),
        // "time" and anything unrecognised: newest first.
        _ => flows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallSentiment {
    /// "Bullish" | "Bearish" | "Neutral", computed on the returned page.
    pub sentiment: &'static str,
    pub bullish_premium_share: f64,
    pub net_premium: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub success: bool,
    pub count: usize,
    pub total_count: usize,
    pub page: usize,
    pub total_pages: usize,
    pub limit: usize,
    pub flows: Vec<FlowRecord>,
    /// Legacy alias of `flows` kept for older clients.
    pub trades: Vec<FlowRecord>,
    pub store_size: usize,
    pub market_status: MarketStatus,
    pub overall_sentiment: OverallSentiment,
}

/// Run a query against a detached snapshot.
pub fn run_query(
    query: &FlowQuery,
    snapshot: Vec<FlowRecord>,
    store_size: usize,
    market_status: MarketStatus,
) -> QueryResponse {
    let mut filtered: Vec<FlowRecord> = snapshot
        .into_iter()
        .filter(|f| query.matches(f))
        .collect();

    let sort_key = query.sort.as_deref().unwrap_or("time");
    sort_flows(&mut filtered, sort_key);

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let page = query.page.unwrap_or(1).max(1);
    let total_count = filtered.len();
    let total_pages = total_count.div_ceil(limit);

    let offset = (page - 1) * limit;
    let page_flows: Vec<FlowRecord> = filtered
        .into_iter()
        .skip(offset)
        .take(limit)
        .collect();

    let overall_sentiment = page_sentiment(&page_flows);

    QueryResponse {
        success: true,
        count: page_flows.len(),
        total_count,
        page,
        total_pages,
        limit,
        trades: page_flows.clone(),
        flows: page_flows,
        store_size,
        market_status,
        overall_sentiment,
    }
}

fn page_sentiment(flows: &[FlowRecord]) -> OverallSentiment {
    let bullish: f64 = flows
        .iter()
        .filter(|f| f.sentiment == Sentiment::Bull)
        .map(|f| f.premium)
        .sum();
    let bearish: f64 = flows
        .iter()
        .filter(|f| f.sentiment == Sentiment::Bear)
        .map(|f| f.premium)
        .sum();

    let directional = bullish + bearish;
    let share = if directional > 0.0 {
        bullish / directional
    } else {
        0.5
    };

    let sentiment = if directional <= 0.0 {
        "Neutral"
    } else if share > 0.6 {
        "Bullish"
    } else if share < 0.4 {
        "Bearish"
    } else {
        "Neutral"
    };

    OverallSentiment {
        sentiment,
        bullish_premium_share: share,
        net_premium: bullish - bearish,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Aggressor, Direction};

    fn flow(id: u64, ticker: &str, ts: i64) -> FlowRecord {
        FlowRecord {
            id: format!("f{id}"),
            sequence: id,
            symbol: format!("O:{ticker}251219C00650000"),
            ticker: ticker.to_string(),
            strike: 650.0,
            expiry: "2025-12-19".into(),
            kind: OptionKind::Call,
            timestamp: ts,
            price: 2.0,
            size: 50.0,
            premium: 10_000.0,
            volume: 500.0,
            open_interest: 400.0,
            bid: 1.9,
            ask: 2.1,
            iv: Some("30.00%".into()),
            dte: 20,
            otm_percent: Some(2.0),
            moneyness: Moneyness::Otm,
            near_the_money: false,
            side: SideLabel::AtAsk,
            aggressor: Aggressor::Buyer,
            sentiment: Sentiment::Bull,
            trade_type: TradeType::Sweep,
            direction: Direction::derive(OptionKind::Call, Aggressor::Buyer),
            opening_closing: "",
            score: 6.0,
            high_probability: false,
            spot: Some(640.0),
            exchange: None,
        }
    }

    fn q() -> FlowQuery {
        FlowQuery::default()
    }

    // ---- predicates ------------------------------------------------------

    #[test]
    fn ticker_filter_is_case_insensitive() {
        let mut query = q();
        query.ticker = Some("spy".into());
        assert!(query.matches(&flow(1, "SPY", 0)));
        assert!(!query.matches(&flow(2, "QQQ", 0)));
    }

    #[test]
    fn kind_flags() {
        let mut query = q();
        query.puts = Some(true);
        assert!(!query.matches(&flow(1, "SPY", 0)));

        // Both flags set: no constraint.
        query.calls = Some(true);
        assert!(query.matches(&flow(1, "SPY", 0)));
    }

    #[test]
    fn trade_type_multiselect() {
        let mut query = q();
        query.trade_type = Some("Block,Split".into());
        assert!(!query.matches(&flow(1, "SPY", 0))); // it's a Sweep

        query.trade_type = Some("Sweep".into());
        assert!(query.matches(&flow(1, "SPY", 0)));

        let mut query = q();
        query.blocks = Some(true);
        assert!(!query.matches(&flow(1, "SPY", 0)));
    }

    #[test]
    fn numeric_bounds() {
        let mut query = q();
        query.min_premium = Some(10_001.0);
        assert!(!query.matches(&flow(1, "SPY", 0)));
        query.min_premium = Some(10_000.0);
        assert!(query.matches(&flow(1, "SPY", 0)));

        let mut query = q();
        query.min_bidask = Some(0.3);
        assert!(!query.matches(&flow(1, "SPY", 0))); // spread 0.2
        query.min_bidask = None;
        query.max_bidask = Some(0.1);
        assert!(!query.matches(&flow(1, "SPY", 0)));
    }

    #[test]
    fn dte_filters() {
        let mut query = q();
        query.short_expiry = Some(true);
        assert!(query.matches(&flow(1, "SPY", 0))); // dte 20

        query.leaps = Some(true);
        assert!(!query.matches(&flow(1, "SPY", 0)));

        let mut query = q();
        query.dte = Some("5,20".into());
        assert!(query.matches(&flow(1, "SPY", 0)));
        query.dte = Some("5,7".into());
        assert!(!query.matches(&flow(1, "SPY", 0)));
    }

    #[test]
    fn stock_price_bands_require_spot() {
        let mut query = q();
        query.stock_price = Some("over150".into());
        assert!(query.matches(&flow(1, "SPY", 0))); // spot 640

        query.stock_price = Some("under25".into());
        assert!(!query.matches(&flow(1, "SPY", 0)));

        let mut no_spot = flow(1, "SPY", 0);
        no_spot.spot = None;
        assert!(!query.matches(&no_spot));
    }

    #[test]
    fn activity_bands() {
        let mut query = q();
        query.volume = Some("under1k".into());
        assert!(query.matches(&flow(1, "SPY", 0))); // vol 500

        query.volume = Some("over25k".into());
        assert!(!query.matches(&flow(1, "SPY", 0)));

        query.volume = Some("under1k,over25k".into());
        assert!(query.matches(&flow(1, "SPY", 0)));
    }

    #[test]
    fn exclude_symbols() {
        let mut query = q();
        query.exclude_symbols = Some("qqq,spy".into());
        assert!(!query.matches(&flow(1, "SPY", 0)));
        query.exclude_symbols = Some("qqq".into());
        assert!(query.matches(&flow(1, "SPY", 0)));
    }

    #[test]
    fn vol_gt_oi_and_confidence() {
        let mut query = q();
        query.vol_gt_oi = Some(true);
        assert!(query.matches(&flow(1, "SPY", 0))); // 500 > 400

        query.min_confidence = Some(6.5);
        assert!(!query.matches(&flow(1, "SPY", 0))); // score 6.0
    }

    // ---- sort & pagination ----------------------------------------------

    #[test]
    fn pagination_second_page_of_25() {
        // 25 flows, newest has the highest timestamp.
        let snapshot: Vec<FlowRecord> = (0..25).map(|i| flow(i, "SPY", i as i64)).collect();
        let mut query = q();
        query.limit = Some(10);
        query.page = Some(2);

        let resp = run_query(&query, snapshot, 25, MarketStatus::Open);
        assert_eq!(resp.count, 10);
        assert_eq!(resp.total_count, 25);
        assert_eq!(resp.total_pages, 3);
        assert_eq!(resp.limit, 10);
        // Page 2 of time-desc: the 11th..20th newest (ts 14..=5).
        assert_eq!(resp.flows.first().unwrap().timestamp, 14);
        assert_eq!(resp.flows.last().unwrap().timestamp, 5);
    }

    #[test]
    fn sort_keys() {
        let mut a = flow(1, "SPY", 10);
        a.premium = 100.0;
        a.iv = Some("20.00%".into());
        let mut b = flow(2, "SPY", 5);
        b.premium = 900.0;
        b.iv = Some("80.00%".into());

        let mut query = q();
        query.sort = Some("premium".into());
        let resp = run_query(&query, vec![a.clone(), b.clone()], 2, MarketStatus::Open);
        assert_eq!(resp.flows[0].id, "f2");

        query.sort = Some("iv".into());
        let resp = run_query(&query, vec![a.clone(), b.clone()], 2, MarketStatus::Open);
        assert_eq!(resp.flows[0].id, "f2");

        query.sort = None; // time desc
        let resp = run_query(&query, vec![a, b], 2, MarketStatus::Open);
        assert_eq!(resp.flows[0].id, "f1");
    }

    #[test]
    fn query_is_idempotent_on_same_snapshot() {
        let snapshot: Vec<FlowRecord> = (0..10).map(|i| flow(i, "SPY", i as i64)).collect();
        let query = q();
        let a = run_query(&query, snapshot.clone(), 10, MarketStatus::Open);
        let b = run_query(&query, snapshot, 10, MarketStatus::Open);
        let ids_a: Vec<&str> = a.flows.iter().map(|f| f.id.as_str()).collect();
        let ids_b: Vec<&str> = b.flows.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    // ---- sentiment -------------------------------------------------------

    #[test]
    fn page_sentiment_tilts() {
        let mut bull = flow(1, "SPY", 0);
        bull.premium = 90_000.0;
        let mut bear = flow(2, "SPY", 0);
        bear.sentiment = Sentiment::Bear;
        bear.premium = 10_000.0;

        let s = page_sentiment(&[bull.clone(), bear.clone()]);
        assert_eq!(s.sentiment, "Bullish");
        assert!((s.bullish_premium_share - 0.9).abs() < 1e-12);
        assert!((s.net_premium - 80_000.0).abs() < 1e-9);

        bear.premium = 90_000.0;
        bull.premium = 10_000.0;
        let s = page_sentiment(&[bull, bear]);
        assert_eq!(s.sentiment, "Bearish");

        let s = page_sentiment(&[]);
        assert_eq!(s.sentiment, "Neutral");
    }
}
