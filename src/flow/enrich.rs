// =============================================================================
// Enricher — raw vendor records to fully populated flow records
// =============================================================================
//
// Two inputs feed this pipeline: REST chain-snapshot contracts and live WS
// trade ticks. Either becomes a FlowRecord or is discarded (malformed
// symbol, unusable price, below the per-feed premium floor, expired).
// Discards bump a per-reason counter and never propagate.
//
// Field resolution order is strict — the feed carries several historical
// schema variants — and lives in the ordered path lists below.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::record::FlowRecord;
use super::resolve::{resolve_f64, resolve_positive_f64, resolve_str};
use super::sweep::SweepDetector;
use crate::market_data::SpotOracle;
use crate::pricing;
use crate::symbol;
use crate::types::{sentiment_for, Direction, Moneyness, OptionKind, SideLabel, TradeType};

/// Premium floor for live WS trades.
pub const WS_MIN_PREMIUM: f64 = 10_000.0;
/// Premium floor for REST backfill (everything passes).
pub const REST_MIN_PREMIUM: f64 = 0.0;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A live options trade off the vendor WebSocket (`ev == "O"`).
#[derive(Debug, Clone)]
pub struct TradeTick {
    /// OCC symbol, e.g. `O:SPY251219C00650000`.
    pub symbol: String,
    /// Exchange id (`x`).
    pub exchange: Option<i64>,
    pub price: f64,
    /// Trade size in contracts (`s`).
    pub size: f64,
    /// Event time, ms (`t`).
    pub timestamp_ms: i64,
    /// Quote at trade time (`bp` / `ap`); zero when absent.
    pub bid: f64,
    pub ask: f64,
}

// ---------------------------------------------------------------------------
// Drop accounting
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct DropCounters {
    malformed: AtomicU64,
    bad_price: AtomicU64,
    below_premium: AtomicU64,
    expired: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropSnapshot {
    pub malformed: u64,
    pub bad_price: u64,
    pub below_premium: u64,
    pub expired: u64,
}

impl DropCounters {
    pub fn snapshot(&self) -> DropSnapshot {
        DropSnapshot {
            malformed: self.malformed.load(Ordering::Relaxed),
            bad_price: self.bad_price.load(Ordering::Relaxed),
            below_premium: self.below_premium.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

pub struct Enricher {
    spot: Arc<SpotOracle>,
    sweeps: Arc<SweepDetector>,
    sequence: AtomicU64,
    pub drops: DropCounters,
}

impl Enricher {
    pub fn new(spot: Arc<SpotOracle>, sweeps: Arc<SweepDetector>) -> Self {
        Self {
            spot,
            sweeps,
            sequence: AtomicU64::new(0),
            drops: DropCounters::default(),
        }
    }

    /// Enrich one REST chain-snapshot contract.
    ///
    /// `underlying_override` supplies the ticker when the payload omits
    /// `underlying_asset` (per-ticker endpoints already know it).
    pub async fn enrich_snapshot(
        &self,
        raw: &Value,
        underlying_override: Option<&str>,
        min_premium: f64,
    ) -> Option<FlowRecord> {
        // --- Symbol & contract identity ------------------------------------
        let occ = resolve_str(raw, &[&["details", "ticker"], &["ticker"], &["symbol"]]);
        let parsed = occ.and_then(|s| symbol::parse(s).ok());

        let kind = resolve_str(raw, &[&["details", "contract_type"], &["contract_type"]])
            .and_then(OptionKind::from_vendor)
            .or_else(|| parsed.as_ref().map(|p| p.kind));

        let strike = resolve_positive_f64(
            raw,
            &[&["details", "strike_price"], &["strike_price"], &["strike"]],
        )
        .or_else(|| parsed.as_ref().map(|p| p.strike));

        let expiry = resolve_str(
            raw,
            &[&["details", "expiration_date"], &["expiration_date"]],
        )
        .and_then(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .or_else(|| parsed.as_ref().map(|p| p.expiration_date));

        let underlying = resolve_str(raw, &[&["underlying_asset", "ticker"]])
            .map(str::to_string)
            .or_else(|| underlying_override.map(|s| s.to_uppercase()))
            .or_else(|| parsed.as_ref().map(|p| p.underlying.clone()));

        let (Some(kind), Some(strike), Some(expiry), Some(underlying)) =
            (kind, strike, expiry, underlying)
        else {
            self.drops.malformed.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let dte = symbol::days_to_expiration(expiry);
        if dte < 0 {
            self.drops.expired.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let occ = occ
            .map(str::to_string)
            .unwrap_or_else(|| symbol::format(&underlying, expiry, kind, strike));

        // --- Activity --------------------------------------------------------
        let volume = resolve_f64(
            raw,
            &[
                &["day", "volume"],
                &["volume"],
                &["details", "day", "volume"],
                &["details", "volume"],
            ],
        )
        .unwrap_or(0.0);

        let open_interest = resolve_f64(
            raw,
            &[
                &["open_interest"],
                &["oi"],
                &["details", "open_interest"],
                &["day", "open_interest"],
            ],
        )
        .unwrap_or(0.0);

        // --- Quote & price ---------------------------------------------------
        let bid = resolve_f64(raw, &[&["last_quote", "bid"], &["bid"]]).unwrap_or(0.0);
        let ask = resolve_f64(raw, &[&["last_quote", "ask"], &["ask"]]).unwrap_or(0.0);

        let price = resolve_positive_f64(
            raw,
            &[
                &["last_trade", "price"],
                &["last_quote", "midpoint"],
                &["mark"],
                &["last"],
            ],
        )
        .or_else(|| {
            (bid > 0.0 && ask > 0.0).then_some((bid + ask) / 2.0)
        });

        let Some(price) = price else {
            self.drops.bad_price.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        // --- Spot ------------------------------------------------------------
        let spot = match resolve_positive_f64(raw, &[&["underlying_asset", "price"]]) {
            Some(p) => {
                self.spot.observe(&underlying, p);
                Some(p)
            }
            None => self.spot.get(&underlying).await,
        };

        // --- IV --------------------------------------------------------------
        let iv_fraction = resolve_positive_f64(
            raw,
            &[
                &["greeks", "mid_iv"],
                &["greeks", "iv"],
                &["implied_volatility"],
                &["iv"],
                &["day", "implied_volatility"],
            ],
        )
        .or_else(|| {
            let spot = spot?;
            if dte > 0 {
                pricing::implied_volatility(kind, price, spot, strike, dte as f64 / pricing::DAYS_PER_YEAR)
            } else {
                None
            }
        });

        // --- Size & premium --------------------------------------------------
        let explicit_size = resolve_positive_f64(raw, &[&["last_trade", "size"]]);
        let size = effective_size(explicit_size, volume, open_interest);
        let premium = price * size * 100.0;

        if premium < min_premium {
            self.drops.below_premium.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // --- Event time & exchange ------------------------------------------
        let timestamp = resolve_positive_f64(
            raw,
            &[
                &["last_trade", "sip_timestamp"],
                &["last_trade", "timestamp"],
                &["last_trade", "t"],
            ],
        )
        .map(normalize_ts)
        .unwrap_or_else(|| Utc::now().timestamp_millis());

        let exchange = resolve_f64(raw, &[&["last_trade", "exchange"]]).map(|x| x as i64);

        let ring_hit = exchange.map(|ex| self.sweeps.observe(&occ, ex, timestamp));

        Some(self.assemble(
            occ,
            underlying,
            strike,
            expiry,
            kind,
            dte,
            timestamp,
            price,
            size,
            premium,
            volume,
            open_interest,
            bid,
            ask,
            iv_fraction,
            spot,
            exchange,
            ring_hit,
        ))
    }

    /// Enrich one live WS trade tick. Day volume and OI are unknown on this
    /// path; the trade's own size drives premium.
    pub async fn enrich_ws_trade(&self, tick: &TradeTick, min_premium: f64) -> Option<FlowRecord> {
        let Ok(parsed) = symbol::parse(&tick.symbol) else {
            self.drops.malformed.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let dte = symbol::days_to_expiration(parsed.expiration_date);
        if dte < 0 {
            self.drops.expired.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if tick.price <= 0.0 {
            self.drops.bad_price.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let size = effective_size(Some(tick.size), 0.0, 0.0);
        let premium = tick.price * size * 100.0;
        if premium < min_premium {
            self.drops.below_premium.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let occ = symbol::format(
            &parsed.underlying,
            parsed.expiration_date,
            parsed.kind,
            parsed.strike,
        );

        let spot = self.spot.get(&parsed.underlying).await;

        let iv_fraction = match spot {
            Some(s) if dte > 0 => pricing::implied_volatility(
                parsed.kind,
                tick.price,
                s,
                parsed.strike,
                dte as f64 / pricing::DAYS_PER_YEAR,
            ),
            _ => None,
        };

        let ring_hit = tick
            .exchange
            .map(|ex| self.sweeps.observe(&occ, ex, tick.timestamp_ms));

        Some(self.assemble(
            occ,
            parsed.underlying,
            parsed.strike,
            parsed.expiration_date,
            parsed.kind,
            dte,
            tick.timestamp_ms,
            tick.price,
            size,
            premium,
            0.0,
            0.0,
            tick.bid,
            tick.ask,
            iv_fraction,
            spot,
            tick.exchange,
            ring_hit,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        occ: String,
        underlying: String,
        strike: f64,
        expiry: chrono::NaiveDate,
        kind: OptionKind,
        dte: i64,
        timestamp: i64,
        price: f64,
        size: f64,
        premium: f64,
        volume: f64,
        open_interest: f64,
        bid: f64,
        ask: f64,
        iv_fraction: Option<f64>,
        spot: Option<f64>,
        exchange: Option<i64>,
        ring_hit: Option<bool>,
    ) -> FlowRecord {
        let side = classify_side(price, bid, ask);
        let aggressor = side.aggressor();
        let sentiment = sentiment_for(kind, aggressor);
        let direction = Direction::derive(kind, aggressor);

        // No spot means no OTM%: the label degrades to OTM and the percent
        // stays empty rather than being fabricated from the strike.
        let (otm_pct, moneyness, near) = match spot {
            Some(s) => {
                let pct = otm_percent(kind, strike, s);
                (Some(pct), moneyness_label(pct), near_the_money(strike, s))
            }
            None => (None, Moneyness::Otm, false),
        };

        let trade_type = classify_trade_type(size, premium, ring_hit);
        let opening_closing = opening_closing(volume, open_interest, None);
        let score = setup_score(volume, open_interest, premium, trade_type, side, dte);
        let high_probability = is_high_probability(score, volume, open_interest, premium);

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let record = FlowRecord {
            id: format!("{occ}-{sequence}"),
            sequence,
            symbol: occ,
            ticker: underlying.to_uppercase(),
            strike,
            expiry: expiry.format("%Y-%m-%d").to_string(),
            kind,
            timestamp,
            price,
            size,
            premium,
            volume,
            open_interest,
            bid,
            ask,
            iv: iv_fraction.map(pricing::format_iv),
            dte,
            otm_percent: otm_pct,
            moneyness,
            near_the_money: near,
            side,
            aggressor,
            sentiment,
            trade_type,
            direction,
            opening_closing,
            score,
            high_probability,
            spot,
            exchange,
        };
        debug!(id = %record.id, premium, ?trade_type, "flow enriched");
        record
    }
}

// ---------------------------------------------------------------------------
// Classification primitives
// ---------------------------------------------------------------------------

/// Effective contract count backing the premium calculation.
///
/// An explicit trade size always wins. Otherwise day volume stands in; when
/// the day is quiet, 5 % of OI (min 10) proxies typical clip size, and 1 is
/// the sentinel when nothing is known.
pub fn effective_size(explicit: Option<f64>, volume: f64, open_interest: f64) -> f64 {
    if let Some(s) = explicit {
        if s > 0.0 {
            return s;
        }
    }
    if volume > 0.0 {
        volume
    } else if open_interest > 0.0 {
        (0.05 * open_interest).floor().max(10.0)
    } else {
        1.0
    }
}

/// Position of the print relative to the quote.
pub fn classify_side(price: f64, bid: f64, ask: f64) -> SideLabel {
    if bid <= 0.0 || ask <= 0.0 {
        return SideLabel::Mid;
    }

    let mid = (bid + ask) / 2.0;
    let tau = 0.1 * (ask - bid);

    if price > ask {
        SideLabel::AboveAsk
    } else if price >= ask - tau {
        SideLabel::AtAsk
    } else if price < bid {
        SideLabel::BelowBid
    } else if price <= bid + tau {
        SideLabel::AtBid
    } else if price > mid {
        SideLabel::ToAsk
    } else if price < mid {
        SideLabel::ToBid
    } else {
        SideLabel::Mid
    }
}

/// Percent out of the money: positive = OTM, negative = ITM.
pub fn otm_percent(kind: OptionKind, strike: f64, spot: f64) -> f64 {
    let pct = (strike - spot) / spot * 100.0;
    match kind {
        OptionKind::Call => pct,
        OptionKind::Put => -pct,
    }
}

pub fn moneyness_label(otm_pct: f64) -> Moneyness {
    if otm_pct.abs() < 0.5 {
        Moneyness::Atm
    } else if otm_pct > 0.0 {
        Moneyness::Otm
    } else {
        Moneyness::Itm
    }
}

/// Colour-tagging window: strike within 1 % of spot.
pub fn near_the_money(strike: f64, spot: f64) -> bool {
    spot > 0.0 && ((strike - spot) / spot).abs() <= 0.01
}

/// Sweep / Block / Split.
///
/// `ring_hit` is `Some` when exchange and event time were available: the
/// exchange-ring verdict then decides between Sweep and Split, and the
/// numeric heuristic is reserved for records with no exchange context.
pub fn classify_trade_type(size: f64, premium: f64, ring_hit: Option<bool>) -> TradeType {
    if size >= 100.0 && premium >= 50_000.0 {
        return TradeType::Block;
    }

    match ring_hit {
        Some(true) => TradeType::Sweep,
        Some(false) => TradeType::Split,
        None => {
            if size >= 50.0 && premium >= 25_000.0 && (size >= 100.0 || premium >= 50_000.0) {
                TradeType::Sweep
            } else if size >= 200.0 || premium >= 100_000.0 {
                TradeType::Block
            } else if size >= 25.0 && premium >= 10_000.0 {
                TradeType::Sweep
            } else {
                TradeType::Split
            }
        }
    }
}

/// Opening vs closing hint from the volume/OI relationship.
///
/// Division by a zero OI intentionally rides f64 semantics: vol/0 is +inf
/// (opens), 0/0 is NaN (every comparison fails, empty hint).
pub fn opening_closing(volume: f64, open_interest: f64, prev_oi: Option<f64>) -> &'static str {
    if let Some(prev) = prev_oi {
        if volume > prev {
            return "Opening";
        }
        if open_interest < prev && volume > 0.1 * open_interest {
            return "Closing";
        }
        return "";
    }

    let ratio = volume / open_interest;
    if ratio >= 0.5 {
        "Opening"
    } else if volume >= 1000.0 && open_interest < 2.0 * volume {
        "Opening"
    } else if ratio < 0.05 && open_interest >= 1000.0 && volume < 50.0 {
        "Closing"
    } else {
        ""
    }
}

/// Additive setup score, clamped to [0, 10].
pub fn setup_score(
    volume: f64,
    open_interest: f64,
    premium: f64,
    trade_type: TradeType,
    side: SideLabel,
    dte: i64,
) -> f64 {
    let mut score: f64 = 5.0;

    if volume >= 5000.0 {
        score += 2.0;
    } else if volume >= 1000.0 {
        score += 1.0;
    } else if volume < 10.0 {
        score -= 3.0;
    }

    if open_interest < 10.0 {
        score -= 3.0;
    } else if open_interest < 100.0 {
        score -= 1.0;
    } else if open_interest >= 1000.0 {
        score += 1.0;
    }

    if premium >= 1_000_000.0 {
        score += 2.0;
    } else if premium >= 100_000.0 {
        score += 1.0;
    } else if premium < 10_000.0 {
        score -= 1.0;
    }

    if matches!(trade_type, TradeType::Sweep | TradeType::Block) {
        score += 1.0;
    }

    if matches!(side, SideLabel::AboveAsk | SideLabel::AtAsk) {
        score += 1.0;
    }

    if dte == 0 {
        score -= 1.0;
    } else if (30..=60).contains(&dte) {
        score += 1.0;
    }

    score.clamp(0.0, 10.0)
}

pub fn is_high_probability(score: f64, volume: f64, open_interest: f64, premium: f64) -> bool {
    score >= 7.0 && volume >= 100.0 && open_interest >= 100.0 && premium >= 25_000.0
}

/// Normalise a vendor timestamp (ns, ms, or s vintage) to milliseconds.
fn normalize_ts(ts: f64) -> i64 {
    if ts >= 1e15 {
        (ts / 1e6) as i64
    } else if ts >= 1e11 {
        ts as i64
    } else {
        (ts * 1000.0) as i64
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Aggressor;
    use crate::vendor::VendorClient;
    use serde_json::json;

    fn enricher() -> Enricher {
        let client = Arc::new(VendorClient::new("k", "http://127.0.0.1:1"));
        Enricher::new(
            Arc::new(SpotOracle::new(client)),
            Arc::new(SweepDetector::new()),
        )
    }

    fn future_expiry() -> String {
        (Utc::now().date_naive() + chrono::Duration::days(30))
            .format("%Y-%m-%d")
            .to_string()
    }

    // ---- side & sentiment ------------------------------------------------

    #[test]
    fn side_above_ask_put_is_bearish_buyer() {
        // bid 1.00 / ask 1.10, print 1.11 on a put.
        let side = classify_side(1.11, 1.00, 1.10);
        assert_eq!(side, SideLabel::AboveAsk);
        assert_eq!(side.aggressor(), Aggressor::Buyer);
        assert_eq!(
            sentiment_for(OptionKind::Put, side.aggressor()),
            crate::types::Sentiment::Bear
        );
    }

    #[test]
    fn side_bands() {
        // bid 1.00 / ask 1.10: mid 1.05, tau 0.01.
        assert_eq!(classify_side(1.10, 1.00, 1.10), SideLabel::AtAsk);
        assert_eq!(classify_side(1.095, 1.00, 1.10), SideLabel::AtAsk);
        assert_eq!(classify_side(1.07, 1.00, 1.10), SideLabel::ToAsk);
        assert_eq!(classify_side(1.05, 1.00, 1.10), SideLabel::Mid);
        assert_eq!(classify_side(1.03, 1.00, 1.10), SideLabel::ToBid);
        assert_eq!(classify_side(1.005, 1.00, 1.10), SideLabel::AtBid);
        assert_eq!(classify_side(0.99, 1.00, 1.10), SideLabel::BelowBid);
    }

    #[test]
    fn side_without_quote_is_mid() {
        assert_eq!(classify_side(1.0, 0.0, 1.1), SideLabel::Mid);
        assert_eq!(classify_side(1.0, 1.0, 0.0), SideLabel::Mid);
    }

    // ---- moneyness -------------------------------------------------------

    #[test]
    fn otm_percent_signs() {
        // Call strike above spot: OTM positive.
        assert!(otm_percent(OptionKind::Call, 110.0, 100.0) > 0.0);
        // Put strike above spot: ITM negative.
        assert!(otm_percent(OptionKind::Put, 110.0, 100.0) < 0.0);
        assert!(otm_percent(OptionKind::Put, 90.0, 100.0) > 0.0);
    }

    #[test]
    fn moneyness_bands() {
        assert_eq!(moneyness_label(0.4), Moneyness::Atm);
        assert_eq!(moneyness_label(-0.4), Moneyness::Atm);
        assert_eq!(moneyness_label(2.0), Moneyness::Otm);
        assert_eq!(moneyness_label(-2.0), Moneyness::Itm);
    }

    #[test]
    fn near_the_money_window() {
        assert!(near_the_money(100.5, 100.0));
        assert!(!near_the_money(102.0, 100.0));
    }

    // ---- trade type ------------------------------------------------------

    #[test]
    fn block_precedes_ring_check() {
        assert_eq!(
            classify_trade_type(150.0, 60_000.0, Some(true)),
            TradeType::Block
        );
    }

    #[test]
    fn ring_verdict_decides_with_exchange_context() {
        // size 30 / premium 12k: the numeric heuristic would say Sweep, but
        // with exchange context the ring verdict rules.
        assert_eq!(classify_trade_type(30.0, 12_000.0, Some(false)), TradeType::Split);
        assert_eq!(classify_trade_type(30.0, 12_000.0, Some(true)), TradeType::Sweep);
    }

    #[test]
    fn heuristic_without_exchange_context() {
        assert_eq!(classify_trade_type(60.0, 55_000.0, None), TradeType::Sweep);
        assert_eq!(classify_trade_type(210.0, 5_000.0, None), TradeType::Block);
        assert_eq!(classify_trade_type(10.0, 120_000.0, None), TradeType::Block);
        assert_eq!(classify_trade_type(30.0, 12_000.0, None), TradeType::Sweep);
        assert_eq!(classify_trade_type(5.0, 800.0, None), TradeType::Split);
    }

    #[test]
    fn two_tick_sweep_scenario() {
        // Exchange A at t=0, exchange B at t=300ms, size 30, premium $12k.
        let det = SweepDetector::new();
        let first = det.observe("O:X251219C00100000", 1, 0);
        assert_eq!(
            classify_trade_type(30.0, 12_000.0, Some(first)),
            TradeType::Split
        );
        let second = det.observe("O:X251219C00100000", 2, 300);
        assert_eq!(
            classify_trade_type(30.0, 12_000.0, Some(second)),
            TradeType::Sweep
        );
    }

    // ---- opening / closing ----------------------------------------------

    #[test]
    fn opening_closing_unknown_prev() {
        assert_eq!(opening_closing(600.0, 1000.0, None), "Opening"); // ratio 0.6
        assert_eq!(opening_closing(1500.0, 2000.0, None), "Opening"); // high vol
        assert_eq!(opening_closing(20.0, 5000.0, None), "Closing");
        assert_eq!(opening_closing(100.0, 1000.0, None), "");
        // Zero OI with volume: infinite ratio opens; dead contract is empty.
        assert_eq!(opening_closing(50.0, 0.0, None), "Opening");
        assert_eq!(opening_closing(0.0, 0.0, None), "");
    }

    #[test]
    fn opening_closing_known_prev() {
        assert_eq!(opening_closing(1200.0, 900.0, Some(1000.0)), "Opening");
        assert_eq!(opening_closing(200.0, 800.0, Some(1000.0)), "Closing");
        assert_eq!(opening_closing(10.0, 1000.0, Some(1000.0)), "");
    }

    // ---- scoring ---------------------------------------------------------

    #[test]
    fn score_is_clamped() {
        let hi = setup_score(
            10_000.0,
            5000.0,
            2_000_000.0,
            TradeType::Sweep,
            SideLabel::AboveAsk,
            45,
        );
        assert!((hi - 10.0).abs() < 1e-12);

        let lo = setup_score(1.0, 1.0, 500.0, TradeType::Split, SideLabel::Mid, 0);
        assert!((lo - 0.0).abs() < 1e-12);
    }

    #[test]
    fn score_midline_case() {
        // vol 1000 (+1), OI 500 (0), premium 50k (0), Sweep (+1),
        // At Ask (+1), dte 45 (+1) => 9.
        let s = setup_score(1000.0, 500.0, 50_000.0, TradeType::Sweep, SideLabel::AtAsk, 45);
        assert!((s - 9.0).abs() < 1e-12);
    }

    #[test]
    fn high_probability_conjunction() {
        assert!(is_high_probability(7.0, 100.0, 100.0, 25_000.0));
        assert!(!is_high_probability(6.9, 100.0, 100.0, 25_000.0));
        assert!(!is_high_probability(8.0, 99.0, 100.0, 25_000.0));
        assert!(!is_high_probability(8.0, 100.0, 99.0, 25_000.0));
        assert!(!is_high_probability(8.0, 100.0, 100.0, 24_999.0));
    }

    // ---- effective size --------------------------------------------------

    #[test]
    fn effective_size_rules() {
        assert_eq!(effective_size(Some(30.0), 0.0, 0.0), 30.0);
        assert_eq!(effective_size(None, 250.0, 1000.0), 250.0);
        assert_eq!(effective_size(None, 0.0, 1000.0), 50.0); // 5% of OI
        assert_eq!(effective_size(None, 0.0, 50.0), 10.0); // floor
        assert_eq!(effective_size(None, 0.0, 0.0), 1.0); // sentinel
    }

    // ---- timestamp normalisation ----------------------------------------

    #[test]
    fn timestamp_units() {
        assert_eq!(normalize_ts(1.7e18), 1_700_000_000_000); // ns
        assert_eq!(normalize_ts(1.7e12), 1_700_000_000_000); // ms
        assert_eq!(normalize_ts(1.7e9), 1_700_000_000_000); // s
    }

    // ---- snapshot enrichment --------------------------------------------

    #[tokio::test]
    async fn snapshot_record_end_to_end() {
        let e = enricher();
        let raw = json!({
            "details": {
                "ticker": "O:SPY251219C00650000",
                "contract_type": "call",
                "strike_price": 650.0,
                "expiration_date": future_expiry(),
            },
            "day": { "volume": 1200 },
            "open_interest": 800,
            "last_quote": { "bid": 2.40, "ask": 2.60, "midpoint": 2.50 },
            "last_trade": { "price": 2.58, "size": 40, "exchange": 4 },
            "greeks": { "mid_iv": 0.32 },
            "underlying_asset": { "ticker": "SPY", "price": 630.0 }
        });

        let flow = e
            .enrich_snapshot(&raw, None, REST_MIN_PREMIUM)
            .await
            .expect("record should enrich");

        assert_eq!(flow.ticker, "SPY");
        assert_eq!(flow.kind, OptionKind::Call);
        assert!((flow.strike - 650.0).abs() < 1e-9);
        assert!((flow.price - 2.58).abs() < 1e-9);
        assert!((flow.size - 40.0).abs() < 1e-9);
        assert!((flow.premium - 2.58 * 40.0 * 100.0).abs() < 1e-6);
        assert_eq!(flow.iv.as_deref(), Some("32.00%"));
        assert_eq!(flow.side, SideLabel::AtAsk);
        assert_eq!(flow.aggressor, Aggressor::Buyer);
        assert!(flow.otm_percent.is_some());
        assert_eq!(flow.spot, Some(630.0));
        // Invariants that every emitted flow satisfies.
        assert!((0.0..=10.0).contains(&flow.score));
        assert!(flow.dte >= 0);
    }

    #[tokio::test]
    async fn snapshot_without_price_is_dropped() {
        let e = enricher();
        let raw = json!({
            "details": {
                "ticker": "O:SPY251219C00650000",
                "contract_type": "call",
                "strike_price": 650.0,
                "expiration_date": future_expiry(),
            },
            "underlying_asset": { "ticker": "SPY" }
        });
        assert!(e.enrich_snapshot(&raw, None, REST_MIN_PREMIUM).await.is_none());
        assert_eq!(e.drops.snapshot().bad_price, 1);
    }

    #[tokio::test]
    async fn snapshot_with_garbage_symbol_is_dropped() {
        let e = enricher();
        let raw = json!({ "ticker": "garbage", "mark": 1.0 });
        assert!(e.enrich_snapshot(&raw, None, REST_MIN_PREMIUM).await.is_none());
        assert_eq!(e.drops.snapshot().malformed, 1);
    }

    #[tokio::test]
    async fn expired_contract_is_dropped() {
        let e = enricher();
        let raw = json!({
            "details": {
                "ticker": "O:SPY200117C00300000",
                "contract_type": "call",
                "strike_price": 300.0,
                "expiration_date": "2020-01-17",
            },
            "mark": 1.0,
            "underlying_asset": { "ticker": "SPY" }
        });
        assert!(e.enrich_snapshot(&raw, None, REST_MIN_PREMIUM).await.is_none());
        assert_eq!(e.drops.snapshot().expired, 1);
    }

    #[tokio::test]
    async fn ws_trade_respects_premium_floor() {
        let e = enricher();
        let exp = (Utc::now().date_naive() + chrono::Duration::days(10))
            .format("%y%m%d")
            .to_string();
        let tick = TradeTick {
            symbol: format!("O:SPY{exp}C00650000"),
            exchange: Some(4),
            price: 1.0,
            size: 5.0, // premium $500 < $10k floor
            timestamp_ms: Utc::now().timestamp_millis(),
            bid: 0.95,
            ask: 1.05,
        };
        assert!(e.enrich_ws_trade(&tick, WS_MIN_PREMIUM).await.is_none());
        assert_eq!(e.drops.snapshot().below_premium, 1);

        let big = TradeTick { size: 200.0, ..tick };
        let flow = e.enrich_ws_trade(&big, WS_MIN_PREMIUM).await.unwrap();
        assert!((flow.premium - 20_000.0).abs() < 1e-6);
        assert_eq!(flow.volume, 0.0);
    }
}
