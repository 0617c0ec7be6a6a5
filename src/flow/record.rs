// =============================================================================
// Flow Record — one enriched trade/contract observation
// =============================================================================
//
// Records are immutable once inserted into the trade store. Field names
// serialise camelCase to match the client contract.
// =============================================================================

use serde::Serialize;

use crate::types::{
    Aggressor, Direction, Moneyness, OptionKind, Sentiment, SideLabel, TradeType,
};

/// Fully populated options-flow record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRecord {
    /// `<occ symbol>-<sequence>`; unique per observation.
    pub id: String,
    pub sequence: u64,

    /// Canonical OCC contract symbol, e.g. `O:SPY251219C00650000`.
    pub symbol: String,
    /// Underlying ticker, upper-cased.
    pub ticker: String,
    pub strike: f64,
    /// Expiration date as `YYYY-MM-DD`.
    pub expiry: String,
    pub kind: OptionKind,

    /// Event time, UTC milliseconds.
    pub timestamp: i64,

    pub price: f64,
    /// Effective trade size in contracts.
    pub size: f64,
    /// price · size · 100.
    pub premium: f64,
    pub volume: f64,
    pub open_interest: f64,
    pub bid: f64,
    pub ask: f64,

    /// Client-formatted implied volatility, e.g. `"34.50%"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,

    pub dte: i64,

    /// Percent out of the money; absent when no spot was available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otm_percent: Option<f64>,
    pub moneyness: Moneyness,
    /// Within 1 % of spot (colour-tagging window, separate from the label).
    pub near_the_money: bool,

    pub side: SideLabel,
    pub aggressor: Aggressor,
    pub sentiment: Sentiment,
    pub trade_type: TradeType,
    pub direction: Direction,

    /// `"Opening"`, `"Closing"`, or `""`.
    pub opening_closing: &'static str,

    /// Setup score in [0, 10].
    pub score: f64,
    pub high_probability: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spot: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<i64>,
}

impl FlowRecord {
    /// Bid/ask spread; zero when either side of the quote is missing.
    pub fn spread(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            self.ask - self.bid
        } else {
            0.0
        }
    }

    /// IV as a fraction, parsed back out of the client string.
    pub fn iv_fraction(&self) -> Option<f64> {
        let s = self.iv.as_deref()?;
        s.trim_end_matches('%').parse::<f64>().ok().map(|p| p / 100.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample(id: &str) -> FlowRecord {
        FlowRecord {
            id: id.to_string(),
            sequence: 1,
            symbol: "O:SPY251219C00650000".into(),
            ticker: "SPY".into(),
            strike: 650.0,
            expiry: "2025-12-19".into(),
            kind: OptionKind::Call,
            timestamp: 1_760_000_000_000,
            price: 2.5,
            size: 40.0,
            premium: 10_000.0,
            volume: 1200.0,
            open_interest: 800.0,
            bid: 2.4,
            ask: 2.6,
            iv: Some("32.00%".into()),
            dte: 30,
            otm_percent: Some(3.2),
            moneyness: Moneyness::Otm,
            near_the_money: false,
            side: SideLabel::AtAsk,
            aggressor: Aggressor::Buyer,
            sentiment: Sentiment::Bull,
            trade_type: TradeType::Sweep,
            direction: Direction::derive(OptionKind::Call, Aggressor::Buyer),
            opening_closing: "Opening",
            score: 7.5,
            high_probability: true,
            spot: Some(630.0),
            exchange: Some(4),
        }
    }

    #[test]
    fn serialises_camel_case() {
        let json = serde_json::to_value(sample("x")).unwrap();
        assert!(json.get("openInterest").is_some());
        assert!(json.get("tradeType").is_some());
        assert!(json.get("highProbability").is_some());
        assert!(json.get("otmPercent").is_some());
        assert_eq!(json["side"], "At Ask");
        assert_eq!(json["sentiment"], "BULL");
        assert_eq!(json["moneyness"], "OTM");
    }

    #[test]
    fn spread_requires_two_sided_quote() {
        let mut f = sample("x");
        assert!((f.spread() - 0.2).abs() < 1e-12);
        f.bid = 0.0;
        assert_eq!(f.spread(), 0.0);
    }

    #[test]
    fn iv_roundtrips_to_fraction() {
        let f = sample("x");
        assert!((f.iv_fraction().unwrap() - 0.32).abs() < 1e-9);
    }
}
