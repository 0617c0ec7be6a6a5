// =============================================================================
// Shared types used across the FlowNexus options-flow engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Contract kind: call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    /// Single-letter code used in OCC symbols.
    pub fn code(&self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }

    /// Parse a vendor `contract_type` string ("call" / "put", any case).
    pub fn from_vendor(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "call" | "c" => Some(Self::Call),
            "put" | "p" => Some(Self::Put),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

/// Which side of the book consumed liquidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggressor {
    Buyer,
    Seller,
    Neutral,
}

/// Directional read of a flow, derived from (kind, aggressor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    #[serde(rename = "BULL")]
    Bull,
    #[serde(rename = "BEAR")]
    Bear,
    #[serde(rename = "NEUTRAL")]
    Neutral,
}

/// Execution-style classification of a print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    Sweep,
    Block,
    Split,
}

impl std::fmt::Display for TradeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sweep => write!(f, "Sweep"),
            Self::Block => write!(f, "Block"),
            Self::Split => write!(f, "Split"),
        }
    }
}

/// Moneyness label. The label flips to ATM within 0.5 % of spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Moneyness {
    #[serde(rename = "ITM")]
    Itm,
    #[serde(rename = "ATM")]
    Atm,
    #[serde(rename = "OTM")]
    Otm,
}

/// Where the trade printed relative to the prevailing quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideLabel {
    #[serde(rename = "Above Ask")]
    AboveAsk,
    #[serde(rename = "At Ask")]
    AtAsk,
    #[serde(rename = "To Ask")]
    ToAsk,
    #[serde(rename = "Mid")]
    Mid,
    #[serde(rename = "To Bid")]
    ToBid,
    #[serde(rename = "At Bid")]
    AtBid,
    #[serde(rename = "Below Bid")]
    BelowBid,
}

impl SideLabel {
    /// Aggressor implied by the label.
    pub fn aggressor(&self) -> Aggressor {
        match self {
            Self::AboveAsk | Self::AtAsk | Self::ToAsk => Aggressor::Buyer,
            Self::BelowBid | Self::AtBid | Self::ToBid => Aggressor::Seller,
            Self::Mid => Aggressor::Neutral,
        }
    }
}

/// Arrow + colour rendered by the front-end next to each flow row.
#[derive(Debug, Clone, Serialize)]
pub struct Direction {
    pub arrow: &'static str,
    pub color: &'static str,
}

impl Direction {
    /// Call+buyer / Put+seller read bullish (up, green); the mirror pair
    /// reads bearish (down, red); neutral prints grey.
    pub fn derive(kind: OptionKind, aggressor: Aggressor) -> Self {
        match (kind, aggressor) {
            (OptionKind::Call, Aggressor::Buyer) | (OptionKind::Put, Aggressor::Seller) => Self {
                arrow: "↑",
                color: "green",
            },
            (OptionKind::Call, Aggressor::Seller) | (OptionKind::Put, Aggressor::Buyer) => Self {
                arrow: "↓",
                color: "red",
            },
            (_, Aggressor::Neutral) => Self {
                arrow: "↑",
                color: "gray",
            },
        }
    }
}

/// Sentiment from the (kind, aggressor) table.
pub fn sentiment_for(kind: OptionKind, aggressor: Aggressor) -> Sentiment {
    match (kind, aggressor) {
        (OptionKind::Call, Aggressor::Buyer) | (OptionKind::Put, Aggressor::Seller) => {
            Sentiment::Bull
        }
        (OptionKind::Call, Aggressor::Seller) | (OptionKind::Put, Aggressor::Buyer) => {
            Sentiment::Bear
        }
        (_, Aggressor::Neutral) => Sentiment::Neutral,
    }
}

/// Current state of the underlying equity market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketStatus {
    Open,
    Closed,
    ExtendedHours,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::ExtendedHours => "extended-hours",
        }
    }

    /// Parse the vendor's `/v1/marketstatus/now` `market` field.
    pub fn from_vendor(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "open" => Self::Open,
            "extended-hours" => Self::ExtendedHours,
            _ => Self::Closed,
        }
    }
}

impl Default for MarketStatus {
    fn default() -> Self {
        Self::Closed
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_table() {
        assert_eq!(
            sentiment_for(OptionKind::Call, Aggressor::Buyer),
            Sentiment::Bull
        );
        assert_eq!(
            sentiment_for(OptionKind::Call, Aggressor::Seller),
            Sentiment::Bear
        );
        assert_eq!(
            sentiment_for(OptionKind::Put, Aggressor::Buyer),
            Sentiment::Bear
        );
        assert_eq!(
            sentiment_for(OptionKind::Put, Aggressor::Seller),
            Sentiment::Bull
        );
        assert_eq!(
            sentiment_for(OptionKind::Put, Aggressor::Neutral),
            Sentiment::Neutral
        );
    }

    #[test]
    fn direction_colours() {
        assert_eq!(Direction::derive(OptionKind::Call, Aggressor::Buyer).color, "green");
        assert_eq!(Direction::derive(OptionKind::Put, Aggressor::Buyer).color, "red");
        assert_eq!(Direction::derive(OptionKind::Put, Aggressor::Seller).color, "green");
        assert_eq!(Direction::derive(OptionKind::Call, Aggressor::Neutral).color, "gray");
    }

    #[test]
    fn side_label_serialises_with_spaces() {
        let json = serde_json::to_string(&SideLabel::AboveAsk).unwrap();
        assert_eq!(json, "\"Above Ask\"");
        let json = serde_json::to_string(&SideLabel::AtBid).unwrap();
        assert_eq!(json, "\"At Bid\"");
    }

    #[test]
    fn market_status_from_vendor() {
        assert_eq!(MarketStatus::from_vendor("open"), MarketStatus::Open);
        assert_eq!(MarketStatus::from_vendor("OPEN"), MarketStatus::Open);
        assert_eq!(
            MarketStatus::from_vendor("extended-hours"),
            MarketStatus::ExtendedHours
        );
        assert_eq!(MarketStatus::from_vendor("closed"), MarketStatus::Closed);
        assert_eq!(MarketStatus::from_vendor("unknown"), MarketStatus::Closed);
    }
}
