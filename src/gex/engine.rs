// =============================================================================
// GEX Engine — on-demand gamma-exposure aggregation
// =============================================================================
//
// Pipeline per request:
//   1. Enumerate available expirations from the reference-contracts listing
//      (≤10 pages) as a coverage check.
//   2. Page the chain snapshot. If the snapshot only ever shows a single
//      expiration while the listing knows more, fall back to per-expiration
//      snapshot calls (≤25 expirations).
//   3. Spot from `underlying_asset.price` of any contract, else the median
//      listed strike.
//   4. Aggregate per expiry × strike. Contracts without a finite
//      `greeks.gamma` or with zero OI are skipped — GEX totals never fall
//      back to IV-derived gamma.
//   5. Key levels, aggregate Greeks, heatmap.
//
// Per-contract problems are swallowed and counted; an empty chain or an
// undeterminable spot is a 404-shaped failure.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::heatmap::{self, Heatmap};
use super::levels::{key_levels, KeyLevels};
use crate::app_state::AppState;
use crate::flow::resolve::{resolve_f64, resolve_positive_f64, resolve_str};
use crate::symbol;
use crate::types::OptionKind;
use crate::vendor::VendorError;

/// Snapshot page budget for a GEX request.
const SNAPSHOT_PAGE_BUDGET: usize = 100;
/// Reference-listing page budget for expiration enumeration.
const REFERENCE_PAGE_BUDGET: usize = 10;
/// Per-expiration fallback cap.
const EXPIRATION_FALLBACK_CAP: usize = 25;

#[derive(Debug, Error)]
pub enum GexError {
    #[error("no options chain available")]
    EmptyChain,
    #[error("spot price could not be determined")]
    NoSpot,
    #[error(transparent)]
    Vendor(#[from] VendorError),
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct StrikeGex {
    pub strike: f64,
    #[serde(rename = "callGEX")]
    pub call_gex: f64,
    #[serde(rename = "putGEX")]
    pub put_gex: f64,
    #[serde(rename = "netGEX")]
    pub net_gex: f64,
    #[serde(rename = "callOI")]
    pub call_oi: f64,
    #[serde(rename = "putOI")]
    pub put_oi: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryGex {
    pub expiration_date: String,
    /// Ascending strike order.
    pub strikes: Vec<StrikeGex>,
    #[serde(rename = "netGEX")]
    pub net_gex: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GexSummary {
    #[serde(rename = "totalCallGEX")]
    pub total_call_gex: f64,
    #[serde(rename = "totalPutGEX")]
    pub total_put_gex: f64,
    #[serde(rename = "totalNetGEX")]
    pub total_net_gex: f64,
    /// Σ delta·OI·100.
    pub total_delta: f64,
    /// Σ gamma·OI·100.
    pub total_gamma: f64,
    pub contracts_used: usize,
    pub contracts_skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GexResponse {
    pub success: bool,
    pub ticker: String,
    pub spot_price: f64,
    pub summary: GexSummary,
    pub by_expiration: Vec<ExpiryGex>,
    pub heatmap: Heatmap,
    pub key_levels: KeyLevels,
}

// ---------------------------------------------------------------------------
// Pure aggregation (testable without a vendor)
// ---------------------------------------------------------------------------

/// Dealer-sign GEX of one contract: γ·OI·100·S², negated for puts.
fn contract_gex(kind: OptionKind, gamma: f64, oi: f64, spot: f64) -> f64 {
    let magnitude = gamma * oi * 100.0 * spot * spot;
    match kind {
        OptionKind::Call => magnitude,
        OptionKind::Put => -magnitude,
    }
}

fn contract_kind(raw: &Value) -> Option<OptionKind> {
    resolve_str(raw, &[&["details", "contract_type"], &["contract_type"]])
        .and_then(OptionKind::from_vendor)
        .or_else(|| {
            resolve_str(raw, &[&["details", "ticker"], &["ticker"]])
                .and_then(|t| symbol::parse(t).ok())
                .map(|p| p.kind)
        })
}

/// Group chain-snapshot contracts into per-expiry, per-strike aggregates.
pub fn aggregate_chain(contracts: &[Value], spot: f64) -> (Vec<ExpiryGex>, GexSummary) {
    // expiry -> strike key (cents) -> aggregate
    let mut groups: BTreeMap<String, BTreeMap<i64, StrikeGex>> = BTreeMap::new();
    let mut summary = GexSummary::default();

    for raw in contracts {
        let Some(kind) = contract_kind(raw) else {
            summary.contracts_skipped += 1;
            continue;
        };
        let Some(strike) =
            resolve_positive_f64(raw, &[&["details", "strike_price"], &["strike_price"]])
        else {
            summary.contracts_skipped += 1;
            continue;
        };
        let Some(expiry) = resolve_str(
            raw,
            &[&["details", "expiration_date"], &["expiration_date"]],
        ) else {
            summary.contracts_skipped += 1;
            continue;
        };

        // Hard rule: vendor gamma or nothing, and OI must be real.
        let gamma = resolve_f64(raw, &[&["greeks", "gamma"]]);
        let oi = resolve_f64(raw, &[&["open_interest"]]).unwrap_or(0.0);
        let (Some(gamma), true) = (gamma.filter(|g| g.is_finite()), oi > 0.0) else {
            summary.contracts_skipped += 1;
            continue;
        };

        let gex = contract_gex(kind, gamma, oi, spot);
        let key = (strike * 100.0).round() as i64;
        let slot = groups
            .entry(expiry.to_string())
            .or_default()
            .entry(key)
            .or_insert_with(|| StrikeGex {
                strike,
                ..StrikeGex::default()
            });

        match kind {
            OptionKind::Call => {
                slot.call_gex += gex;
                slot.call_oi += oi;
            }
            OptionKind::Put => {
                slot.put_gex += gex;
                slot.put_oi += oi;
            }
        }
        slot.net_gex = slot.call_gex + slot.put_gex;

        if let Some(delta) = resolve_f64(raw, &[&["greeks", "delta"]]) {
            summary.total_delta += delta * oi * 100.0;
        }
        summary.total_gamma += gamma * oi * 100.0;
        match kind {
            OptionKind::Call => summary.total_call_gex += gex,
            OptionKind::Put => summary.total_put_gex += gex,
        }
        summary.contracts_used += 1;
    }

    summary.total_net_gex = summary.total_call_gex + summary.total_put_gex;

    let by_expiration: Vec<ExpiryGex> = groups
        .into_iter()
        .map(|(expiration_date, strikes)| {
            let strikes: Vec<StrikeGex> = strikes.into_values().collect();
            let net_gex = strikes.iter().map(|s| s.net_gex).sum();
            ExpiryGex {
                expiration_date,
                strikes,
                net_gex,
            }
        })
        .collect();

    (by_expiration, summary)
}

/// Merge per-expiry aggregates into one ascending per-strike series.
pub fn strike_totals(by_expiration: &[ExpiryGex]) -> Vec<StrikeGex> {
    let mut totals: BTreeMap<i64, StrikeGex> = BTreeMap::new();
    for expiry in by_expiration {
        for s in &expiry.strikes {
            let key = (s.strike * 100.0).round() as i64;
            let slot = totals.entry(key).or_insert_with(|| StrikeGex {
                strike: s.strike,
                ..StrikeGex::default()
            });
            slot.call_gex += s.call_gex;
            slot.put_gex += s.put_gex;
            slot.net_gex += s.net_gex;
            slot.call_oi += s.call_oi;
            slot.put_oi += s.put_oi;
        }
    }
    totals.into_values().collect()
}

/// Spot from contract metadata, else the median listed strike.
pub fn resolve_spot(contracts: &[Value]) -> Option<f64> {
    if let Some(price) = contracts
        .iter()
        .find_map(|c| resolve_positive_f64(c, &[&["underlying_asset", "price"]]))
    {
        return Some(price);
    }

    let mut strikes: Vec<f64> = contracts
        .iter()
        .filter_map(|c| {
            resolve_positive_f64(c, &[&["details", "strike_price"], &["strike_price"]])
        })
        .collect();
    if strikes.is_empty() {
        return None;
    }
    strikes.sort_by(f64::total_cmp);
    Some(strikes[strikes.len() / 2])
}

// ---------------------------------------------------------------------------
// Vendor-facing pipeline
// ---------------------------------------------------------------------------

/// Enumerate available expirations from the reference listing (≤10 pages).
/// Failures degrade to an empty set — enumeration is only a coverage check.
async fn enumerate_expirations(state: &Arc<AppState>, ticker: &str) -> Vec<String> {
    let mut expirations = std::collections::BTreeSet::new();
    let mut cursor: Option<String> = None;

    for _ in 0..REFERENCE_PAGE_BUDGET {
        let page = match state
            .vendor
            .reference_contracts_page(ticker, cursor.as_deref())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                debug!(ticker, error = %e, "expiration enumeration stopped");
                break;
            }
        };

        for contract in &page.results {
            if let Some(date) = resolve_str(contract, &[&["expiration_date"]]) {
                expirations.insert(date.to_string());
            }
        }

        match page.next_url {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    expirations.into_iter().collect()
}

/// Page the chain snapshot, with the backfill's 429 retry-once discipline.
async fn fetch_chain(
    state: &Arc<AppState>,
    ticker: &str,
    expiration: Option<&str>,
    max_pages: usize,
) -> Result<Vec<Value>, VendorError> {
    let mut contracts = Vec::new();
    let mut cursor: Option<String> = None;
    let mut retried = false;
    let mut pages = 0;

    while pages < max_pages {
        let fetched = match &cursor {
            None => state.vendor.option_chain_page(ticker, 100, expiration).await,
            Some(next) => state.vendor.follow_cursor(next).await,
        };

        match fetched {
            Ok(page) => {
                retried = false;
                pages += 1;
                contracts.extend(page.results);
                match page.next_url {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            Err(VendorError::RateLimited) if !retried => {
                retried = true;
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
            Err(e) => {
                if contracts.is_empty() {
                    return Err(e);
                }
                warn!(ticker, error = %e, "chain fetch truncated");
                break;
            }
        }
    }

    Ok(contracts)
}

/// Full GEX surface for one underlying.
pub async fn compute_gex(state: &Arc<AppState>, ticker: &str) -> Result<GexResponse, GexError> {
    let ticker = ticker.to_uppercase();

    let known_expirations = enumerate_expirations(state, &ticker).await;
    let mut contracts = fetch_chain(state, &ticker, None, SNAPSHOT_PAGE_BUDGET).await?;

    // Some vintages of the snapshot endpoint only ever return the front
    // expiration; fall back to explicit per-expiration calls.
    let seen_expirations: std::collections::BTreeSet<String> = contracts
        .iter()
        .filter_map(|c| resolve_str(c, &[&["details", "expiration_date"], &["expiration_date"]]))
        .map(str::to_string)
        .collect();
    if seen_expirations.len() <= 1 && known_expirations.len() > 1 {
        info!(
            ticker = %ticker,
            known = known_expirations.len(),
            "snapshot returned a single expiration — fetching per-expiration"
        );
        for expiration in known_expirations.iter().take(EXPIRATION_FALLBACK_CAP) {
            match fetch_chain(state, &ticker, Some(expiration.as_str()), 3).await {
                Ok(extra) => contracts.extend(extra),
                Err(e) => debug!(ticker = %ticker, expiration, error = %e, "per-expiration fetch failed"),
            }
        }
    }

    if contracts.is_empty() {
        return Err(GexError::EmptyChain);
    }

    let spot = resolve_spot(&contracts).ok_or(GexError::NoSpot)?;
    state.spot.observe(&ticker, spot);

    let (by_expiration, summary) = aggregate_chain(&contracts, spot);
    if summary.contracts_used == 0 {
        return Err(GexError::EmptyChain);
    }

    let totals = strike_totals(&by_expiration);
    let key_levels = key_levels(&totals, spot);
    let heatmap = heatmap::assemble(&by_expiration, Some(spot), true);

    info!(
        ticker = %ticker,
        contracts = summary.contracts_used,
        skipped = summary.contracts_skipped,
        net_gex = summary.total_net_gex,
        "GEX surface computed"
    );

    Ok(GexResponse {
        success: true,
        ticker,
        spot_price: spot,
        summary,
        by_expiration,
        heatmap,
        key_levels,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract(kind: &str, strike: f64, expiry: &str, gamma: f64, oi: f64) -> Value {
        json!({
            "details": {
                "ticker": format!("O:SPY251219{}{:08}", if kind == "call" { "C" } else { "P" }, (strike * 1000.0) as u64),
                "contract_type": kind,
                "strike_price": strike,
                "expiration_date": expiry,
            },
            "greeks": { "gamma": gamma, "delta": if kind == "call" { 0.5 } else { -0.5 } },
            "open_interest": oi,
            "underlying_asset": { "ticker": "SPY", "price": 500.0 }
        })
    }

    #[test]
    fn single_call_gex_magnitude() {
        // γ=0.02, OI=100, S=500 → 0.02·100·100·250000 = 50,000,000.
        let contracts = vec![contract("call", 500.0, "2025-12-19", 0.02, 100.0)];
        let (by_exp, summary) = aggregate_chain(&contracts, 500.0);

        assert_eq!(summary.contracts_used, 1);
        assert!((summary.total_call_gex - 50_000_000.0).abs() < 1e-3);
        assert!((summary.total_net_gex - 50_000_000.0).abs() < 1e-3);
        assert!((by_exp[0].strikes[0].call_gex - 50_000_000.0).abs() < 1e-3);
    }

    #[test]
    fn put_gex_is_negative() {
        let contracts = vec![
            contract("put", 490.0, "2025-12-19", 0.01, 50.0),
            contract("put", 500.0, "2025-12-19", 0.02, 10.0),
        ];
        let (_, summary) = aggregate_chain(&contracts, 500.0);
        assert!(summary.total_put_gex < 0.0);
        assert!(summary.total_net_gex <= 0.0);
        assert_eq!(summary.total_call_gex, 0.0);
    }

    #[test]
    fn all_call_chain_is_nonnegative() {
        let contracts = vec![
            contract("call", 490.0, "2025-12-19", 0.01, 50.0),
            contract("call", 510.0, "2026-01-16", 0.015, 80.0),
        ];
        let (_, summary) = aggregate_chain(&contracts, 500.0);
        assert!(summary.total_net_gex >= 0.0);
    }

    #[test]
    fn missing_gamma_or_zero_oi_is_skipped() {
        let mut no_gamma = contract("call", 500.0, "2025-12-19", 0.0, 100.0);
        no_gamma["greeks"] = json!({});
        let zero_oi = contract("call", 500.0, "2025-12-19", 0.02, 0.0);
        let nan_gamma = {
            let mut c = contract("call", 500.0, "2025-12-19", 0.0, 100.0);
            c["greeks"]["gamma"] = json!("not-a-number");
            c
        };

        let (by_exp, summary) = aggregate_chain(&[no_gamma, zero_oi, nan_gamma], 500.0);
        assert_eq!(summary.contracts_used, 0);
        assert_eq!(summary.contracts_skipped, 3);
        assert!(by_exp.is_empty());
    }

    #[test]
    fn expirations_sort_ascending() {
        let contracts = vec![
            contract("call", 500.0, "2026-01-16", 0.01, 10.0),
            contract("call", 500.0, "2025-12-19", 0.01, 10.0),
        ];
        let (by_exp, _) = aggregate_chain(&contracts, 500.0);
        assert_eq!(by_exp[0].expiration_date, "2025-12-19");
        assert_eq!(by_exp[1].expiration_date, "2026-01-16");
    }

    #[test]
    fn strike_totals_merge_expirations() {
        let contracts = vec![
            contract("call", 500.0, "2025-12-19", 0.01, 10.0),
            contract("call", 500.0, "2026-01-16", 0.01, 10.0),
            contract("put", 490.0, "2025-12-19", 0.01, 10.0),
        ];
        let (by_exp, _) = aggregate_chain(&contracts, 500.0);
        let totals = strike_totals(&by_exp);
        assert_eq!(totals.len(), 2);
        assert!((totals[0].strike - 490.0).abs() < 1e-9);
        // The 500 strike carries both expirations' call GEX.
        let at_500 = &totals[1];
        assert!((at_500.call_gex - 2.0 * 0.01 * 10.0 * 100.0 * 250_000.0).abs() < 1e-3);
    }

    #[test]
    fn spot_resolution_prefers_metadata() {
        let contracts = vec![contract("call", 510.0, "2025-12-19", 0.01, 10.0)];
        assert_eq!(resolve_spot(&contracts), Some(500.0));

        // Strip the metadata: falls back to median strike.
        let bare: Vec<Value> = contracts
            .into_iter()
            .map(|mut c| {
                c.as_object_mut().unwrap().remove("underlying_asset");
                c
            })
            .collect();
        assert_eq!(resolve_spot(&bare), Some(510.0));

        assert_eq!(resolve_spot(&[]), None);
    }

    #[test]
    fn total_delta_weighted_by_oi() {
        let contracts = vec![
            contract("call", 500.0, "2025-12-19", 0.01, 10.0),
            contract("put", 500.0, "2025-12-19", 0.01, 10.0),
        ];
        let (_, summary) = aggregate_chain(&contracts, 500.0);
        // +0.5·10·100 − 0.5·10·100 = 0.
        assert!(summary.total_delta.abs() < 1e-9);
        assert!((summary.total_gamma - 2.0 * 0.01 * 10.0 * 100.0).abs() < 1e-9);
    }
}
