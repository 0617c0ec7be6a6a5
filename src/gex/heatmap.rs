// =============================================================================
// GEX Heatmap — strike × expiration surface assembly
// =============================================================================
//
// Axes: expirations ascending (columns), strikes descending (rows). The
// strike axis can be densified onto a regular 2.50/5.00 grid covering
// [0.2·S, 2·S]; each cell takes the netGEX of the closest real strike
// within $0.50, else stays null.
//
// Flow delta per strike row = last non-null cell − first non-null cell
// across the expiration axis (0 when fewer than two cells are populated).
// =============================================================================

use std::collections::BTreeSet;

use serde::Serialize;

use super::engine::ExpiryGex;

/// Real strikes this close to a grid line fill its cell.
const STRIKE_MATCH_TOLERANCE: f64 = 0.50;
/// Grid step switches from 2.50 to 5.00 at this spot.
const COARSE_GRID_SPOT: f64 = 200.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heatmap {
    /// Ascending expiration dates (columns).
    pub expirations: Vec<String>,
    /// Descending strikes (rows).
    pub strikes: Vec<f64>,
    /// `cells[row][col]` = netGEX, or null when no strike matched.
    pub cells: Vec<Vec<Option<f64>>>,
    /// Per-row net-GEX drift across the expiration axis.
    pub flow_delta: Vec<f64>,
}

/// Assemble the heatmap. `spot` enables grid densification; without it the
/// strike axis is the union of listed strikes.
pub fn assemble(by_expiration: &[ExpiryGex], spot: Option<f64>, densify: bool) -> Heatmap {
    let expirations: Vec<String> = by_expiration
        .iter()
        .map(|e| e.expiration_date.clone())
        .collect();

    let strikes = match (densify, spot) {
        (true, Some(s)) if s > 0.0 => grid_strikes(s),
        _ => union_strikes(by_expiration),
    };

    let cells: Vec<Vec<Option<f64>>> = strikes
        .iter()
        .map(|&row_strike| {
            by_expiration
                .iter()
                .map(|expiry| nearest_net_gex(expiry, row_strike))
                .collect()
        })
        .collect();

    let flow_delta = cells.iter().map(|row| row_flow_delta(row)).collect();

    Heatmap {
        expirations,
        strikes,
        cells,
        flow_delta,
    }
}

/// Regular grid over [0.2·S, 2·S], descending.
fn grid_strikes(spot: f64) -> Vec<f64> {
    let step = if spot < COARSE_GRID_SPOT { 2.5 } else { 5.0 };
    let lo = 0.2 * spot;
    let hi = 2.0 * spot;

    let mut strikes = Vec::new();
    let mut k = (lo / step).ceil() * step;
    while k <= hi {
        strikes.push(k);
        k += step;
    }
    strikes.reverse();
    strikes
}

/// Union of every listed strike, descending.
fn union_strikes(by_expiration: &[ExpiryGex]) -> Vec<f64> {
    let keys: BTreeSet<i64> = by_expiration
        .iter()
        .flat_map(|e| e.strikes.iter().map(|s| (s.strike * 100.0).round() as i64))
        .collect();
    keys.iter().rev().map(|k| *k as f64 / 100.0).collect()
}

/// netGEX of the closest strike in this expiry within the match tolerance.
fn nearest_net_gex(expiry: &ExpiryGex, target: f64) -> Option<f64> {
    expiry
        .strikes
        .iter()
        .map(|s| (s, (s.strike - target).abs()))
        .filter(|(_, d)| *d <= STRIKE_MATCH_TOLERANCE)
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(s, _)| s.net_gex)
}

fn row_flow_delta(row: &[Option<f64>]) -> f64 {
    let populated: Vec<f64> = row.iter().flatten().copied().collect();
    if populated.len() < 2 {
        0.0
    } else {
        populated.last().unwrap() - populated.first().unwrap()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gex::engine::StrikeGex;

    fn expiry(date: &str, strikes: &[(f64, f64)]) -> ExpiryGex {
        ExpiryGex {
            expiration_date: date.to_string(),
            strikes: strikes
                .iter()
                .map(|&(strike, net)| StrikeGex {
                    strike,
                    call_gex: net.max(0.0),
                    put_gex: net.min(0.0),
                    net_gex: net,
                    call_oi: 0.0,
                    put_oi: 0.0,
                })
                .collect(),
            net_gex: strikes.iter().map(|(_, n)| n).sum(),
        }
    }

    #[test]
    fn union_axis_is_descending() {
        let by_exp = vec![
            expiry("2025-12-19", &[(100.0, 1.0), (105.0, 2.0)]),
            expiry("2026-01-16", &[(95.0, 3.0)]),
        ];
        let map = assemble(&by_exp, None, false);
        assert_eq!(map.strikes, vec![105.0, 100.0, 95.0]);
        assert_eq!(map.expirations, vec!["2025-12-19", "2026-01-16"]);
    }

    #[test]
    fn cells_match_within_half_dollar() {
        let by_exp = vec![expiry("2025-12-19", &[(100.0, 42.0)])];
        let map = assemble(&by_exp, None, false);
        assert_eq!(map.cells[0][0], Some(42.0));

        // Densified grid: 100 sits on a 2.5 line, so the cell fills; a
        // 2.5-distant line stays null.
        let map = assemble(&by_exp, Some(100.0), true);
        let row_100 = map.strikes.iter().position(|&s| s == 100.0).unwrap();
        let row_975 = map.strikes.iter().position(|&s| s == 97.5).unwrap();
        assert_eq!(map.cells[row_100][0], Some(42.0));
        assert_eq!(map.cells[row_975][0], None);
    }

    #[test]
    fn grid_covers_spot_range() {
        let map = assemble(&[], Some(100.0), true);
        let max = *map.strikes.first().unwrap();
        let min = *map.strikes.last().unwrap();
        assert!(max <= 200.0 && max >= 197.5);
        assert!(min >= 20.0 && min <= 22.5);
        // 2.50 steps under the coarse threshold.
        assert!((map.strikes[0] - map.strikes[1] - 2.5).abs() < 1e-9);

        let coarse = assemble(&[], Some(400.0), true);
        assert!((coarse.strikes[0] - coarse.strikes[1] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn flow_delta_last_minus_first() {
        let by_exp = vec![
            expiry("2025-12-19", &[(100.0, 10.0)]),
            expiry("2026-01-16", &[(100.0, 25.0)]),
            expiry("2026-02-20", &[(100.0, 4.0)]),
        ];
        let map = assemble(&by_exp, None, false);
        assert!((map.flow_delta[0] - (4.0 - 10.0)).abs() < 1e-9);
    }

    #[test]
    fn flow_delta_zero_for_single_cell() {
        let by_exp = vec![expiry("2025-12-19", &[(100.0, 10.0)])];
        let map = assemble(&by_exp, None, false);
        assert_eq!(map.flow_delta[0], 0.0);
    }
}
