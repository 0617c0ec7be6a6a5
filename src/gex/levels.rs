// =============================================================================
// GEX Key Levels — gamma wall, flip point, max pain, support/resistance
// =============================================================================
//
// All functions take per-strike aggregates merged across expirations,
// ordered by ascending strike.
//
// Sign convention (dealer-centric): call GEX positive, put GEX negative.
// =============================================================================

use serde::Serialize;

use super::engine::StrikeGex;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLevels {
    /// Strike with the largest |netGEX|.
    pub gamma_wall: Option<f64>,
    /// Zero crossing of netGEX scanning strikes in ascending order.
    pub gamma_flip_point: Option<f64>,
    pub max_pain: Option<f64>,
    /// Top-3 |netGEX| strikes below spot, strongest first.
    pub support: Vec<f64>,
    /// Top-3 |netGEX| strikes above spot, strongest first.
    pub resistance: Vec<f64>,
}

pub fn key_levels(strikes: &[StrikeGex], spot: f64) -> KeyLevels {
    KeyLevels {
        gamma_wall: gamma_wall(strikes),
        gamma_flip_point: gamma_flip(strikes),
        max_pain: max_pain(strikes),
        support: strongest(strikes, |s| s.strike < spot),
        resistance: strongest(strikes, |s| s.strike > spot),
    }
}

/// Strike with the largest absolute net GEX.
pub fn gamma_wall(strikes: &[StrikeGex]) -> Option<f64> {
    strikes
        .iter()
        .max_by(|a, b| a.net_gex.abs().total_cmp(&b.net_gex.abs()))
        .map(|s| s.strike)
}

/// Top-3 strikes by |netGEX| on one side of spot.
fn strongest(strikes: &[StrikeGex], side: impl Fn(&StrikeGex) -> bool) -> Vec<f64> {
    let mut candidates: Vec<&StrikeGex> = strikes.iter().filter(|s| side(s)).collect();
    candidates.sort_by(|a, b| b.net_gex.abs().total_cmp(&a.net_gex.abs()));
    candidates.iter().take(3).map(|s| s.strike).collect()
}

/// Linear interpolation of the first zero crossing of netGEX in ascending
/// strike order. A strike sitting exactly at zero is the flip itself.
pub fn gamma_flip(strikes: &[StrikeGex]) -> Option<f64> {
    for pair in strikes.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.net_gex == 0.0 {
            return Some(a.strike);
        }
        if a.net_gex.signum() != b.net_gex.signum() {
            let span = b.net_gex - a.net_gex;
            if span == 0.0 {
                return Some(a.strike);
            }
            let t = -a.net_gex / span;
            return Some(a.strike + t * (b.strike - a.strike));
        }
    }
    strikes
        .last()
        .filter(|s| s.net_gex == 0.0)
        .map(|s| s.strike)
}

/// Strike minimising total option-holder payout. Candidates are the listed
/// strikes themselves; ties break to the first seen (ascending order).
pub fn max_pain(strikes: &[StrikeGex]) -> Option<f64> {
    if strikes.is_empty() {
        return None;
    }

    let mut best: Option<(f64, f64)> = None; // (strike, pain)
    for candidate in strikes {
        let k = candidate.strike;
        let mut pain = 0.0;
        for s in strikes {
            pain += (k - s.strike).max(0.0) * s.call_oi;
            pain += (s.strike - k).max(0.0) * s.put_oi;
        }
        match best {
            Some((_, best_pain)) if pain >= best_pain => {}
            _ => best = Some((k, pain)),
        }
    }
    best.map(|(k, _)| k)
}
