// =============================================================================
// Pricing Kernel — Black–Scholes price, Greeks, and IV inversion
// =============================================================================
//
// European options on a non-dividend-paying underlying. The standard-normal
// CDF uses the Abramowitz & Stegun 5-term polynomial approximation (accurate
// to ~7.5e-8, well inside the 1e-4 convergence tolerance of the inverter).
//
//   d1 = (ln(S/K) + (r + σ²/2)·T) / (σ√T)
//   d2 = d1 − σ√T
//
// IV inversion runs Newton–Raphson on σ from an initial guess of 0.30,
// clamping σ to [0.01, 5.0] each step and bailing out when vega underflows.
// =============================================================================

use crate::types::OptionKind;

/// Process-wide risk-free rate.
pub const RISK_FREE_RATE: f64 = 0.045;

/// Civil year fraction denominator.
pub const DAYS_PER_YEAR: f64 = 365.25;

const IV_INITIAL_GUESS: f64 = 0.30;
const IV_MAX_ITERATIONS: usize = 100;
const IV_PRICE_TOLERANCE: f64 = 1e-4;
const IV_VEGA_FLOOR: f64 = 1e-4;
const IV_MIN: f64 = 0.01;
const IV_MAX: f64 = 5.0;

/// Standard-normal PDF.
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Standard-normal CDF — Abramowitz & Stegun formula 26.2.17.
pub fn norm_cdf(x: f64) -> f64 {
    const B1: f64 = 0.319381530;
    const B2: f64 = -0.356563782;
    const B3: f64 = 1.781477937;
    const B4: f64 = -1.821255978;
    const B5: f64 = 1.330274429;
    const P: f64 = 0.2316419;

    let ax = x.abs();
    let t = 1.0 / (1.0 + P * ax);
    let poly = t * (B1 + t * (B2 + t * (B3 + t * (B4 + t * B5))));
    let tail = norm_pdf(ax) * poly;

    if x >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

fn d1(spot: f64, strike: f64, rate: f64, sigma: f64, t: f64) -> f64 {
    ((spot / strike).ln() + (rate + 0.5 * sigma * sigma) * t) / (sigma * t.sqrt())
}

/// Black–Scholes price.
pub fn price(kind: OptionKind, spot: f64, strike: f64, sigma: f64, t: f64) -> f64 {
    if t <= 0.0 || sigma <= 0.0 || spot <= 0.0 || strike <= 0.0 {
        // Degenerate inputs collapse to intrinsic value.
        return match kind {
            OptionKind::Call => (spot - strike).max(0.0),
            OptionKind::Put => (strike - spot).max(0.0),
        };
    }

    let d1 = d1(spot, strike, RISK_FREE_RATE, sigma, t);
    let d2 = d1 - sigma * t.sqrt();
    let discount = (-RISK_FREE_RATE * t).exp();

    match kind {
        OptionKind::Call => spot * norm_cdf(d1) - strike * discount * norm_cdf(d2),
        OptionKind::Put => strike * discount * norm_cdf(-d2) - spot * norm_cdf(-d1),
    }
}

/// Δ — sensitivity of the option price to the underlying.
pub fn delta(kind: OptionKind, spot: f64, strike: f64, sigma: f64, t: f64) -> f64 {
    if t <= 0.0 || sigma <= 0.0 || spot <= 0.0 || strike <= 0.0 {
        return 0.0;
    }
    let d1 = d1(spot, strike, RISK_FREE_RATE, sigma, t);
    match kind {
        OptionKind::Call => norm_cdf(d1),
        OptionKind::Put => norm_cdf(d1) - 1.0,
    }
}

/// Γ — identical for calls and puts.
pub fn gamma(spot: f64, strike: f64, sigma: f64, t: f64) -> f64 {
    if t <= 0.0 || sigma <= 0.0 || spot <= 0.0 || strike <= 0.0 {
        return 0.0;
    }
    let d1 = d1(spot, strike, RISK_FREE_RATE, sigma, t);
    norm_pdf(d1) / (spot * sigma * t.sqrt())
}

/// ν (vega) — sensitivity to volatility, per 1.0 change in σ.
pub fn vega(spot: f64, strike: f64, sigma: f64, t: f64) -> f64 {
    if t <= 0.0 || sigma <= 0.0 || spot <= 0.0 || strike <= 0.0 {
        return 0.0;
    }
    let d1 = d1(spot, strike, RISK_FREE_RATE, sigma, t);
    spot * norm_pdf(d1) * t.sqrt()
}

/// Invert Black–Scholes for σ given an observed market price.
///
/// Returns `None` when the inputs are unusable, vega underflows before
/// convergence, or the converged σ falls outside (0, 5).
pub fn implied_volatility(
    kind: OptionKind,
    market_price: f64,
    spot: f64,
    strike: f64,
    t: f64,
) -> Option<f64> {
    if market_price <= 0.0 || spot <= 0.0 || strike <= 0.0 || t <= 0.0 {
        return None;
    }

    let mut sigma = IV_INITIAL_GUESS;

    for _ in 0..IV_MAX_ITERATIONS {
        let model = price(kind, spot, strike, sigma, t);
        let diff = market_price - model;
        if diff.abs() < IV_PRICE_TOLERANCE {
            break;
        }

        let v = vega(spot, strike, sigma, t);
        if v < IV_VEGA_FLOOR {
            return None;
        }

        sigma = (sigma + diff / v).clamp(IV_MIN, IV_MAX);
    }

    if sigma.is_finite() && sigma > 0.0 && sigma < IV_MAX {
        Some(sigma)
    } else {
        None
    }
}

/// Render an IV for clients: `σ·100` to two decimals with a `%` suffix.
///
/// Vendors disagree on units; values above 1.0 are taken as already-percent
/// and normalised back down before formatting.
pub fn format_iv(iv: f64) -> String {
    let fraction = if iv > 1.0 { iv / 100.0 } else { iv };
    format!("{:.2}%", fraction * 100.0)
}
