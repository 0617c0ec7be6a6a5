// =============================================================================
// Vendor Payload Field Resolvers
// =============================================================================
//
// The feed carries several historical schema variants: the same logical
// field can live in 3–5 places depending on endpoint vintage. Each field is
// resolved through an ordered list of JSON paths — first hit wins — which
// keeps the precedence explicit and testable, instead of chains of null
// coalescing at every call site.
//
// Numbers are tolerated as JSON strings ("1.5") as well as native numbers.
// =============================================================================

use serde_json::Value;

/// Walk a dotted path into `v`.
fn lookup<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = v;
    for key in path {
        cur = cur.get(key)?;
    }
    Some(cur)
}

/// Coerce a JSON value that may be a number or numeric string into `f64`.
pub fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// First path that resolves to a finite number.
pub fn resolve_f64(v: &Value, paths: &[&[&str]]) -> Option<f64> {
    paths
        .iter()
        .filter_map(|p| lookup(v, p))
        .filter_map(as_f64)
        .find(|x| x.is_finite())
}

/// Like [`resolve_f64`], but only accepts strictly positive values.
pub fn resolve_positive_f64(v: &Value, paths: &[&[&str]]) -> Option<f64> {
    paths
        .iter()
        .filter_map(|p| lookup(v, p))
        .filter_map(as_f64)
        .find(|x| x.is_finite() && *x > 0.0)
}

/// First path that resolves to a non-empty string.
pub fn resolve_str<'a>(v: &'a Value, paths: &[&[&str]]) -> Option<&'a str> {
    paths
        .iter()
        .filter_map(|p| lookup(v, p))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_path_wins() {
        let v = json!({ "day": { "volume": 120 }, "volume": 999 });
        let got = resolve_f64(&v, &[&["day", "volume"], &["volume"]]);
        assert_eq!(got, Some(120.0));
    }

    #[test]
    fn falls_through_missing_paths() {
        let v = json!({ "details": { "volume": 7 } });
        let got = resolve_f64(&v, &[&["day", "volume"], &["volume"], &["details", "volume"]]);
        assert_eq!(got, Some(7.0));
    }

    #[test]
    fn numeric_strings_coerce() {
        let v = json!({ "mark": "1.45" });
        assert_eq!(resolve_f64(&v, &[&["mark"]]), Some(1.45));
    }

    #[test]
    fn positive_resolver_skips_zeros() {
        let v = json!({ "last_trade": { "price": 0.0 }, "mark": 1.2 });
        let got = resolve_positive_f64(&v, &[&["last_trade", "price"], &["mark"]]);
        assert_eq!(got, Some(1.2));
    }

    #[test]
    fn string_resolver_skips_empties() {
        let v = json!({ "ticker": "", "details": { "ticker": "O:SPY251219C00650000" } });
        let got = resolve_str(&v, &[&["ticker"], &["details", "ticker"]]);
        assert_eq!(got, Some("O:SPY251219C00650000"));
    }

    #[test]
    fn nothing_resolves_to_none() {
        let v = json!({});
        assert_eq!(resolve_f64(&v, &[&["a"], &["b", "c"]]), None);
        assert_eq!(resolve_str(&v, &[&["a"]]), None);
    }
}
