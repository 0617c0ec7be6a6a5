// =============================================================================
// OCC Option Symbol Codec
// =============================================================================
//
// Canonical form:  O:<UNDERLYING><YY><MM><DD><C|P><STRIKE*1000, 8 digits>
//
// The trailing 8-digit strike is the anchor: we locate the last 'C' or 'P'
// whose following 8 characters are all digits, read the 6 characters before
// it as the YYMMDD expiration, and everything before that as the underlying
// ticker. Parsing never guesses — any deviation is MalformedSymbol.
// =============================================================================

use chrono::{Datelike, Local, NaiveDate};
use thiserror::Error;

use crate::types::OptionKind;

#[derive(Debug, Error, PartialEq)]
pub enum SymbolError {
    #[error("malformed option symbol: {0}")]
    Malformed(String),
}

/// Immutable contract identity parsed out of an OCC symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSymbol {
    pub underlying: String,
    pub expiration_date: NaiveDate,
    pub kind: OptionKind,
    pub strike: f64,
}

/// Parse an OCC-style option ticker. Accepts an `O:` or `O.` prefix.
pub fn parse(symbol: &str) -> Result<ParsedSymbol, SymbolError> {
    let malformed = || SymbolError::Malformed(symbol.to_string());

    let body = symbol
        .strip_prefix("O:")
        .or_else(|| symbol.strip_prefix("O."))
        .unwrap_or(symbol);

    let bytes = body.as_bytes();
    if bytes.len() < 1 + 6 + 1 + 8 {
        return Err(malformed());
    }

    // Anchor: last C|P followed by exactly 8 digits running to the end.
    let strike_start = bytes.len() - 8;
    if !bytes[strike_start..].iter().all(u8::is_ascii_digit) {
        return Err(malformed());
    }
    let kind = match bytes[strike_start - 1] {
        b'C' => OptionKind::Call,
        b'P' => OptionKind::Put,
        _ => return Err(malformed()),
    };

    let date_start = strike_start - 1 - 6;
    let date_str = &body[date_start..strike_start - 1];
    if !date_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let underlying = &body[..date_start];
    if underlying.is_empty() || !underlying.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(malformed());
    }

    let yy: i32 = date_str[0..2].parse().map_err(|_| malformed())?;
    let mm: u32 = date_str[2..4].parse().map_err(|_| malformed())?;
    let dd: u32 = date_str[4..6].parse().map_err(|_| malformed())?;
    let expiration_date =
        NaiveDate::from_ymd_opt(2000 + yy, mm, dd).ok_or_else(malformed)?;

    let strike_milli: u64 = body[strike_start..].parse().map_err(|_| malformed())?;
    let strike = strike_milli as f64 / 1000.0;
    if strike <= 0.0 {
        return Err(malformed());
    }

    Ok(ParsedSymbol {
        underlying: underlying.to_string(),
        expiration_date,
        kind,
        strike,
    })
}

/// Format a contract identity back into its canonical OCC symbol.
pub fn format(underlying: &str, expiration: NaiveDate, kind: OptionKind, strike: f64) -> String {
    format!(
        "O:{}{:02}{:02}{:02}{}{:08}",
        underlying.to_uppercase(),
        expiration.year() % 100,
        expiration.month(),
        expiration.day(),
        kind.code(),
        (strike * 1000.0).round() as u64
    )
}

/// Days to expiration against local midnight today. Negative means expired.
pub fn days_to_expiration(expiration: NaiveDate) -> i64 {
    dte_from(expiration, Local::now().date_naive())
}

/// Testable core of [`days_to_expiration`].
pub fn dte_from(expiration: NaiveDate, today: NaiveDate) -> i64 {
    (expiration - today).num_days()
}
