//! Exact fixed-point conversion between raw token units and decimal text.

use crate::error::{AppError, AppResult};
use num_bigint::BigUint;

fn scale(decimals: u8) -> BigUint {
    BigUint::from(10u32).pow(u32::from(decimals))
}

/// Render `raw / 10^decimals` with exactly `decimals` fractional digits.
pub fn amount_to_string(raw: u128, decimals: u8) -> String {
    let raw = BigUint::from(raw);
    if decimals == 0 {
        return raw.to_string();
    }
    let scale = scale(decimals);
    let whole = &raw / &scale;
    let frac = &raw % &scale;
    format!("{}.{:0>width$}", whole, frac.to_string(), width = usize::from(decimals))
}

/// Parse decimal text into raw units.
///
/// Digits past `decimals` are accepted only when they are zeros, so the
/// value stays an exact integer number of raw units.
pub fn amount_from_string(text: &str, decimals: u8) -> AppResult<u128> {
    let text = text.trim();
    let invalid = || AppError::invalid_amount(text.to_string());

    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) {
        return Err(invalid());
    }

    let places = usize::from(decimals);
    let frac = if frac.len() > places {
        let (kept, excess) = frac.split_at(places);
        if excess.bytes().any(|b| b != b'0') {
            return Err(AppError::invalid_amount(format!(
                "{} has more than {} decimal places",
                text, decimals
            )));
        }
        kept
    } else {
        frac
    };

    let whole = if whole.is_empty() {
        BigUint::default()
    } else {
        whole.parse::<BigUint>().map_err(|_| invalid())?
    };
    let padded = format!("{:0<width$}", frac, width = places);
    let frac = if padded.is_empty() {
        BigUint::default()
    } else {
        padded.parse::<BigUint>().map_err(|_| invalid())?
    };

    let raw = whole * scale(decimals) + frac;
    u128::try_from(&raw).map_err(|_| AppError::invalid_amount(format!("{} is too large", text)))
}
