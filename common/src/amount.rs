// Fixed-point amounts.
//
// All ledger arithmetic runs on u64 minor units at scale 10^8. The
// decimal (18, 8) column shape is a cap: at most 10 integer digits and
// 8 fractional digits. Parsing is strict, a 9th fractional digit is an
// error rather than a rounding site, so addition and subtraction stay
// exact end to end.

use crate::config::{COIN_DECIMALS, COIN_VALUE, MAX_AMOUNT};
use thiserror::Error;

/// Amount in minor units (1 unit = 10^-8 of the currency).
pub type Amount = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("Invalid amount format: {0}")]
    InvalidFormat(String),

    #[error("Too many fractional digits: at most {COIN_DECIMALS} allowed")]
    TooManyDecimals,

    #[error("Amount exceeds the maximum representable value")]
    TooLarge,

    #[error("Amount overflow")]
    Overflow,
}

/// Parse a decimal string into minor units.
///
/// Accepts `"150"`, `"150.75"`, `"0.00000001"`. Rejects signs,
/// exponents, more than 8 fractional digits and anything above the
/// (18, 8) cap.
pub fn parse_amount(input: &str) -> Result<Amount, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::InvalidFormat(input.to_owned()));
    }

    let (integer_part, fraction_part) = match trimmed.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (trimmed, ""),
    };

    if integer_part.is_empty() && fraction_part.is_empty() {
        return Err(AmountError::InvalidFormat(input.to_owned()));
    }
    if !integer_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountError::InvalidFormat(input.to_owned()));
    }
    if !fraction_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountError::InvalidFormat(input.to_owned()));
    }
    if fraction_part.len() > COIN_DECIMALS as usize {
        return Err(AmountError::TooManyDecimals);
    }

    let whole: u64 = if integer_part.is_empty() {
        0
    } else {
        integer_part
            .parse()
            .map_err(|_| AmountError::TooLarge)?
    };

    // Right-pad the fraction to the full scale
    let mut fraction: u64 = 0;
    if !fraction_part.is_empty() {
        fraction = fraction_part
            .parse()
            .map_err(|_| AmountError::InvalidFormat(input.to_owned()))?;
        fraction *= 10u64.pow((COIN_DECIMALS as usize - fraction_part.len()) as u32);
    }

    let units = whole
        .checked_mul(COIN_VALUE)
        .and_then(|w| w.checked_add(fraction))
        .ok_or(AmountError::TooLarge)?;

    if units > MAX_AMOUNT {
        return Err(AmountError::TooLarge);
    }

    Ok(units)
}

/// Render minor units as their decimal projection, trailing zeros
/// trimmed: `15075000000` becomes `"150.75"`, whole values lose the
/// fraction entirely.
pub fn format_amount(amount: Amount) -> String {
    let whole = amount / COIN_VALUE;
    let fraction = amount % COIN_VALUE;
    if fraction == 0 {
        return whole.to_string();
    }

    let digits = format!("{:0width$}", fraction, width = COIN_DECIMALS as usize);
    let digits = digits.trim_end_matches('0');
    format!("{}.{}", whole, digits)
}

/// Addition that treats overflow and the (18, 8) cap as errors.
pub fn checked_add(a: Amount, b: Amount) -> Result<Amount, AmountError> {
    let sum = a.checked_add(b).ok_or(AmountError::Overflow)?;
    if sum > MAX_AMOUNT {
        return Err(AmountError::TooLarge);
    }
    Ok(sum)
}
