//! # Reward Rate Conversion
//!
//! Pools store `reward_amount`: reward (in reward-token raw units, scaled by
//! `SCALE`) credited per stake-token raw unit per period. Operators think in
//! rates: reward tokens per staked token per period.
//!
//! ```text
//! reward_amount = floor(rate * 10^reward_decimals) * 10^(9 - stake_decimals)
//! rate          = reward_amount / 10^(reward_decimals + 9 - stake_decimals)
//! ```
//!
//! Conversion goes through the shortest decimal representation of the rate,
//! so `0.0025` is handled as the decimal `0.0025` and not as its binary
//! approximation. Shifting down floors, which can legitimately yield zero.

use crate::constants::REWARD_AMOUNT_DECIMALS;
use crate::error::{AccrualError, Result};

/// Internal reward amount for a human-readable rate
pub fn reward_amount_from_rate(rate: f64, stake_decimals: u8, reward_decimals: u8) -> Result<u64> {
    let value = to_base_units(rate, reward_decimals)?;
    reward_amount_from_value(value, stake_decimals)
}

/// Shift a reward value already expressed in reward raw units into internal units
pub fn reward_amount_from_value(value: u64, stake_decimals: u8) -> Result<u64> {
    let decimals_diff = REWARD_AMOUNT_DECIMALS as i32 - stake_decimals as i32;
    if decimals_diff == 0 {
        return Ok(value);
    }
    let exponent = decimals_diff.unsigned_abs();
    if decimals_diff > 0 {
        let factor = 10u64
            .checked_pow(exponent)
            .ok_or(AccrualError::ArithmeticOverflow)?;
        value.checked_mul(factor).ok_or(AccrualError::ArithmeticOverflow)
    } else {
        // 10^20 > u64::MAX, anything shifted that far floors to zero
        Ok(match 10u64.checked_pow(exponent) {
            Some(factor) => value / factor,
            None => 0,
        })
    }
}

/// Human-readable rate for an internal reward amount
pub fn reward_rate_from_amount(reward_amount: u64, stake_decimals: u8, reward_decimals: u8) -> Result<f64> {
    let decimals =
        reward_decimals as i32 + REWARD_AMOUNT_DECIMALS as i32 - stake_decimals as i32;
    let digits = reward_amount.to_string();

    let literal = if decimals <= 0 {
        format!("{}{}", digits, "0".repeat(decimals.unsigned_abs() as usize))
    } else {
        let decimals = decimals as usize;
        let padded = format!("{:0>width$}", digits, width = decimals + 1);
        let split = padded.len() - decimals;
        format!("{}.{}", &padded[..split], &padded[split..])
    };

    literal
        .parse::<f64>()
        .map_err(|e| AccrualError::InvalidRate(format!("{}: {}", literal, e)))
}

/// floor(rate * 10^decimals), computed on the decimal digits of `rate`
fn to_base_units(rate: f64, decimals: u8) -> Result<u64> {
    if !rate.is_finite() || rate < 0.0 {
        return Err(AccrualError::InvalidRate(rate.to_string()));
    }
    // Display for f64 never uses exponent notation
    let literal = rate.to_string();
    let (whole, fraction) = literal.split_once('.').unwrap_or((literal.as_str(), ""));

    let decimals = decimals as usize;
    let mut digits = String::with_capacity(whole.len() + decimals);
    digits.push_str(whole);
    digits.extend(fraction.chars().chain(std::iter::repeat('0')).take(decimals));

    let value: u128 = digits
        .parse()
        .map_err(|_| AccrualError::ArithmeticOverflow)?;
    u64::try_from(value).map_err(|_| AccrualError::ArithmeticOverflow)
}
