//! # Stake Weight
//!
//! Longer lock-ups earn more: the weight grows linearly from 1x at
//! `min_duration` to `max_weight` at `max_duration`.
//!
//! ```text
//! weight
//!   max_weight ┤                 ●
//!              │             ●
//!              │         ●
//!        SCALE ┤ ●───
//!              └─┬───────────────┬── duration
//!             min_duration   max_duration
//! ```

use crate::constants::SCALE;
use crate::error::{AccrualError, Result};

/// Weight for a lock-up of `duration` seconds, scaled by `SCALE`
///
/// Never returns less than `SCALE`.
pub fn stake_weight(min_duration: u64, max_duration: u64, max_weight: u64, duration: u64) -> Result<u64> {
    if max_duration == min_duration {
        return Ok(SCALE);
    }
    let duration_span = max_duration
        .checked_sub(min_duration)
        .ok_or(AccrualError::InvalidDuration {
            duration,
            min: min_duration,
            max: max_duration,
        })? as u128;
    let exceeding_min = duration.saturating_sub(min_duration) as u128;
    let normalized = exceeding_min
        .checked_mul(SCALE as u128)
        .ok_or(AccrualError::ArithmeticOverflow)?
        / duration_span;
    let weight_diff = max_weight.saturating_sub(SCALE) as u128;

    let bonus = normalized
        .checked_mul(weight_diff)
        .ok_or(AccrualError::ArithmeticOverflow)?
        / SCALE as u128;
    let weight = (SCALE as u128)
        .checked_add(bonus)
        .ok_or(AccrualError::ArithmeticOverflow)?;

    let weight = u64::try_from(weight).map_err(|_| AccrualError::ArithmeticOverflow)?;
    Ok(weight.max(SCALE))
}

/// Effective stake: `amount * weight`, kept at `SCALE` precision
pub fn effective_amount(amount: u64, weight: u64) -> u128 {
    // u64 * u64 always fits in u128
    amount as u128 * weight as u128
}

/// Smallest power-of-ten shift that keeps `max_weight * u64::MAX / SCALE` within u64
///
/// Used to pick the decimals of a pool's receipt token so that the weighted
/// amount of any stake still fits a 64-bit token supply.
pub fn decimals_shift(max_weight: u64, max_shift: u32) -> u32 {
    if max_shift == 0 {
        return 0;
    }
    let weighted_max = max_weight as u128 * u64::MAX as u128 / SCALE as u128;

    let mut shift = 0u32;
    loop {
        let scaled = match 10u128.checked_pow(shift) {
            Some(factor) => weighted_max / factor,
            None => 0,
        };
        if scaled <= u64::MAX as u128 {
            return shift;
        }
        shift += 1;
        if shift == max_shift {
            return max_shift;
        }
    }
}
