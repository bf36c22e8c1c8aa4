//! Fund fees, expressed in 1/`FEE_PRECISION`
//!
//! Every funder pays the configured default fee unless a [`FeeValue`] exists
//! for that funder.

use serde::{Deserialize, Serialize};

use crate::constants::FEE_PRECISION;
use crate::error::{AccrualError, Result};
use crate::types::AccountId;

/// Fee override for one funder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeValue {
    pub target: AccountId,
    /// In 1/`FEE_PRECISION`
    pub fee: u64,
}

impl FeeValue {
    pub fn new(target: AccountId, fee: u64) -> Result<Self> {
        if fee > FEE_PRECISION {
            return Err(AccrualError::InvalidFee(fee));
        }
        Ok(Self { target, fee })
    }
}

/// Fee withheld from `amount` at `fee` / `FEE_PRECISION`
pub fn fee_amount(amount: u64, fee: u64) -> u64 {
    if fee == FEE_PRECISION {
        return amount;
    }
    // fee < FEE_PRECISION is validated by config, result never exceeds amount then
    (amount as u128 * fee as u128 / FEE_PRECISION as u128).min(amount as u128) as u64
}
