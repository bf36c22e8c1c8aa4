//! # Accrual Core - Duration-Weighted Staking Rewards
//!
//! Fixed-point reward accrual for staking pools whose reward rate and reward
//! period can be changed by the pool authority while positions stay staked.
//!
//! ## Components
//!
//! - **Stake weight**: lock-up duration → multiplier → effective stake
//! - **Rate conversion**: human rate (reward tokens per staked token per period) ↔ internal amount
//! - **Accumulator**: checkpointed, period-granular accrual across rate/period changes
//!
//! ## Units
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  weight            scaled by SCALE            (1x == 1_000_000_000)  │
//! │  effective_amount  amount * weight            (u128)                 │
//! │  reward_amount     reward per stake unit      (scaled by SCALE)      │
//! │  accounted_amount  credited reward            (scaled by 10^9, u128) │
//! │  claimed_amount    paid out reward            (raw token units)      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod accumulator;
pub mod error;
pub mod fee;
pub mod pool;
pub mod rate;
pub mod types;
pub mod weight;

// Re-exports
pub use accumulator::{
    accountable_amount, advance_checkpoint, AccrualMode, AccrualOutcome, AccumulatorState,
    RewardEntry,
};
pub use error::{AccrualError, Result};
pub use fee::{fee_amount, FeeValue};
pub use pool::{LoggedRateChange, RateChange, RateChangeKind, RewardPool, StakeEntry, StakePool};
pub use rate::{reward_amount_from_rate, reward_amount_from_value, reward_rate_from_amount};
pub use types::{AccountId, RateLogKey, RewardEntryKey, RewardPoolId, StakeEntryId, StakePoolId};
pub use weight::{decimals_shift, effective_amount, stake_weight};

/// Fixed-point constants shared by every accrual computation
pub mod constants {
    /// Precision of weights and reward amounts (10^9)
    pub const SCALE: u64 = 1_000_000_000;

    /// Number of decimals carried by `SCALE`
    pub const SCALE_DECIMALS: u32 = 9;

    /// Precision of `accounted_amount` (10^9)
    pub const REWARD_PRECISION: u128 = 1_000_000_000;

    /// Decimals of the internal reward amount relative to the stake token
    pub const REWARD_AMOUNT_DECIMALS: u32 = 9;

    /// Fee denominator, fees are expressed in 1/10_000
    pub const FEE_PRECISION: u64 = 10_000;

    /// Default fund fee: 0.99%
    pub const DEFAULT_FEE: u64 = 99;
}

pub use constants::*;
