//! # Reward Accumulator
//!
//! Per-position accrual state. Reward is credited in whole periods counted
//! from a checkpoint (`last_accounted_ts`, or the staking time before the
//! first accrual); a partial period is deferred, never lost.
//!
//! ## State machine
//!
//! ```text
//! Uninitialized ──(first claim)──► Active ──(stake closed)──► Closed
//!                                                             │
//!                          accrual horizon frozen at closed_ts┘
//! ```
//!
//! ## Rate changes
//!
//! When the pool rate or period changed since the checkpoint, the interval is
//! split at every change timestamp. Each sub-interval is credited with the
//! values the entry had incorporated so far, then the change is applied:
//!
//! ```text
//!  base          change₁            change₂                horizon
//!   ├──────────────┼──────────────────┼──────────────────────┤
//!   (last values)   (after change₁)     (pool current values)
//! ```
//!
//! [`AccrualMode::EventLog`] replays every logged change; [`AccrualMode::LastUpdate`]
//! only sees the pool's two `last_*` slots and reproduces the original two-step
//! reconciliation, including its loss of overwritten updates.
//!
//! The accumulator never reads the rate log itself. Callers load the changes
//! from the entry's `rate_cursor` up to the pool's `rate_version` and pass them in.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{REWARD_PRECISION, SCALE};
use crate::error::{AccrualError, Result};
use crate::pool::{RateChange, RewardPool, StakeEntry};
use crate::types::{RewardEntryKey, RewardPoolId, StakeEntryId};

/// How pending rate/period changes are reconciled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccrualMode {
    /// Replay every rate change since the entry's cursor
    #[default]
    EventLog,
    /// Reconcile at most one amount and one period update (the pool's `last_*` slots)
    LastUpdate,
}

/// Lifecycle of the accumulator for one (reward pool, stake entry) pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulatorState {
    /// No reward entry yet
    Uninitialized,
    /// Entry exists, stake open
    Active,
    /// Stake closed, accrual frozen at `closed_ts`
    Closed,
}

impl AccumulatorState {
    pub fn of(entry: Option<&RewardEntry>, stake: &StakeEntry) -> Self {
        match entry {
            None => Self::Uninitialized,
            Some(_) if stake.is_closed() => Self::Closed,
            Some(_) => Self::Active,
        }
    }
}

/// Accountable reward (scaled by `REWARD_PRECISION`) for whole periods in `[base, horizon_ts]`
///
/// `base` is `last_accounted_ts` if set, otherwise `staked_ts`.
pub fn accountable_amount(
    staked_ts: u64,
    horizon_ts: u64,
    effective_stake: u128,
    reward_amount: u64,
    reward_period: u64,
    last_accounted_ts: u64,
) -> Result<u128> {
    if reward_period == 0 {
        return Err(AccrualError::InvalidRewardPeriod(reward_period));
    }
    let base = checkpoint_base(staked_ts, last_accounted_ts);
    let elapsed = horizon_ts.saturating_sub(base);
    if elapsed < reward_period {
        return Ok(0);
    }

    let periods = elapsed / reward_period;
    // u64 * u64 always fits in u128
    let credited_per_effective_unit = periods as u128 * reward_amount as u128;
    mul_div_scale(credited_per_effective_unit, effective_stake)
}

/// Checkpoint after crediting whole periods up to `horizon_ts`
///
/// Must use the same `reward_period` as the matching [`accountable_amount`] call.
pub fn advance_checkpoint(
    staked_ts: u64,
    horizon_ts: u64,
    reward_period: u64,
    last_accounted_ts: u64,
) -> Result<u64> {
    if reward_period == 0 {
        return Err(AccrualError::InvalidRewardPeriod(reward_period));
    }
    let base = checkpoint_base(staked_ts, last_accounted_ts);
    let elapsed = horizon_ts.saturating_sub(base);
    let periods = elapsed / reward_period;
    // periods * reward_period <= elapsed, so the sum stays <= horizon_ts
    Ok(base + periods * reward_period)
}

fn checkpoint_base(staked_ts: u64, last_accounted_ts: u64) -> u64 {
    if last_accounted_ts > 0 {
        last_accounted_ts
    } else {
        staked_ts
    }
}

/// floor(a * b / SCALE) without forming the full a * b product
fn mul_div_scale(a: u128, b: u128) -> Result<u128> {
    let scale = SCALE as u128;
    let (quotient, remainder) = (b / scale, b % scale);
    let whole = a
        .checked_mul(quotient)
        .ok_or(AccrualError::ArithmeticOverflow)?;
    let fraction = a
        .checked_mul(remainder)
        .ok_or(AccrualError::ArithmeticOverflow)?
        / scale;
    whole
        .checked_add(fraction)
        .ok_or(AccrualError::ArithmeticOverflow)
}

/// Accrual start for a stake entry in a reward pool
pub fn staked_ts(stake: &StakeEntry, pool: &RewardPool) -> u64 {
    stake.created_ts.max(pool.created_ts)
}

/// Result of advancing an entry to a horizon
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualOutcome {
    /// Reward credited by this call, scaled by `REWARD_PRECISION`
    pub credited: u128,
    /// Number of sub-intervals evaluated (rate changes + final)
    pub segments: usize,
    pub horizon_ts: u64,
    pub last_accounted_ts: u64,
}

/// Accumulator state for one (reward pool, stake entry) pair
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEntry {
    pub reward_pool: RewardPoolId,
    pub stake_entry: StakeEntryId,
    /// All-time credited reward, scaled by `REWARD_PRECISION`
    pub accounted_amount: u128,
    /// All-time paid out reward, raw units
    pub claimed_amount: u64,
    /// 0 until the first whole period is credited
    pub last_accounted_ts: u64,
    /// Reward amount this entry last incorporated
    pub last_reward_amount: u64,
    /// Reward period this entry last incorporated
    pub last_reward_period: u64,
    pub created_ts: u64,
    /// Number of pool rate changes already applied
    #[serde(default)]
    pub rate_cursor: u64,
}

impl RewardEntry {
    /// Fresh entry created at `now`, adopting the rate in effect when staking began
    ///
    /// `log` is the pool's whole rate log; only [`AccrualMode::EventLog`] reads it.
    pub fn new(
        pool: &RewardPool,
        stake: &StakeEntry,
        now: u64,
        mode: AccrualMode,
        log: &[RateChange],
    ) -> Result<Self> {
        if now < stake.created_ts {
            return Err(AccrualError::InvalidRewardEntry {
                entry_created_ts: now,
                stake_created_ts: stake.created_ts,
            });
        }
        let staked_ts = staked_ts(stake, pool);
        let (last_reward_amount, last_reward_period) = match mode {
            AccrualMode::EventLog => pool.rate_at(staked_ts, log),
            AccrualMode::LastUpdate => pool.rate_at(staked_ts, &pool.slot_changes()),
        };
        let rate_cursor = log
            .iter()
            .take_while(|c| c.ts <= staked_ts)
            .count() as u64;

        Ok(Self {
            reward_pool: pool.id,
            stake_entry: stake.id,
            accounted_amount: 0,
            claimed_amount: 0,
            last_accounted_ts: 0,
            last_reward_amount,
            last_reward_period,
            created_ts: now,
            rate_cursor,
        })
    }

    pub fn key(&self) -> RewardEntryKey {
        RewardEntryKey::new(self.reward_pool, self.stake_entry)
    }

    /// Reject entries that claim to predate their stake entry
    pub fn validate(&self, stake: &StakeEntry) -> Result<()> {
        if self.created_ts < stake.created_ts {
            return Err(AccrualError::InvalidRewardEntry {
                entry_created_ts: self.created_ts,
                stake_created_ts: stake.created_ts,
            });
        }
        Ok(())
    }

    /// Advance this entry to `stake.horizon(now)`, crediting every whole period
    ///
    /// `pending` holds the logged changes from `rate_cursor` on; ignored in
    /// [`AccrualMode::LastUpdate`].
    pub fn accrue(
        &mut self,
        stake: &StakeEntry,
        pool: &RewardPool,
        now: u64,
        mode: AccrualMode,
        pending: &[RateChange],
    ) -> Result<AccrualOutcome> {
        self.validate(stake)?;

        let staked_ts = staked_ts(stake, pool);
        let horizon_ts = stake.horizon(now);
        let before = self.accounted_amount;
        let mut segments = 0usize;

        let changes_beyond_horizon = match mode {
            AccrualMode::EventLog => {
                let loaded = pending.len() as u64;
                if self.rate_cursor.checked_add(loaded) != Some(pool.rate_version) {
                    return Err(AccrualError::RateLogMismatch {
                        cursor: self.rate_cursor,
                        loaded,
                        version: pool.rate_version,
                    });
                }
                let due = pending.iter().take_while(|c| c.ts <= horizon_ts).count();
                for change in &pending[..due] {
                    self.replay(change, staked_ts, stake.effective_amount)?;
                    segments += 1;
                }
                self.rate_cursor += due as u64;
                due < pending.len()
            }
            AccrualMode::LastUpdate => {
                let base = checkpoint_base(staked_ts, self.last_accounted_ts);
                let mut beyond = false;
                for change in pool.slot_changes().iter().filter(|c| c.ts > base) {
                    if change.ts > horizon_ts {
                        beyond = true;
                        continue;
                    }
                    self.replay(change, staked_ts, stake.effective_amount)?;
                    segments += 1;
                }
                beyond
            }
        };

        // Changes past a closed entry's horizon never apply to it
        let (reward_amount, reward_period) = if changes_beyond_horizon {
            (self.last_reward_amount, self.last_reward_period)
        } else {
            (pool.reward_amount, pool.reward_period)
        };
        self.credit(staked_ts, horizon_ts, stake.effective_amount, reward_amount, reward_period)?;
        self.last_reward_amount = reward_amount;
        self.last_reward_period = reward_period;
        segments += 1;

        let outcome = AccrualOutcome {
            credited: self.accounted_amount - before,
            segments,
            horizon_ts,
            last_accounted_ts: self.last_accounted_ts,
        };
        debug!(
            entry = %self.key(),
            credited = outcome.credited,
            segments,
            horizon_ts,
            last_accounted_ts = self.last_accounted_ts,
            "Accrued"
        );
        Ok(outcome)
    }

    /// Credit up to `change.ts` with the values held so far, then adopt the change
    fn replay(&mut self, change: &RateChange, staked_ts: u64, effective_stake: u128) -> Result<()> {
        self.credit(
            staked_ts,
            change.ts,
            effective_stake,
            self.last_reward_amount,
            self.last_reward_period,
        )?;
        change.apply(&mut self.last_reward_amount, &mut self.last_reward_period);
        Ok(())
    }

    fn credit(
        &mut self,
        staked_ts: u64,
        horizon_ts: u64,
        effective_stake: u128,
        reward_amount: u64,
        reward_period: u64,
    ) -> Result<u128> {
        let amount = accountable_amount(
            staked_ts,
            horizon_ts,
            effective_stake,
            reward_amount,
            reward_period,
            self.last_accounted_ts,
        )?;
        self.accounted_amount = self
            .accounted_amount
            .checked_add(amount)
            .ok_or(AccrualError::ArithmeticOverflow)?;
        let next = advance_checkpoint(staked_ts, horizon_ts, reward_period, self.last_accounted_ts)?;
        // untouched until a whole period has elapsed
        if next > checkpoint_base(staked_ts, self.last_accounted_ts) {
            self.last_accounted_ts = next;
        }
        Ok(amount)
    }

    /// Credited but unclaimed reward, raw units (floored)
    pub fn claimable_amount(&self) -> Result<u64> {
        let claimed = (self.claimed_amount as u128)
            .checked_mul(REWARD_PRECISION)
            .ok_or(AccrualError::ArithmeticOverflow)?;
        let unclaimed = self
            .accounted_amount
            .checked_sub(claimed)
            .ok_or(AccrualError::ArithmeticOverflow)?;
        u64::try_from(unclaimed / REWARD_PRECISION).map_err(|_| AccrualError::ArithmeticOverflow)
    }

    /// Record a payout of `amount` raw units
    pub fn record_claim(&mut self, amount: u64) -> Result<()> {
        let claimable = self.claimable_amount()?;
        if amount > claimable {
            return Err(AccrualError::ClaimExceedsAccrued {
                requested: amount,
                claimable,
            });
        }
        self.claimed_amount += amount;
        Ok(())
    }
}
