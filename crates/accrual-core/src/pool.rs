//! # Pools and Stake Entries
//!
//! Records the accumulator reads. A stake pool fixes the weight curve, a stake
//! entry fixes its effective amount at creation, and a reward pool carries the
//! current rate/period plus the history of authority updates.
//!
//! ## Rate history
//!
//! Every authority update is kept twice:
//!
//! - in the two `last_*` slots (value before the most recent update + its timestamp)
//! - as a [`LoggedRateChange`] at position `seq` of the pool's rate log
//!
//! The slots only remember the latest amount and period update; the log
//! remembers all of them. The log lives outside the pool record, which only
//! carries its length as `rate_version`.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::SCALE;
use crate::error::{AccrualError, Result};
use crate::types::{AccountId, RateLogKey, RewardPoolId, StakeEntryId, StakePoolId};
use crate::weight::{effective_amount, stake_weight};

/// Stake pool: immutable weight curve for every entry staked into it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePool {
    pub id: StakePoolId,
    pub mint: AccountId,
    pub creator: AccountId,
    pub authority: AccountId,
    pub nonce: u8,
    /// Shortest lock-up, weight 1x
    pub min_duration: u64,
    /// Longest lock-up, weight `max_weight`
    pub max_duration: u64,
    /// Weight at `max_duration`, scaled by `SCALE`
    pub max_weight: u64,
    pub created_ts: u64,
}

impl StakePool {
    pub fn new(
        mint: AccountId,
        creator: AccountId,
        nonce: u8,
        min_duration: u64,
        max_duration: u64,
        max_weight: u64,
        created_ts: u64,
    ) -> Result<Self> {
        if min_duration > max_duration {
            return Err(AccrualError::InvalidDuration {
                duration: max_duration,
                min: min_duration,
                max: max_duration,
            });
        }
        if max_weight < SCALE {
            return Err(AccrualError::InvalidWeight(max_weight));
        }

        Ok(Self {
            id: StakePoolId::derive(&mint, &creator, nonce),
            mint,
            creator,
            authority: creator,
            nonce,
            min_duration,
            max_duration,
            max_weight,
            created_ts,
        })
    }

    /// Weight for a lock-up of `duration` seconds
    pub fn weight(&self, duration: u64) -> Result<u64> {
        stake_weight(self.min_duration, self.max_duration, self.max_weight, duration)
    }

    /// Transfer pool authority
    pub fn set_authority(&mut self, authority: AccountId) {
        self.authority = authority;
    }
}

/// A staked position
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeEntry {
    pub id: StakeEntryId,
    pub stake_pool: StakePoolId,
    pub owner: AccountId,
    pub nonce: u32,
    /// Raw staked units
    pub amount: u64,
    /// Lock-up in seconds
    pub duration: u64,
    /// `amount * weight`, fixed at creation
    pub effective_amount: u128,
    pub created_ts: u64,
    /// 0 while open
    pub closed_ts: u64,
    /// Reward pools whose entry for this stake was closed
    #[serde(default)]
    pub closed_reward_entries: Vec<RewardPoolId>,
}

impl StakeEntry {
    /// Open a position in `pool`
    pub fn open(
        pool: &StakePool,
        owner: AccountId,
        nonce: u32,
        amount: u64,
        duration: u64,
        now: u64,
    ) -> Result<Self> {
        if duration < pool.min_duration || duration > pool.max_duration {
            return Err(AccrualError::InvalidDuration {
                duration,
                min: pool.min_duration,
                max: pool.max_duration,
            });
        }
        let weight = pool.weight(duration)?;

        Ok(Self {
            id: StakeEntryId::derive(&pool.id, &owner, nonce),
            stake_pool: pool.id,
            owner,
            nonce,
            amount,
            duration,
            effective_amount: effective_amount(amount, weight),
            created_ts: now,
            closed_ts: 0,
            closed_reward_entries: Vec::new(),
        })
    }

    /// Close the position, freezing accrual at `ts`
    pub fn close(&mut self, ts: u64) -> Result<()> {
        if self.is_closed() {
            return Err(AccrualError::AlreadyClosed(self.closed_ts));
        }
        // closed_ts == 0 means open, so a close at 0 is stored as 1
        self.closed_ts = ts.max(self.created_ts).max(1);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed_ts > 0
    }

    /// Time up to which this entry accrues when observed at `now`
    pub fn horizon(&self, now: u64) -> u64 {
        if self.is_closed() {
            self.closed_ts
        } else {
            now
        }
    }

    pub fn reward_entry_closed(&self, reward_pool: &RewardPoolId) -> bool {
        self.closed_reward_entries.contains(reward_pool)
    }

    /// Effective stake in raw stake units (`amount * weight / SCALE`)
    pub fn effective_units(&self) -> u128 {
        self.effective_amount / SCALE as u128
    }
}

/// An authority update to a reward pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateChange {
    pub ts: u64,
    pub kind: RateChangeKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateChangeKind {
    AmountChanged { from: u64, to: u64 },
    PeriodChanged { from: u64, to: u64 },
}

impl RateChange {
    /// Apply this change to a (reward_amount, reward_period) pair
    pub fn apply(&self, amount: &mut u64, period: &mut u64) {
        match self.kind {
            RateChangeKind::AmountChanged { to, .. } => *amount = to,
            RateChangeKind::PeriodChanged { to, .. } => *period = to,
        }
    }
}

/// A [`RateChange`] at position `seq` of a reward pool's log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedRateChange {
    pub reward_pool: RewardPoolId,
    pub seq: u64,
    pub change: RateChange,
}

impl LoggedRateChange {
    pub fn key(&self) -> RateLogKey {
        RateLogKey::new(self.reward_pool, self.seq)
    }
}

/// Reward pool attached to a stake pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPool {
    pub id: RewardPoolId,
    pub stake_pool: StakePoolId,
    pub mint: AccountId,
    pub authority: AccountId,
    pub nonce: u8,
    /// Reward per stake raw unit per period, scaled by `SCALE`
    pub reward_amount: u64,
    /// Seconds per period
    pub reward_period: u64,
    /// Amount in effect before the latest amount update
    pub last_reward_amount: u64,
    /// Period in effect before the latest period update
    pub last_reward_period: u64,
    /// 0 if never updated
    pub last_amount_update_ts: u64,
    /// 0 if never updated
    pub last_period_update_ts: u64,
    pub created_ts: u64,
    pub funded_amount: u64,
    pub claimed_amount: u64,
    /// Length of the rate log, bumped on every rate/period update
    pub rate_version: u64,
}

impl RewardPool {
    pub fn new(
        stake_pool: &StakePool,
        mint: AccountId,
        authority: AccountId,
        nonce: u8,
        reward_amount: u64,
        reward_period: u64,
        created_ts: u64,
    ) -> Result<Self> {
        if reward_period == 0 {
            return Err(AccrualError::InvalidRewardPeriod(reward_period));
        }

        Ok(Self {
            id: RewardPoolId::derive(&stake_pool.id, &mint, nonce),
            stake_pool: stake_pool.id,
            mint,
            authority,
            nonce,
            reward_amount,
            reward_period,
            last_reward_amount: reward_amount,
            last_reward_period: reward_period,
            last_amount_update_ts: 0,
            last_period_update_ts: 0,
            created_ts,
            funded_amount: 0,
            claimed_amount: 0,
            rate_version: 0,
        })
    }

    /// Tokens funded but not yet claimed
    pub fn available(&self) -> u64 {
        self.funded_amount.saturating_sub(self.claimed_amount)
    }

    /// Credit funded tokens
    pub fn fund(&mut self, amount: u64) -> Result<()> {
        self.funded_amount = self
            .funded_amount
            .checked_add(amount)
            .ok_or(AccrualError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Change the reward amount at `ts`
    ///
    /// Returns the change to append to the rate log, or `None` when the value is unchanged.
    pub fn update_reward_amount(&mut self, reward_amount: u64, ts: u64) -> Result<Option<LoggedRateChange>> {
        if reward_amount == self.reward_amount {
            return Ok(None);
        }
        self.check_update(ts)?;

        let change = RateChange {
            ts,
            kind: RateChangeKind::AmountChanged {
                from: self.reward_amount,
                to: reward_amount,
            },
        };
        self.last_reward_amount = self.reward_amount;
        self.reward_amount = reward_amount;
        self.last_amount_update_ts = ts;
        let logged = self.append(change);

        info!(pool = %self.id, from = self.last_reward_amount, to = reward_amount, ts, "Reward amount updated");
        Ok(Some(logged))
    }

    /// Change the reward period at `ts`, see [`Self::update_reward_amount`]
    pub fn update_reward_period(&mut self, reward_period: u64, ts: u64) -> Result<Option<LoggedRateChange>> {
        if reward_period == 0 {
            return Err(AccrualError::InvalidRewardPeriod(reward_period));
        }
        if reward_period == self.reward_period {
            return Ok(None);
        }
        self.check_update(ts)?;

        let change = RateChange {
            ts,
            kind: RateChangeKind::PeriodChanged {
                from: self.reward_period,
                to: reward_period,
            },
        };
        self.last_reward_period = self.reward_period;
        self.reward_period = reward_period;
        self.last_period_update_ts = ts;
        let logged = self.append(change);

        info!(pool = %self.id, from = self.last_reward_period, to = reward_period, ts, "Reward period updated");
        Ok(Some(logged))
    }

    fn check_update(&self, ts: u64) -> Result<()> {
        let last = self.last_amount_update_ts.max(self.last_period_update_ts);
        if ts == 0 || ts < last || ts < self.created_ts {
            return Err(AccrualError::InvalidTimestamp { ts, last });
        }
        Ok(())
    }

    fn append(&mut self, change: RateChange) -> LoggedRateChange {
        let logged = LoggedRateChange {
            reward_pool: self.id,
            seq: self.rate_version,
            change,
        };
        self.rate_version += 1;
        logged
    }

    /// Updates still held in the `last_*` slots, oldest first
    ///
    /// Only one amount and one period update can be represented. On equal
    /// timestamps the period update is ordered first.
    pub fn slot_changes(&self) -> Vec<RateChange> {
        let mut changes = Vec::with_capacity(2);
        if self.last_period_update_ts > 0 && self.reward_period != self.last_reward_period {
            changes.push(RateChange {
                ts: self.last_period_update_ts,
                kind: RateChangeKind::PeriodChanged {
                    from: self.last_reward_period,
                    to: self.reward_period,
                },
            });
        }
        if self.last_amount_update_ts > 0 && self.reward_amount != self.last_reward_amount {
            changes.push(RateChange {
                ts: self.last_amount_update_ts,
                kind: RateChangeKind::AmountChanged {
                    from: self.last_reward_amount,
                    to: self.reward_amount,
                },
            });
        }
        // stable sort keeps period first on ties
        changes.sort_by_key(|c| c.ts);
        changes
    }

    /// (reward_amount, reward_period) in effect at `ts` according to `changes`
    ///
    /// A change at exactly `ts` is considered already in effect.
    pub fn rate_at(&self, ts: u64, changes: &[RateChange]) -> (u64, u64) {
        let mut amount = None;
        let mut period = None;
        for change in changes.iter().filter(|c| c.ts > ts) {
            match change.kind {
                RateChangeKind::AmountChanged { from, .. } => {
                    amount.get_or_insert(from);
                }
                RateChangeKind::PeriodChanged { from, .. } => {
                    period.get_or_insert(from);
                }
            }
        }
        (
            amount.unwrap_or(self.reward_amount),
            period.unwrap_or(self.reward_period),
        )
    }
}
