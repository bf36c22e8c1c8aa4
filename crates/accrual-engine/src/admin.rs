//! Pool administration
//!
//! Pool and stake creation, funding, fee overrides and authority-gated
//! rate/period updates.
//!
//! A rate update first appends its change to the rate log at the pool's
//! current `rate_version`, then publishes it with one compare-and-swap of the
//! pool record. Readers only load log positions below `rate_version`, so they
//! never see a change the pool has not published, and a claim sees the rate
//! fields either entirely before or entirely after the update.

use accrual_core::{
    fee_amount, AccountId, AccrualError, FeeValue, LoggedRateChange, Result, RewardPool, RewardPoolId, StakeEntry,
    StakeEntryId, StakePool, StakePoolId,
};
use accrual_storage::{fetch, update};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::EngineContext;

/// Outcome of funding a reward pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundReceipt {
    pub reward_pool: RewardPoolId,
    /// Credited to the pool
    pub funded: u64,
    /// Sent to the fee collector
    pub fee: u64,
    /// Fee charged, in 1/10_000
    pub fee_rate: u64,
    pub available: u64,
}

/// Administrative operations on pools and stake entries
pub struct PoolAdmin {
    ctx: EngineContext,
}

impl PoolAdmin {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub fn create_stake_pool(
        &self,
        mint: AccountId,
        creator: AccountId,
        nonce: u8,
        min_duration: u64,
        max_duration: u64,
        max_weight: u64,
    ) -> Result<StakePool> {
        let now = self.ctx.clock.now();
        let pool = StakePool::new(mint, creator, nonce, min_duration, max_duration, max_weight, now)?;
        self.ctx.store.stake_pools().create(pool.clone())?;

        info!(pool = %pool.id, min_duration, max_duration, max_weight, "Stake pool created");
        Ok(pool)
    }

    /// Attach a reward pool; only the stake pool authority may do so
    pub fn create_reward_pool(
        &self,
        stake_pool: &StakePoolId,
        caller: AccountId,
        mint: AccountId,
        nonce: u8,
        reward_amount: u64,
        reward_period: u64,
    ) -> Result<RewardPool> {
        let stake_pool = fetch(self.ctx.store.stake_pools(), stake_pool)?.record;
        if stake_pool.authority != caller {
            return Err(AccrualError::Unauthorized(format!(
                "{} is not the authority of stake pool {}",
                caller, stake_pool.id
            )));
        }

        let now = self.ctx.clock.now();
        let pool = RewardPool::new(&stake_pool, mint, caller, nonce, reward_amount, reward_period, now)?;
        self.ctx.store.reward_pools().create(pool.clone())?;

        info!(pool = %pool.id, stake_pool = %stake_pool.id, reward_amount, reward_period, "Reward pool created");
        Ok(pool)
    }

    pub fn open_stake(
        &self,
        stake_pool: &StakePoolId,
        owner: AccountId,
        nonce: u32,
        amount: u64,
        duration: u64,
    ) -> Result<StakeEntry> {
        let pool = fetch(self.ctx.store.stake_pools(), stake_pool)?.record;
        let entry = StakeEntry::open(&pool, owner, nonce, amount, duration, self.ctx.clock.now())?;
        self.ctx.store.stake_entries().create(entry.clone())?;

        info!(entry = %entry.id, %owner, amount, duration, "Stake opened");
        Ok(entry)
    }

    /// Freeze accrual of a stake entry at the current time
    ///
    /// Waits for in-flight claims on the entry, so none of them accrues past the close.
    pub async fn close_stake(&self, stake_entry: &StakeEntryId, caller: AccountId) -> Result<StakeEntry> {
        let _guard = self.ctx.locks.stakes.lock(*stake_entry).await;
        close_stake_entry(&self.ctx, stake_entry, caller)
    }

    /// Fund fee charged to `funder`: its override, else the configured default
    pub fn fund_fee(&self, funder: &AccountId) -> u64 {
        self.ctx
            .store
            .fee_values()
            .get(funder)
            .map_or(self.ctx.config.fees.fund_fee, |row| row.record.fee)
    }

    /// Override the fund fee of `target`; only the fee authority may do so
    pub fn write_fee(&self, caller: AccountId, target: AccountId, fee: u64) -> Result<FeeValue> {
        self.check_fee_authority(caller)?;
        let value = FeeValue::new(target, fee)?;
        let table = self.ctx.store.fee_values();
        match table.get(&target) {
            Some(row) => table.compare_and_swap(row.version, value)?,
            None => table.create(value)?,
        };

        info!(%target, fee, "Fee override written");
        Ok(value)
    }

    /// Drop the fee override of `target`, returning it if there was one
    pub fn remove_fee(&self, caller: AccountId, target: AccountId) -> Result<Option<FeeValue>> {
        self.check_fee_authority(caller)?;
        let removed = self.ctx.store.fee_values().remove(&target).map(|row| row.record);

        info!(%target, removed = removed.is_some(), "Fee override removed");
        Ok(removed)
    }

    fn check_fee_authority(&self, caller: AccountId) -> Result<()> {
        let authority = self.ctx.config.fees.fee_authority()?;
        if caller != authority {
            return Err(AccrualError::Unauthorized(format!("{} is not the fee authority", caller)));
        }
        Ok(())
    }

    /// Move `amount` from `funder` into the pool vault, withholding the fund fee
    pub async fn fund(&self, reward_pool: &RewardPoolId, funder: AccountId, amount: u64) -> Result<FundReceipt> {
        // fail before moving tokens if the pool is unknown
        fetch(self.ctx.store.reward_pools(), reward_pool)?;

        let fee_rate = self.fund_fee(&funder);
        let fee = fee_amount(amount, fee_rate);
        let funded = amount - fee;
        let collector = self.ctx.config.fees.fee_collector()?;
        let vault = reward_pool.vault();
        let transfer = &self.ctx.transfer;

        transfer.transfer(&funder, &vault, funded).await?;
        if fee > 0 {
            if let Err(err) = transfer.transfer(&funder, &collector, fee).await {
                self.refund(&vault, &funder, funded).await;
                return Err(err);
            }
        }

        let credited = update(
            self.ctx.store.reward_pools(),
            reward_pool,
            self.ctx.config.accrual.max_cas_retries,
            |pool| pool.fund(funded),
        );
        let row = match credited {
            Ok((_, row)) => row,
            Err(err) => {
                self.refund(&vault, &funder, funded).await;
                self.refund(&collector, &funder, fee).await;
                return Err(err);
            }
        };

        let available = row.record.available();
        self.ctx.metrics.set_available(reward_pool, available);
        info!(pool = %reward_pool, %funder, funded, fee, fee_rate, available, "Reward pool funded");
        Ok(FundReceipt {
            reward_pool: *reward_pool,
            funded,
            fee,
            fee_rate,
            available,
        })
    }

    async fn refund(&self, from: &AccountId, to: &AccountId, amount: u64) {
        if amount == 0 {
            return;
        }
        if let Err(err) = self.ctx.transfer.transfer(from, to, amount).await {
            error!(%from, %to, amount, %err, "Refund failed");
        }
    }

    /// Change the reward amount; returns false when the value is unchanged
    pub async fn update_reward_amount(
        &self,
        reward_pool: &RewardPoolId,
        caller: AccountId,
        reward_amount: u64,
    ) -> Result<bool> {
        self.update_rate(reward_pool, caller, |pool, now| pool.update_reward_amount(reward_amount, now))
            .await
    }

    /// Change the reward period; returns false when the value is unchanged
    pub async fn update_reward_period(
        &self,
        reward_pool: &RewardPoolId,
        caller: AccountId,
        reward_period: u64,
    ) -> Result<bool> {
        self.update_rate(reward_pool, caller, |pool, now| pool.update_reward_period(reward_period, now))
            .await
    }

    async fn update_rate<F>(&self, reward_pool: &RewardPoolId, caller: AccountId, mut apply: F) -> Result<bool>
    where
        F: FnMut(&mut RewardPool, u64) -> Result<Option<LoggedRateChange>>,
    {
        let _guard = self.ctx.locks.pools.lock(*reward_pool).await;
        let now = self.ctx.clock.now();
        let pools = self.ctx.store.reward_pools();

        let mut pool = fetch(pools, reward_pool)?.record;
        if pool.authority != caller {
            return Err(AccrualError::Unauthorized(format!(
                "{} is not the authority of reward pool {}",
                caller, pool.id
            )));
        }
        let logged = match apply(&mut pool, now)? {
            Some(logged) => logged,
            None => return Ok(false),
        };

        let log = self.ctx.store.rate_log();
        // left behind by an update whose pool write failed; never read
        if log.remove(&logged.key()).is_some() {
            warn!(change = %logged.key(), "Replaced unpublished rate change");
        }
        log.create(logged)?;

        update(pools, reward_pool, self.ctx.config.accrual.max_cas_retries, |pool| {
            match apply(pool, now)? {
                Some(again) if again == logged => Ok(()),
                _ => Err(AccrualError::RecordConflict(format!(
                    "reward pool {}: rate fields changed during update",
                    pool.id
                ))),
            }
        })?;
        Ok(true)
    }
}

/// Caller must own the stake entry
pub(crate) fn check_owner(stake: &StakeEntry, caller: AccountId) -> Result<()> {
    if stake.owner != caller {
        return Err(AccrualError::Unauthorized(format!(
            "{} does not own stake entry {}",
            caller, stake.id
        )));
    }
    Ok(())
}

/// Close a stake entry at the current time; the caller holds its stake lock
pub(crate) fn close_stake_entry(ctx: &EngineContext, stake_entry: &StakeEntryId, caller: AccountId) -> Result<StakeEntry> {
    let now = ctx.clock.now();
    let (_, row) = update(ctx.store.stake_entries(), stake_entry, ctx.config.accrual.max_cas_retries, |entry| {
        check_owner(entry, caller)?;
        entry.close(now)
    })?;

    info!(entry = %stake_entry, closed_ts = row.record.closed_ts, "Stake closed");
    Ok(row.record)
}
