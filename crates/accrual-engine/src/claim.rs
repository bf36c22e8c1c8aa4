//! Claim engine
//!
//! A claim accrues the entry against one snapshot of the stake entry and
//! reward pool, then commits in three steps: reserve the payout on the pool,
//! persist the entry, transfer. Before transferring it checks that the stake
//! entry is still the one it accrued against. A failed step undoes the earlier
//! ones, so a failed claim leaves the store as it found it; when the undo
//! itself fails the claim reports [`AccrualError::RollbackFailed`].

use accrual_core::accumulator::staked_ts;
use accrual_core::{
    AccountId, AccrualError, AccrualMode, AccrualOutcome, AccumulatorState, RateChange, Result, RewardEntry,
    RewardEntryKey, RewardPool, RewardPoolId, StakeEntry, StakeEntryId,
};
use accrual_storage::{fetch, read_rate_log, update, Versioned};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::admin::{check_owner, close_stake_entry};
use crate::EngineContext;

/// Committed claim
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub key: RewardEntryKey,
    pub owner: AccountId,
    /// Tokens transferred to the owner
    pub amount: u64,
    /// Reward credited by this claim, scaled by `REWARD_PRECISION`
    pub credited: u128,
    pub accounted_amount: u128,
    pub claimed_amount: u64,
    pub last_accounted_ts: u64,
    pub horizon_ts: u64,
    pub state: AccumulatorState,
    /// Whether this claim created the reward entry
    pub created: bool,
}

/// Claimable amount without committing anything
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPreview {
    pub key: RewardEntryKey,
    pub claimable: u64,
    pub available: u64,
    pub accounted_amount: u128,
    pub last_accounted_ts: u64,
    pub horizon_ts: u64,
    pub state: AccumulatorState,
}

/// Claims from every reward pool followed by the close
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeReceipt {
    pub stake: StakeEntry,
    pub claims: Vec<ClaimReceipt>,
}

/// Entry and pool state a claim is computed from
struct Snapshot {
    stake: Versioned<StakeEntry>,
    pool: Versioned<RewardPool>,
    entry: Option<Versioned<RewardEntry>>,
    /// Logged rate changes from the entry's cursor (from 0 without an entry)
    log: Vec<RateChange>,
    now: u64,
}

/// Claims rewards for stake entries
pub struct ClaimEngine {
    ctx: EngineContext,
}

impl ClaimEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Accrue the entry up to now and pay out everything claimable
    pub async fn claim(&self, reward_pool: &RewardPoolId, stake_entry: &StakeEntryId) -> Result<ClaimReceipt> {
        let _guard = self.ctx.locks.stakes.lock(*stake_entry).await;
        self.claim_locked(&RewardEntryKey::new(*reward_pool, *stake_entry)).await
    }

    /// Claim from every reward pool of the stake's pool, then close the stake
    ///
    /// Claims run in reward pool id order. If one fails, the claims before it
    /// stay paid and the stake stays open.
    pub async fn unstake_and_claim(&self, stake_entry: &StakeEntryId, caller: AccountId) -> Result<UnstakeReceipt> {
        let _guard = self.ctx.locks.stakes.lock(*stake_entry).await;
        let stake = fetch(self.ctx.store.stake_entries(), stake_entry)?.record;
        check_owner(&stake, caller)?;
        if stake.is_closed() {
            return Err(AccrualError::AlreadyClosed(stake.closed_ts));
        }

        let mut reward_pools: Vec<RewardPoolId> = self
            .ctx
            .store
            .reward_pools()
            .snapshot()
            .into_iter()
            .filter(|row| row.record.stake_pool == stake.stake_pool)
            .map(|row| row.record.id)
            .collect();
        reward_pools.sort();

        let mut claims = Vec::with_capacity(reward_pools.len());
        for reward_pool in reward_pools {
            claims.push(self.claim_locked(&RewardEntryKey::new(reward_pool, *stake_entry)).await?);
        }
        let stake = close_stake_entry(&self.ctx, stake_entry, caller)?;

        let paid: u64 = claims.iter().map(|c| c.amount).sum();
        info!(entry = %stake_entry, pools = claims.len(), paid, closed_ts = stake.closed_ts, "Unstaked");
        Ok(UnstakeReceipt { stake, claims })
    }

    /// Remove the reward entry of a closed stake
    ///
    /// Unclaimed reward is forfeited. The stake remembers the closed entry, so
    /// no later claim can recreate it and accrue from staking time again.
    pub async fn close_reward_entry(
        &self,
        reward_pool: &RewardPoolId,
        stake_entry: &StakeEntryId,
        caller: AccountId,
    ) -> Result<RewardEntry> {
        let _guard = self.ctx.locks.stakes.lock(*stake_entry).await;
        let key = RewardEntryKey::new(*reward_pool, *stake_entry);
        let store = &self.ctx.store;

        let entry = fetch(store.reward_entries(), &key)?.record;
        update(store.stake_entries(), stake_entry, self.ctx.config.accrual.max_cas_retries, |stake| {
            check_owner(stake, caller)?;
            if !stake.is_closed() {
                return Err(AccrualError::StakeEntryOpen(stake.id.to_string()));
            }
            if !stake.reward_entry_closed(reward_pool) {
                stake.closed_reward_entries.push(*reward_pool);
            }
            Ok(())
        })?;
        store.reward_entries().remove(&key);

        let forfeited = entry.claimable_amount()?;
        if forfeited > 0 {
            warn!(entry = %key, forfeited, "Reward entry closed with unclaimed reward");
        }
        info!(entry = %key, claimed_amount = entry.claimed_amount, "Reward entry closed");
        Ok(entry)
    }

    /// Claim with the stake lock already held
    async fn claim_locked(&self, key: &RewardEntryKey) -> Result<ClaimReceipt> {
        let retries = self.ctx.config.accrual.stale_snapshot_retries;
        let mut attempt = 0;
        let result = loop {
            match self.try_claim(key).await {
                Err(err @ (AccrualError::StaleRateSnapshot { .. } | AccrualError::StaleStakeSnapshot { .. }))
                    if attempt < retries =>
                {
                    attempt += 1;
                    debug!(entry = %key, attempt, %err, "Retrying claim");
                }
                other => break other,
            }
        };

        match &result {
            Ok(receipt) => {
                self.ctx.metrics.record_claim(receipt.amount);
                info!(
                    entry = %key,
                    owner = %receipt.owner,
                    amount = receipt.amount,
                    last_accounted_ts = receipt.last_accounted_ts,
                    "Claim committed"
                );
            }
            Err(err) => {
                self.ctx.metrics.record_failure(err);
                warn!(entry = %key, code = err.code(), %err, "Claim rejected");
            }
        }
        result
    }

    /// Claimable amount if the entry were claimed now
    pub fn preview(&self, reward_pool: &RewardPoolId, stake_entry: &StakeEntryId) -> Result<ClaimPreview> {
        let key = RewardEntryKey::new(*reward_pool, *stake_entry);
        let snapshot = self.snapshot(&key)?;
        let state = AccumulatorState::of(snapshot.entry.as_ref().map(|row| &row.record), &snapshot.stake.record);
        let (entry, outcome) = self.accrue(&snapshot)?;

        Ok(ClaimPreview {
            key,
            claimable: entry.claimable_amount()?,
            available: snapshot.pool.record.available(),
            accounted_amount: entry.accounted_amount,
            last_accounted_ts: outcome.last_accounted_ts,
            horizon_ts: outcome.horizon_ts,
            state,
        })
    }

    async fn try_claim(&self, key: &RewardEntryKey) -> Result<ClaimReceipt> {
        let snapshot = self.snapshot(key)?;
        let (mut entry, outcome) = self.accrue(&snapshot)?;

        let amount = entry.claimable_amount()?;
        let available = snapshot.pool.record.available();
        if amount > available {
            return Err(AccrualError::RewardPoolDrained {
                requested: amount,
                available,
            });
        }
        entry.record_claim(amount)?;

        // 1. reserve
        let pool = self.reserve(key, snapshot.pool.record.rate_version, amount)?;

        // 2. persist
        let previous = snapshot.entry.as_ref();
        let persisted = match previous {
            Some(row) => self.ctx.store.reward_entries().compare_and_swap(row.version, entry.clone()),
            None => self.ctx.store.reward_entries().create(entry.clone()),
        };
        let version = match persisted {
            Ok(version) => version,
            Err(err) => {
                self.release(key, amount);
                return Err(err);
            }
        };

        // 3. the stake must not have changed under the accrual
        if let Err(err) = self.check_stake(key, snapshot.stake.version) {
            return Err(self.rollback(key, previous, version, amount, err));
        }

        // 4. transfer
        let owner = snapshot.stake.record.owner;
        if amount > 0 {
            let vault = key.reward_pool.vault();
            if let Err(err) = self.ctx.transfer.transfer(&vault, &owner, amount).await {
                return Err(self.rollback(key, previous, version, amount, err));
            }
        }
        self.ctx.metrics.set_available(&key.reward_pool, pool.record.available());

        Ok(ClaimReceipt {
            key: *key,
            owner,
            amount,
            credited: outcome.credited,
            accounted_amount: entry.accounted_amount,
            claimed_amount: entry.claimed_amount,
            last_accounted_ts: entry.last_accounted_ts,
            horizon_ts: outcome.horizon_ts,
            state: AccumulatorState::of(Some(&entry), &snapshot.stake.record),
            created: previous.is_none(),
        })
    }

    fn snapshot(&self, key: &RewardEntryKey) -> Result<Snapshot> {
        let store = &self.ctx.store;
        let stake = fetch(store.stake_entries(), &key.stake_entry)?;
        let pool = fetch(store.reward_pools(), &key.reward_pool)?;
        if pool.record.stake_pool != stake.record.stake_pool {
            return Err(AccrualError::Unauthorized(format!(
                "stake entry {} is not staked in the stake pool of reward pool {}",
                key.stake_entry, key.reward_pool
            )));
        }
        let entry = store.reward_entries().get(key);
        if entry.is_none() && stake.record.reward_entry_closed(&key.reward_pool) {
            return Err(AccrualError::RewardEntryClosed(key.to_string()));
        }

        let log = match self.ctx.config.accrual.mode {
            AccrualMode::EventLog => {
                let cursor = entry.as_ref().map_or(0, |row| row.record.rate_cursor);
                read_rate_log(store.rate_log(), &key.reward_pool, cursor..pool.record.rate_version)?
            }
            AccrualMode::LastUpdate => Vec::new(),
        };

        Ok(Snapshot {
            stake,
            pool,
            entry,
            log,
            now: self.ctx.clock.now(),
        })
    }

    fn accrue(&self, snapshot: &Snapshot) -> Result<(RewardEntry, AccrualOutcome)> {
        let mode = self.ctx.config.accrual.mode;
        let stake = &snapshot.stake.record;
        let pool = &snapshot.pool.record;
        let (mut entry, pending) = match &snapshot.entry {
            Some(row) => (row.record.clone(), &snapshot.log[..]),
            None => {
                let entry = RewardEntry::new(pool, stake, snapshot.now, mode, &snapshot.log)?;
                let applied = (entry.rate_cursor as usize).min(snapshot.log.len());
                (entry, &snapshot.log[applied..])
            }
        };
        debug!(
            entry = %entry.key(),
            staked_ts = staked_ts(stake, pool),
            now = snapshot.now,
            pending = pending.len(),
            ?mode,
            "Accruing"
        );
        let outcome = entry.accrue(stake, pool, snapshot.now, mode, pending)?;
        Ok((entry, outcome))
    }

    /// Deduct `amount` from the pool, provided its rate is still the one accrued against
    fn reserve(&self, key: &RewardEntryKey, observed: u64, amount: u64) -> Result<Versioned<RewardPool>> {
        let retries = self.ctx.config.accrual.max_cas_retries;
        let (_, row) = update(self.ctx.store.reward_pools(), &key.reward_pool, retries, |pool| {
            if pool.rate_version != observed {
                return Err(AccrualError::StaleRateSnapshot {
                    observed,
                    current: pool.rate_version,
                });
            }
            let available = pool.available();
            if amount > available {
                return Err(AccrualError::RewardPoolDrained {
                    requested: amount,
                    available,
                });
            }
            pool.claimed_amount += amount;
            Ok(())
        })?;
        Ok(row)
    }

    fn check_stake(&self, key: &RewardEntryKey, observed: u64) -> Result<()> {
        let current = fetch(self.ctx.store.stake_entries(), &key.stake_entry)?.version;
        if current != observed {
            return Err(AccrualError::StaleStakeSnapshot { observed, current });
        }
        Ok(())
    }

    /// Undo persist and reserve after `cause`; returns the error to report
    ///
    /// If the entry cannot be restored the reservation is kept, so entry and
    /// pool still agree on what was claimed.
    fn rollback(
        &self,
        key: &RewardEntryKey,
        previous: Option<&Versioned<RewardEntry>>,
        version: u64,
        amount: u64,
        cause: AccrualError,
    ) -> AccrualError {
        match self.restore(key, previous, version) {
            Ok(()) => {
                self.release(key, amount);
                cause
            }
            Err(err) => {
                error!(entry = %key, amount, %err, %cause, "Failed to restore reward entry");
                AccrualError::RollbackFailed {
                    entry: key.to_string(),
                    amount,
                    cause: format!("{}; restore: {}", cause, err),
                }
            }
        }
    }

    fn release(&self, key: &RewardEntryKey, amount: u64) {
        if amount == 0 {
            return;
        }
        let retries = self.ctx.config.accrual.max_cas_retries;
        let released = update(self.ctx.store.reward_pools(), &key.reward_pool, retries, |pool| {
            pool.claimed_amount = pool
                .claimed_amount
                .checked_sub(amount)
                .ok_or(AccrualError::ArithmeticOverflow)?;
            Ok(())
        });
        if let Err(err) = released {
            error!(entry = %key, amount, %err, "Failed to release reservation");
        }
    }

    /// Put the entry back the way the snapshot found it
    fn restore(&self, key: &RewardEntryKey, previous: Option<&Versioned<RewardEntry>>, version: u64) -> Result<()> {
        let table = self.ctx.store.reward_entries();
        match previous {
            Some(row) => table.compare_and_swap(version, row.record.clone()).map(|_| ()),
            None => table
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| AccrualError::RecordNotFound(key.to_string())),
        }
    }
}
