//! End-to-end claim tests against the in-memory store and vaults

use accrual_core::{
    AccountId, AccrualError, AccumulatorState, FeeValue, LoggedRateChange, Result, RewardEntry, RewardEntryKey,
    RewardPool, RewardPoolId, StakeEntry, StakeEntryId, StakePool, SCALE,
};
use accrual_engine::{ClaimEngine, EngineConfig, EngineContext, ManualClock, MemoryVaults, PoolAdmin};
use accrual_storage::{MemoryStore, MemoryTable, RecordStore, RecordTable, Versioned};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ONE_TOKEN: u64 = 1_000_000_000;
const RATE: u64 = 2_500_000;

struct Harness {
    engine: Arc<ClaimEngine>,
    admin: PoolAdmin,
    vaults: Arc<MemoryVaults>,
    clock: Arc<ManualClock>,
    creator: AccountId,
    stake_pool: StakePool,
    reward_pool: RewardPool,
}

impl Harness {
    fn new() -> Self {
        Self::with(Arc::new(MemoryStore::new()), EngineConfig::default())
    }

    /// Stake pool with 1x weight everywhere, reward pool at 2.5M per 10s, no fund fee
    fn with(store: Arc<dyn RecordStore>, mut config: EngineConfig) -> Self {
        config.fees.fund_fee = 0;
        let vaults = Arc::new(MemoryVaults::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = EngineContext::new(store, vaults.clone(), clock.clone(), config).unwrap();
        let admin = PoolAdmin::new(ctx.clone());
        let creator = AccountId::from_label("creator");

        let stake_pool = admin
            .create_stake_pool(AccountId::from_label("mint"), creator, 0, 0, 1_000, SCALE)
            .unwrap();
        let reward_pool = admin
            .create_reward_pool(&stake_pool.id, creator, AccountId::from_label("reward-mint"), 0, RATE, 10)
            .unwrap();

        Self {
            engine: Arc::new(ClaimEngine::new(ctx)),
            admin,
            vaults,
            clock,
            creator,
            stake_pool,
            reward_pool,
        }
    }

    async fn fund(&self, amount: u64) {
        let funder = AccountId::from_label("funder");
        self.vaults.mint(&funder, amount).unwrap();
        self.admin.fund(&self.reward_pool.id, funder, amount).await.unwrap();
    }

    fn stake(&self, nonce: u32) -> StakeEntry {
        self.admin
            .open_stake(&self.stake_pool.id, owner(nonce), nonce, ONE_TOKEN, 0)
            .unwrap()
    }

    fn pool(&self) -> RewardPool {
        self.engine
            .context()
            .store
            .reward_pools()
            .get(&self.reward_pool.id)
            .unwrap()
            .record
    }

    fn entry(&self, stake: &StakeEntry) -> Option<Versioned<RewardEntry>> {
        let key = RewardEntryKey::new(self.reward_pool.id, stake.id);
        self.engine.context().store.reward_entries().get(&key)
    }
}

fn owner(nonce: u32) -> AccountId {
    AccountId::from_label(&format!("owner-{}", nonce))
}

#[tokio::test]
async fn test_claim_end_to_end() {
    let h = Harness::new();
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);

    h.clock.set(1_030);
    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    assert_eq!(receipt.amount, 7_500_000);
    assert!(receipt.created);
    assert_eq!(receipt.last_accounted_ts, 1_030);
    assert_eq!(receipt.state, AccumulatorState::Active);
    assert_eq!(h.vaults.balance(&owner(0)), 7_500_000);
    assert_eq!(h.pool().claimed_amount, 7_500_000);

    // partial period: nothing to pay, checkpoint stays
    h.clock.set(1_035);
    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    assert_eq!(receipt.amount, 0);
    assert_eq!(receipt.last_accounted_ts, 1_030);

    h.clock.set(1_040);
    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    assert_eq!(receipt.amount, RATE);
    assert_eq!(receipt.claimed_amount, 10_000_000);
    assert_eq!(h.vaults.balance(&owner(0)), 10_000_000);
    assert_eq!(h.vaults.balance(&h.reward_pool.id.vault()), ONE_TOKEN - 10_000_000);
    assert_eq!(h.engine.context().metrics.claims(), 3);
}

#[tokio::test]
async fn test_drained_pool_persists_nothing() {
    let h = Harness::new();
    h.fund(1_000).await;
    let stake = h.stake(0);

    h.clock.set(1_030);
    let err = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap_err();
    assert_eq!(
        err,
        AccrualError::RewardPoolDrained {
            requested: 7_500_000,
            available: 1_000
        }
    );
    assert!(err.is_recoverable());
    assert!(h.entry(&stake).is_none());
    assert_eq!(h.pool().claimed_amount, 0);
    assert_eq!(h.engine.context().metrics.failures("reward_pool_drained"), 1);

    // accrual is not lost once the pool is topped up
    h.fund(ONE_TOKEN).await;
    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    assert_eq!(receipt.amount, 7_500_000);
}

#[tokio::test]
async fn test_transfer_failure_rolls_back() {
    let h = Harness::new();
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);

    // new entry: removed again
    h.clock.set(1_030);
    h.vaults.fail_next(1);
    let err = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap_err();
    assert!(matches!(err, AccrualError::TransferFailed(_)));
    assert!(h.entry(&stake).is_none());
    assert_eq!(h.pool().claimed_amount, 0);

    h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    let before = h.entry(&stake).unwrap();

    // existing entry: restored to what it was
    h.clock.set(1_050);
    h.vaults.fail_next(1);
    assert!(h.engine.claim(&h.reward_pool.id, &stake.id).await.is_err());
    let after = h.entry(&stake).unwrap();
    assert_eq!(after.record, before.record);
    assert_eq!(h.pool().claimed_amount, 7_500_000);
    assert_eq!(h.vaults.balance(&owner(0)), 7_500_000);

    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    assert_eq!(receipt.amount, 5_000_000);
}

#[tokio::test]
async fn test_concurrent_claims_never_overdrain() {
    let h = Harness::new();
    let stakes: Vec<_> = (0..10).map(|n| h.stake(n)).collect();
    // enough for exactly four claims of 7.5M
    h.fund(30_000_000).await;
    h.clock.set(1_030);

    let handles: Vec<_> = stakes
        .iter()
        .map(|stake| {
            let engine = Arc::clone(&h.engine);
            let (pool, stake) = (h.reward_pool.id, stake.id);
            tokio::spawn(async move { engine.claim(&pool, &stake).await })
        })
        .collect();

    let mut paid = 0;
    let mut drained = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => paid += receipt.amount,
            Err(AccrualError::RewardPoolDrained { .. }) => drained += 1,
            Err(err) => panic!("unexpected error: {}", err),
        }
    }

    assert_eq!(paid, 30_000_000);
    assert_eq!(drained, 6);
    let pool = h.pool();
    assert_eq!(pool.claimed_amount, paid);
    assert_eq!(pool.available(), 0);
    assert_eq!(h.vaults.balance(&h.reward_pool.id.vault()), 0);
}

#[tokio::test]
async fn test_concurrent_claims_on_one_entry_pay_once() {
    let h = Harness::new();
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);
    h.clock.set(1_030);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&h.engine);
            let (pool, stake) = (h.reward_pool.id, stake.id);
            tokio::spawn(async move { engine.claim(&pool, &stake).await })
        })
        .collect();

    let mut paid = 0;
    for handle in handles {
        paid += handle.await.unwrap().unwrap().amount;
    }
    assert_eq!(paid, 7_500_000);
    assert_eq!(h.vaults.balance(&owner(0)), 7_500_000);
    assert_eq!(h.entry(&stake).unwrap().record.claimed_amount, 7_500_000);
}

#[tokio::test]
async fn test_closed_stake_stops_accruing() {
    let h = Harness::new();
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);

    h.clock.set(1_025);
    h.admin.close_stake(&stake.id, owner(0)).await.unwrap();
    h.clock.set(2_000);

    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    assert_eq!(receipt.amount, 5_000_000);
    assert_eq!(receipt.horizon_ts, 1_025);
    assert_eq!(receipt.state, AccumulatorState::Closed);

    h.clock.set(3_000);
    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    assert_eq!(receipt.amount, 0);
}

#[tokio::test]
async fn test_rate_update_mid_stream() {
    let h = Harness::new();
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);

    h.clock.set(1_015);
    assert!(h.admin.update_reward_amount(&h.reward_pool.id, h.creator, 2 * RATE).await.unwrap());

    h.clock.set(1_040);
    let preview = h.engine.preview(&h.reward_pool.id, &stake.id).unwrap();
    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    // [1000, 1010] at the old rate, [1010, 1040] at the new one
    assert_eq!(receipt.amount, 17_500_000);
    assert_eq!(preview.claimable, receipt.amount);
    assert_eq!(h.entry(&stake).unwrap().record.rate_cursor, 1);
}

#[tokio::test]
async fn test_stake_from_other_pool_rejected() {
    let h = Harness::new();
    let other_pool = h
        .admin
        .create_stake_pool(AccountId::from_label("other-mint"), h.creator, 1, 0, 10, SCALE)
        .unwrap();
    let stake = h
        .admin
        .open_stake(&other_pool.id, owner(0), 0, ONE_TOKEN, 0)
        .unwrap();

    assert!(matches!(
        h.engine.claim(&h.reward_pool.id, &stake.id).await,
        Err(AccrualError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_close_waits_for_stake_lock() {
    let h = Harness::new();
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);
    h.clock.set(1_040);

    let ctx = h.engine.context().clone();
    let held = ctx.locks.stakes.lock(stake.id).await;
    let close = {
        let admin = PoolAdmin::new(ctx.clone());
        let id = stake.id;
        tokio::spawn(async move { admin.close_stake(&id, owner(0)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!close.is_finished());
    assert!(!h.engine.context().store.stake_entries().get(&stake.id).unwrap().record.is_closed());

    drop(held);
    assert_eq!(close.await.unwrap().unwrap().closed_ts, 1_040);
    assert!(ctx.locks.stakes.is_empty());
}

#[tokio::test]
async fn test_long_rate_history() {
    let h = Harness::new();
    h.fund(5 * ONE_TOKEN).await;
    let stake = h.stake(0);

    let mut paid = 0;
    for i in 1..=1_100u64 {
        h.clock.set(1_000 + 10 * i);
        let amount = if i % 2 == 1 { 2 * RATE } else { RATE };
        assert!(h.admin.update_reward_amount(&h.reward_pool.id, h.creator, amount).await.unwrap());

        if i == 500 {
            let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
            // the first period at RATE, then 250 periods at 2x and 249 at 1x
            assert_eq!(receipt.amount, 750 * RATE);
            paid += receipt.amount;
        }
    }

    h.clock.set(12_010);
    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    paid += receipt.amount;
    assert_eq!(paid, 1_651 * RATE);
    assert_eq!(h.vaults.balance(&owner(0)), paid);
    assert_eq!(h.pool().rate_version, 1_100);
    assert_eq!(h.entry(&stake).unwrap().record.rate_cursor, 1_100);
    assert_eq!(h.engine.context().store.rate_log().len(), 1_100);
}

#[tokio::test]
async fn test_unstake_and_claim_pays_every_reward_pool() {
    let h = Harness::new();
    h.fund(ONE_TOKEN).await;
    let second = h
        .admin
        .create_reward_pool(&h.stake_pool.id, h.creator, AccountId::from_label("bonus-mint"), 0, 2 * RATE, 10)
        .unwrap();
    let funder = AccountId::from_label("funder");
    h.vaults.mint(&funder, ONE_TOKEN).unwrap();
    h.admin.fund(&second.id, funder, ONE_TOKEN).await.unwrap();
    let stake = h.stake(0);

    h.clock.set(1_030);
    let err = h.engine.unstake_and_claim(&stake.id, owner(1)).await.unwrap_err();
    assert!(matches!(err, AccrualError::Unauthorized(_)));

    let receipt = h.engine.unstake_and_claim(&stake.id, owner(0)).await.unwrap();
    assert_eq!(receipt.stake.closed_ts, 1_030);
    assert_eq!(receipt.claims.len(), 2);
    let paid: u64 = receipt.claims.iter().map(|c| c.amount).sum();
    assert_eq!(paid, 7_500_000 + 15_000_000);
    assert_eq!(h.vaults.balance(&owner(0)), paid);

    // nothing accrues past the close
    h.clock.set(1_100);
    let later = h.engine.claim(&second.id, &stake.id).await.unwrap();
    assert_eq!(later.amount, 0);
    assert_eq!(later.state, AccumulatorState::Closed);
}

#[tokio::test]
async fn test_close_reward_entry_forfeits_and_blocks_reclaim() {
    let h = Harness::new();
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);

    h.clock.set(1_030);
    h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();
    let err = h
        .engine
        .close_reward_entry(&h.reward_pool.id, &stake.id, owner(0))
        .await
        .unwrap_err();
    assert!(matches!(err, AccrualError::StakeEntryOpen(_)));

    h.clock.set(1_050);
    h.admin.close_stake(&stake.id, owner(0)).await.unwrap();
    let closed = h
        .engine
        .close_reward_entry(&h.reward_pool.id, &stake.id, owner(0))
        .await
        .unwrap();
    assert_eq!(closed.claimed_amount, 7_500_000);
    assert!(h.entry(&stake).is_none());

    // the 5M accrued between 1030 and 1050 is gone; a fresh entry would pay from 1000 again
    let err = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap_err();
    assert_eq!(err.reason(), "reward_entry_closed");
    assert!(h.entry(&stake).is_none());
    assert_eq!(h.pool().claimed_amount, 7_500_000);
    assert!(h
        .engine
        .close_reward_entry(&h.reward_pool.id, &stake.id, owner(0))
        .await
        .is_err());
}

#[tokio::test]
async fn test_fee_override_applies_to_funder() {
    let authority = AccountId::from_label("fees");
    let mut config = EngineConfig::default();
    config.fees.fee_authority = Some(authority.to_hex());
    let h = Harness::with(Arc::new(MemoryStore::new()), config);
    let funder = AccountId::from_label("funder");

    assert!(h.admin.write_fee(funder, funder, 0).is_err());
    let value = h.admin.write_fee(authority, funder, 500).unwrap();
    assert_eq!(value, FeeValue::new(funder, 500).unwrap());
    h.vaults.mint(&funder, 10_000).unwrap();
    let receipt = h.admin.fund(&h.reward_pool.id, funder, 10_000).await.unwrap();
    assert_eq!((receipt.funded, receipt.fee, receipt.fee_rate), (9_500, 500, 500));

    // other funders keep the default
    assert_eq!(h.admin.fund_fee(&AccountId::from_label("someone")), 0);
}

#[tokio::test]
async fn test_claims_leave_no_locks_behind() {
    let h = Harness::new();
    h.fund(ONE_TOKEN).await;
    let stakes: Vec<_> = (0..4).map(|n| h.stake(n)).collect();
    h.clock.set(1_030);

    let handles: Vec<_> = stakes
        .iter()
        .map(|stake| {
            let engine = Arc::clone(&h.engine);
            let (pool, stake) = (h.reward_pool.id, stake.id);
            tokio::spawn(async move { engine.claim(&pool, &stake).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(h.engine.context().locks.stakes.is_empty());
}

/// Reward pool table that lets an authority update slip in right after a read
struct RacingPools {
    inner: MemoryTable<RewardPool>,
    log: MemoryTable<LoggedRateChange>,
    armed: AtomicBool,
    new_amount: u64,
}

impl RecordTable<RewardPool> for RacingPools {
    fn get(&self, key: &RewardPoolId) -> Option<Versioned<RewardPool>> {
        let row = self.inner.get(key)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            let mut pool = row.record.clone();
            let ts = pool.created_ts + 15;
            let logged = pool.update_reward_amount(self.new_amount, ts).ok()??;
            self.log.create(logged).ok()?;
            self.inner.compare_and_swap(row.version, pool).ok()?;
        }
        Some(row)
    }

    fn create(&self, record: RewardPool) -> Result<u64> {
        self.inner.create(record)
    }

    fn compare_and_swap(&self, expected_version: u64, record: RewardPool) -> Result<u64> {
        self.inner.compare_and_swap(expected_version, record)
    }

    fn remove(&self, key: &RewardPoolId) -> Option<Versioned<RewardPool>> {
        self.inner.remove(key)
    }

    fn snapshot(&self) -> Vec<Versioned<RewardPool>> {
        self.inner.snapshot()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Stake table that lets a close from outside the engine land right after a read
struct RacingStakes {
    inner: MemoryTable<StakeEntry>,
    armed: AtomicBool,
    close_ts: u64,
}

impl RecordTable<StakeEntry> for RacingStakes {
    fn get(&self, key: &StakeEntryId) -> Option<Versioned<StakeEntry>> {
        let row = self.inner.get(key)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            let mut stake = row.record.clone();
            stake.close(self.close_ts).ok()?;
            self.inner.compare_and_swap(row.version, stake).ok()?;
        }
        Some(row)
    }

    fn create(&self, record: StakeEntry) -> Result<u64> {
        self.inner.create(record)
    }

    fn compare_and_swap(&self, expected_version: u64, record: StakeEntry) -> Result<u64> {
        self.inner.compare_and_swap(expected_version, record)
    }

    fn remove(&self, key: &StakeEntryId) -> Option<Versioned<StakeEntry>> {
        self.inner.remove(key)
    }

    fn snapshot(&self) -> Vec<Versioned<StakeEntry>> {
        self.inner.snapshot()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Reward entry table whose removes can be made to fail
struct FlakyEntries {
    inner: MemoryTable<RewardEntry>,
    fail_remove: AtomicBool,
}

impl RecordTable<RewardEntry> for FlakyEntries {
    fn get(&self, key: &RewardEntryKey) -> Option<Versioned<RewardEntry>> {
        self.inner.get(key)
    }

    fn create(&self, record: RewardEntry) -> Result<u64> {
        self.inner.create(record)
    }

    fn compare_and_swap(&self, expected_version: u64, record: RewardEntry) -> Result<u64> {
        self.inner.compare_and_swap(expected_version, record)
    }

    fn remove(&self, key: &RewardEntryKey) -> Option<Versioned<RewardEntry>> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return None;
        }
        self.inner.remove(key)
    }

    fn snapshot(&self) -> Vec<Versioned<RewardEntry>> {
        self.inner.snapshot()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

struct RacingStore {
    base: MemoryStore,
    pools: RacingPools,
    stakes: RacingStakes,
    entries: FlakyEntries,
}

impl RecordStore for RacingStore {
    fn stake_pools(&self) -> &dyn RecordTable<StakePool> {
        self.base.stake_pools()
    }

    fn stake_entries(&self) -> &dyn RecordTable<StakeEntry> {
        &self.stakes
    }

    fn reward_pools(&self) -> &dyn RecordTable<RewardPool> {
        &self.pools
    }

    fn reward_entries(&self) -> &dyn RecordTable<RewardEntry> {
        &self.entries
    }

    fn rate_log(&self) -> &dyn RecordTable<LoggedRateChange> {
        &self.pools.log
    }

    fn fee_values(&self) -> &dyn RecordTable<FeeValue> {
        self.base.fee_values()
    }
}

fn racing_store() -> Arc<RacingStore> {
    Arc::new(RacingStore {
        base: MemoryStore::new(),
        pools: RacingPools {
            inner: MemoryTable::new(),
            log: MemoryTable::new(),
            armed: AtomicBool::new(false),
            new_amount: 2 * RATE,
        },
        stakes: RacingStakes {
            inner: MemoryTable::new(),
            armed: AtomicBool::new(false),
            close_ts: 1_025,
        },
        entries: FlakyEntries {
            inner: MemoryTable::new(),
            fail_remove: AtomicBool::new(false),
        },
    })
}

#[tokio::test]
async fn test_stale_snapshot_is_retried() {
    let store = racing_store();
    let h = Harness::with(store.clone(), EngineConfig::default());
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);

    h.clock.set(1_040);
    store.pools.armed.store(true, Ordering::SeqCst);
    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();

    // second attempt sees the update at 1015
    assert_eq!(receipt.amount, 17_500_000);
    assert_eq!(h.pool().rate_version, 1);
    assert_eq!(h.pool().claimed_amount, 17_500_000);
}

#[tokio::test]
async fn test_stale_snapshot_without_retries_fails_clean() {
    let store = racing_store();
    let mut config = EngineConfig::default();
    config.accrual.stale_snapshot_retries = 0;
    let h = Harness::with(store.clone(), config);
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);

    h.clock.set(1_040);
    store.pools.armed.store(true, Ordering::SeqCst);
    let err = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap_err();

    assert_eq!(err, AccrualError::StaleRateSnapshot { observed: 0, current: 1 });
    assert!(h.entry(&stake).is_none());
    assert_eq!(h.pool().claimed_amount, 0);
    assert_eq!(h.engine.context().metrics.failures("stale_rate_snapshot"), 1);
}

#[tokio::test]
async fn test_close_behind_claim_is_retried() {
    let store = racing_store();
    let h = Harness::with(store.clone(), EngineConfig::default());
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);

    h.clock.set(1_040);
    store.stakes.armed.store(true, Ordering::SeqCst);
    let receipt = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap();

    // the close at 1025 wins over the first attempt's accrual to 1040
    assert_eq!(receipt.amount, 5_000_000);
    assert_eq!(receipt.horizon_ts, 1_025);
    assert_eq!(receipt.state, AccumulatorState::Closed);
    assert_eq!(h.pool().claimed_amount, 5_000_000);
    assert_eq!(h.vaults.balance(&owner(0)), 5_000_000);
}

#[tokio::test]
async fn test_close_behind_claim_without_retries_fails_clean() {
    let store = racing_store();
    let mut config = EngineConfig::default();
    config.accrual.stale_snapshot_retries = 0;
    let h = Harness::with(store.clone(), config);
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);

    h.clock.set(1_040);
    store.stakes.armed.store(true, Ordering::SeqCst);
    let err = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap_err();

    assert_eq!(err, AccrualError::StaleStakeSnapshot { observed: 1, current: 2 });
    assert!(err.is_recoverable());
    assert!(h.entry(&stake).is_none());
    assert_eq!(h.pool().claimed_amount, 0);
    assert_eq!(h.vaults.balance(&owner(0)), 0);
}

#[tokio::test]
async fn test_failed_rollback_is_reported() {
    let store = racing_store();
    let h = Harness::with(store.clone(), EngineConfig::default());
    h.fund(ONE_TOKEN).await;
    let stake = h.stake(0);

    h.clock.set(1_030);
    store.entries.fail_remove.store(true, Ordering::SeqCst);
    h.vaults.fail_next(1);
    let err = h.engine.claim(&h.reward_pool.id, &stake.id).await.unwrap_err();

    assert!(matches!(err, AccrualError::RollbackFailed { amount: 7_500_000, .. }));
    assert!(!err.is_recoverable());
    assert_eq!(err.reason(), "rollback_failed");
    // the entry could not be removed, so the reservation stays with it
    assert_eq!(h.entry(&stake).unwrap().record.claimed_amount, 7_500_000);
    assert_eq!(h.pool().claimed_amount, 7_500_000);
    assert_eq!(h.vaults.balance(&owner(0)), 0);
    assert_eq!(h.engine.context().metrics.failures("rollback_failed"), 1);
}
