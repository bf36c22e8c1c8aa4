//! # Accrual Storage
//!
//! Versioned record store for the accrual engine.
//!
//! ## Storage Layout
//!
//! - `stake_pools` - weight curves, keyed by `StakePoolId`
//! - `stake_entries` - staked positions, keyed by `StakeEntryId`
//! - `reward_pools` - rate, period and funding, keyed by `RewardPoolId`
//! - `reward_entries` - accumulator state, keyed by (reward pool, stake entry)
//! - `rate_log` - append-only rate changes, keyed by (reward pool, seq)
//! - `fee_values` - per-funder fee overrides, keyed by funder account
//!
//! Every record carries a version. Writers replace a record only through
//! compare-and-swap against the version they read, so two writers racing on
//! the same record cannot both succeed.

pub mod record {
    //! Record trait, versioned rows and the table interface

    use accrual_core::{
        AccountId, AccrualError, FeeValue, LoggedRateChange, RateChange, RateLogKey, Result, RewardEntry,
        RewardEntryKey, RewardPool, RewardPoolId, StakeEntry, StakeEntryId, StakePool, StakePoolId,
    };
    use std::ops::Range;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::hash::Hash;

    /// A storable record with a stable key
    pub trait Record: Clone + Send + Sync + 'static {
        type Key: Copy + Eq + Hash + fmt::Display + Send + Sync + 'static;

        /// Human-readable record kind for errors and logs
        const KIND: &'static str;

        fn key(&self) -> Self::Key;
    }

    impl Record for StakePool {
        type Key = StakePoolId;
        const KIND: &'static str = "stake pool";

        fn key(&self) -> StakePoolId {
            self.id
        }
    }

    impl Record for StakeEntry {
        type Key = StakeEntryId;
        const KIND: &'static str = "stake entry";

        fn key(&self) -> StakeEntryId {
            self.id
        }
    }

    impl Record for RewardPool {
        type Key = RewardPoolId;
        const KIND: &'static str = "reward pool";

        fn key(&self) -> RewardPoolId {
            self.id
        }
    }

    impl Record for RewardEntry {
        type Key = RewardEntryKey;
        const KIND: &'static str = "reward entry";

        fn key(&self) -> RewardEntryKey {
            RewardEntry::key(self)
        }
    }

    impl Record for LoggedRateChange {
        type Key = RateLogKey;
        const KIND: &'static str = "rate change";

        fn key(&self) -> RateLogKey {
            LoggedRateChange::key(self)
        }
    }

    impl Record for FeeValue {
        type Key = AccountId;
        const KIND: &'static str = "fee value";

        fn key(&self) -> AccountId {
            self.target
        }
    }

    /// A record together with its version (1 on creation)
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Versioned<R> {
        pub version: u64,
        pub record: R,
    }

    /// Read/create/compare-and-swap access to one record kind
    pub trait RecordTable<R: Record>: Send + Sync {
        fn get(&self, key: &R::Key) -> Option<Versioned<R>>;

        /// Insert a new record, failing if the key already exists. Returns version 1.
        fn create(&self, record: R) -> Result<u64>;

        /// Replace the record if its version still equals `expected_version`
        fn compare_and_swap(&self, expected_version: u64, record: R) -> Result<u64>;

        fn remove(&self, key: &R::Key) -> Option<Versioned<R>>;

        /// All records, unordered
        fn snapshot(&self) -> Vec<Versioned<R>>;

        fn len(&self) -> usize;

        fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    pub fn not_found<R: Record>(key: &R::Key) -> AccrualError {
        AccrualError::RecordNotFound(format!("{} {}", R::KIND, key))
    }

    pub fn conflict<R: Record>(key: &R::Key, detail: &str) -> AccrualError {
        AccrualError::RecordConflict(format!("{} {}: {}", R::KIND, key, detail))
    }

    /// Get a record or fail with `RecordNotFound`
    pub fn fetch<R: Record>(table: &dyn RecordTable<R>, key: &R::Key) -> Result<Versioned<R>> {
        table.get(key).ok_or_else(|| not_found::<R>(key))
    }

    /// Rate changes `seqs` of `reward_pool`'s log, in order
    ///
    /// Fails with `RecordNotFound` on the first missing position.
    pub fn read_rate_log(
        table: &dyn RecordTable<LoggedRateChange>,
        reward_pool: &RewardPoolId,
        seqs: Range<u64>,
    ) -> Result<Vec<RateChange>> {
        seqs.map(|seq| fetch(table, &RateLogKey::new(*reward_pool, seq)).map(|row| row.record.change))
            .collect()
    }

    /// Read-modify-write with compare-and-swap, retried up to `max_retries` times on conflict
    ///
    /// `f` sees the latest record on every attempt and may run more than once.
    pub fn update<R, T, F>(
        table: &dyn RecordTable<R>,
        key: &R::Key,
        max_retries: usize,
        mut f: F,
    ) -> Result<(T, Versioned<R>)>
    where
        R: Record,
        F: FnMut(&mut R) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            let current = fetch(table, key)?;
            let mut record = current.record;
            let value = f(&mut record)?;

            match table.compare_and_swap(current.version, record.clone()) {
                Ok(version) => return Ok((value, Versioned { version, record })),
                Err(AccrualError::RecordConflict(detail)) if attempt < max_retries => {
                    attempt += 1;
                    tracing::debug!(kind = R::KIND, %key, attempt, %detail, "Retrying update");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub mod memory {
    //! Concurrent in-memory tables

    use super::record::{conflict, not_found, Record, RecordTable, Versioned};
    use super::RecordStore;
    use accrual_core::{FeeValue, LoggedRateChange, Result, RewardEntry, RewardPool, StakeEntry, StakePool};
    use parking_lot::RwLock;
    use std::collections::HashMap;

    /// In-memory table; each call holds the lock for its duration only
    pub struct MemoryTable<R: Record> {
        rows: RwLock<HashMap<R::Key, Versioned<R>>>,
    }

    impl<R: Record> MemoryTable<R> {
        pub fn new() -> Self {
            Self {
                rows: RwLock::new(HashMap::new()),
            }
        }
    }

    impl<R: Record> Default for MemoryTable<R> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<R: Record> RecordTable<R> for MemoryTable<R> {
        fn get(&self, key: &R::Key) -> Option<Versioned<R>> {
            self.rows.read().get(key).cloned()
        }

        fn create(&self, record: R) -> Result<u64> {
            let key = record.key();
            let mut rows = self.rows.write();
            if rows.contains_key(&key) {
                return Err(conflict::<R>(&key, "already exists"));
            }
            rows.insert(key, Versioned { version: 1, record });
            Ok(1)
        }

        fn compare_and_swap(&self, expected_version: u64, record: R) -> Result<u64> {
            let key = record.key();
            let mut rows = self.rows.write();
            let row = rows.get_mut(&key).ok_or_else(|| not_found::<R>(&key))?;
            if row.version != expected_version {
                return Err(conflict::<R>(
                    &key,
                    &format!("expected version {}, found {}", expected_version, row.version),
                ));
            }
            row.version += 1;
            row.record = record;
            Ok(row.version)
        }

        fn remove(&self, key: &R::Key) -> Option<Versioned<R>> {
            self.rows.write().remove(key)
        }

        fn snapshot(&self) -> Vec<Versioned<R>> {
            self.rows.read().values().cloned().collect()
        }

        fn len(&self) -> usize {
            self.rows.read().len()
        }
    }

    /// Every record kind held in memory
    #[derive(Default)]
    pub struct MemoryStore {
        stake_pools: MemoryTable<StakePool>,
        stake_entries: MemoryTable<StakeEntry>,
        reward_pools: MemoryTable<RewardPool>,
        reward_entries: MemoryTable<RewardEntry>,
        rate_log: MemoryTable<LoggedRateChange>,
        fee_values: MemoryTable<FeeValue>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl RecordStore for MemoryStore {
        fn stake_pools(&self) -> &dyn RecordTable<StakePool> {
            &self.stake_pools
        }

        fn stake_entries(&self) -> &dyn RecordTable<StakeEntry> {
            &self.stake_entries
        }

        fn reward_pools(&self) -> &dyn RecordTable<RewardPool> {
            &self.reward_pools
        }

        fn reward_entries(&self) -> &dyn RecordTable<RewardEntry> {
            &self.reward_entries
        }

        fn rate_log(&self) -> &dyn RecordTable<LoggedRateChange> {
            &self.rate_log
        }

        fn fee_values(&self) -> &dyn RecordTable<FeeValue> {
            &self.fee_values
        }
    }
}

use accrual_core::{FeeValue, LoggedRateChange, RewardEntry, RewardPool, StakeEntry, StakePool};

/// The record store the engine runs against
pub trait RecordStore: Send + Sync + 'static {
    fn stake_pools(&self) -> &dyn RecordTable<StakePool>;
    fn stake_entries(&self) -> &dyn RecordTable<StakeEntry>;
    fn reward_pools(&self) -> &dyn RecordTable<RewardPool>;
    fn reward_entries(&self) -> &dyn RecordTable<RewardEntry>;
    fn rate_log(&self) -> &dyn RecordTable<LoggedRateChange>;
    fn fee_values(&self) -> &dyn RecordTable<FeeValue>;
}

// Re-export for convenience
pub use memory::{MemoryStore, MemoryTable};
pub use record::{fetch, read_rate_log, update, Record, RecordTable, Versioned};
