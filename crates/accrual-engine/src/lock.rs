//! Keyed async locks
//!
//! Claims, stake closes and reward entry closes on one stake entry take the
//! same stake lock; rate updates on one reward pool take its pool lock. A lock
//! is dropped from its map once nobody holds or waits on it.

use accrual_core::{RewardPoolId, StakeEntryId};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key
pub struct KeyedLocks<K: Copy + Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Copy + Eq + Hash> KeyedLocks<K> {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Wait for the lock of `key`
    pub async fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let lock = self.locks.entry(key).or_default().clone();
        let guard = lock.clone().lock_owned().await;
        KeyedGuard {
            locks: self,
            key,
            lock,
            guard: Some(guard),
        }
    }

    /// Keys with a live lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Copy + Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Held lock; releases and prunes on drop
pub struct KeyedGuard<'a, K: Copy + Eq + Hash> {
    locks: &'a KeyedLocks<K>,
    key: K,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Copy + Eq + Hash> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        // the map and this guard hold the last two handles
        let lock = &self.lock;
        self.locks
            .locks
            .remove_if(&self.key, |_, held| Arc::ptr_eq(held, lock) && Arc::strong_count(held) == 2);
    }
}

/// Every lock family the engine uses
#[derive(Default)]
pub struct EngineLocks {
    pub stakes: KeyedLocks<StakeEntryId>,
    pub pools: KeyedLocks<RewardPoolId>,
}
