//! Token transfer primitive
//!
//! Transfers fail closed: on error no tokens have moved.

use accrual_core::{AccountId, AccrualError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Moves reward tokens between accounts
#[async_trait]
pub trait TokenTransfer: Send + Sync {
    async fn transfer(&self, from: &AccountId, to: &AccountId, amount: u64) -> Result<()>;
}

#[derive(Default)]
struct Ledger {
    balances: HashMap<AccountId, u64>,
    /// Transfers let through before rejections start
    passes: usize,
    /// Remaining transfers to reject
    failures: usize,
}

/// In-memory token ledger
#[derive(Default)]
pub struct MemoryVaults {
    ledger: Mutex<Ledger>,
}

impl MemoryVaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` out of thin air (test and simulation funding)
    pub fn mint(&self, account: &AccountId, amount: u64) -> Result<()> {
        let mut ledger = self.ledger.lock();
        let balance = ledger.balances.entry(*account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(AccrualError::ArithmeticOverflow)?;
        Ok(())
    }

    pub fn balance(&self, account: &AccountId) -> u64 {
        self.ledger.lock().balances.get(account).copied().unwrap_or(0)
    }

    /// Reject the next `count` transfers
    pub fn fail_next(&self, count: usize) {
        let mut ledger = self.ledger.lock();
        ledger.passes = 0;
        ledger.failures = count;
    }

    /// Let `passes` transfers through, then reject one
    pub fn fail_after(&self, passes: usize) {
        let mut ledger = self.ledger.lock();
        ledger.passes = passes;
        ledger.failures = 1;
    }
}

#[async_trait]
impl TokenTransfer for MemoryVaults {
    async fn transfer(&self, from: &AccountId, to: &AccountId, amount: u64) -> Result<()> {
        let mut ledger = self.ledger.lock();
        if ledger.failures > 0 && ledger.passes > 0 {
            ledger.passes -= 1;
        } else if ledger.failures > 0 {
            ledger.failures -= 1;
            return Err(AccrualError::TransferFailed(format!("{} -> {}: rejected", from, to)));
        }

        let available = ledger.balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(AccrualError::TransferFailed(format!(
                "{} -> {}: insufficient balance {} < {}",
                from, to, available, amount
            )));
        }
        let received = ledger.balances.get(to).copied().unwrap_or(0);
        let received = received
            .checked_add(amount)
            .ok_or(AccrualError::ArithmeticOverflow)?;

        ledger.balances.insert(*from, available - amount);
        ledger.balances.insert(*to, received);
        Ok(())
    }
}
