//! Error types for reward accrual and claims

use thiserror::Error;

/// Result type alias for accrual operations
pub type Result<T> = std::result::Result<T, AccrualError>;

/// Errors that can occur while accruing or claiming rewards
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccrualError {
    // === Accrual ===
    /// Reward entry was created before its stake entry
    #[error("Invalid reward entry: created at {entry_created_ts}, stake entry created at {stake_created_ts}")]
    InvalidRewardEntry {
        entry_created_ts: u64,
        stake_created_ts: u64,
    },

    /// An intermediate product or sum exceeded its integer width
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    /// Claimable amount exceeds what is left in the pool
    #[error("Reward pool drained: requested {requested}, available {available}")]
    RewardPoolDrained { requested: u64, available: u64 },

    /// Pool rate fields changed between snapshot and commit
    #[error("Stale rate snapshot: observed version {observed}, current version {current}")]
    StaleRateSnapshot { observed: u64, current: u64 },

    /// Stake entry changed between snapshot and commit
    #[error("Stale stake snapshot: observed version {observed}, current version {current}")]
    StaleStakeSnapshot { observed: u64, current: u64 },

    /// Payout larger than the credited, unclaimed reward
    #[error("Claim of {requested} exceeds claimable {claimable}")]
    ClaimExceedsAccrued { requested: u64, claimable: u64 },

    /// Rate changes handed to the accumulator do not cover its cursor up to the pool version
    #[error("Rate log mismatch: cursor {cursor}, {loaded} changes loaded, pool version {version}")]
    RateLogMismatch { cursor: u64, loaded: u64, version: u64 },

    /// Reward period must be non-zero
    #[error("Invalid reward period: {0}")]
    InvalidRewardPeriod(u64),

    // === Pools and entries ===
    /// Stake duration outside of the pool bounds
    #[error("Invalid duration {duration}: must be within [{min}, {max}]")]
    InvalidDuration { duration: u64, min: u64, max: u64 },

    /// Max weight below 1x
    #[error("Invalid max weight: {0}")]
    InvalidWeight(u64),

    /// Rate updates must not go back in time
    #[error("Invalid timestamp {ts}: last update at {last}")]
    InvalidTimestamp { ts: u64, last: u64 },

    /// Stake entry already closed
    #[error("Stake entry already closed at {0}")]
    AlreadyClosed(u64),

    /// Stake entry must be closed first
    #[error("Stake entry still open: {0}")]
    StakeEntryOpen(String),

    /// Reward entry was closed and cannot be recreated
    #[error("Reward entry closed: {0}")]
    RewardEntryClosed(String),

    /// Fee above `FEE_PRECISION`
    #[error("Invalid fee: {0}")]
    InvalidFee(u64),

    /// Caller is not the pool authority
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate could not be converted
    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    // === Store and transfer ===
    /// Record not found in the store
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Record already exists or was modified concurrently
    #[error("Record conflict: {0}")]
    RecordConflict(String),

    /// Token transfer failed, nothing was moved
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// A failed claim could not be undone; the entry keeps the payout and the pool keeps the reservation
    #[error("Rollback failed for {entry} ({amount} reserved): {cause}")]
    RollbackFailed { entry: String, amount: u64, cause: String },

    // === General ===
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AccrualError {
    /// Numeric error code for API responses
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidRewardEntry { .. } => 2001,
            Self::ArithmeticOverflow => 2002,
            Self::RewardPoolDrained { .. } => 2003,
            Self::StaleRateSnapshot { .. } => 2004,
            Self::InvalidRewardPeriod(_) => 2005,
            Self::InvalidDuration { .. } | Self::InvalidWeight(_) => 2006,
            Self::InvalidTimestamp { .. } => 2007,
            Self::AlreadyClosed(_) => 2008,
            Self::Unauthorized(_) => 2009,
            Self::ClaimExceedsAccrued { .. } => 2010,
            Self::StaleStakeSnapshot { .. } => 2011,
            Self::RateLogMismatch { .. } => 2012,
            Self::StakeEntryOpen(_) | Self::RewardEntryClosed(_) => 2013,
            Self::InvalidFee(_) => 2014,
            Self::RecordNotFound(_) => 3001,
            Self::RecordConflict(_) => 3002,
            Self::TransferFailed(_) => 3003,
            Self::RollbackFailed { .. } => 3004,
            _ => 9999,
        }
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RewardPoolDrained { .. }
                | Self::StaleRateSnapshot { .. }
                | Self::StaleStakeSnapshot { .. }
                | Self::RecordConflict(_)
                | Self::TransferFailed(_)
        )
    }

    /// Short label used for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidRewardEntry { .. } => "invalid_reward_entry",
            Self::ArithmeticOverflow => "arithmetic_overflow",
            Self::RewardPoolDrained { .. } => "reward_pool_drained",
            Self::StaleRateSnapshot { .. } => "stale_rate_snapshot",
            Self::StaleStakeSnapshot { .. } => "stale_stake_snapshot",
            Self::ClaimExceedsAccrued { .. } => "claim_exceeds_accrued",
            Self::RateLogMismatch { .. } => "rate_log_mismatch",
            Self::RewardEntryClosed(_) => "reward_entry_closed",
            Self::RecordNotFound(_) => "record_not_found",
            Self::RecordConflict(_) => "record_conflict",
            Self::TransferFailed(_) => "transfer_failed",
            Self::RollbackFailed { .. } => "rollback_failed",
            _ => "other",
        }
    }
}
