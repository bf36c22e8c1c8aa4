//! # Accrual Engine
//!
//! Claims and pool administration on top of the accrual core.
//!
//! ## Claim pipeline
//!
//! ```text
//!  snapshot ──► accrue ──► reserve on pool ──► persist entry ──► stake unchanged? ──► transfer
//!                          (CAS: version,      (create / CAS)          │                  │
//!                           availability)                              │ no               │ failure
//!                               ▲                                      ▼                  ▼
//!                               └──────── release ◄──────── restore entry ◄───────────────┘
//! ```
//!
//! Claims, closes and reward entry closes on one stake entry are serialized
//! by a per-stake lock, rate updates by a per-pool lock. Claims against
//! different stakes only meet on the reward pool record, where the
//! availability check and the deduction are a single compare-and-swap.

pub mod admin;
pub mod claim;
pub mod clock;
pub mod config;
pub mod lock;
pub mod metrics;
pub mod transfer;

use accrual_core::Result;
use accrual_storage::RecordStore;
use std::sync::Arc;

// Re-exports
pub use admin::{FundReceipt, PoolAdmin};
pub use claim::{ClaimEngine, ClaimPreview, ClaimReceipt, UnstakeReceipt};
pub use clock::{ManualClock, SystemClock, TimeSource};
pub use config::EngineConfig;
pub use lock::{EngineLocks, KeyedLocks};
pub use metrics::ClaimMetrics;
pub use transfer::{MemoryVaults, TokenTransfer};

/// Shared handles every engine component runs against
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn RecordStore>,
    pub transfer: Arc<dyn TokenTransfer>,
    pub clock: Arc<dyn TimeSource>,
    pub config: Arc<EngineConfig>,
    pub metrics: Arc<ClaimMetrics>,
    pub locks: Arc<EngineLocks>,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transfer: Arc<dyn TokenTransfer>,
        clock: Arc<dyn TimeSource>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            transfer,
            clock,
            config: Arc::new(config),
            metrics: Arc::new(ClaimMetrics::new()?),
            locks: Arc::new(EngineLocks::default()),
        })
    }
}
