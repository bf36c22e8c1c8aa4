//! Prometheus claim metrics

use accrual_core::{AccrualError, Result, RewardPoolId};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Claim counters, registered in their own registry
pub struct ClaimMetrics {
    registry: Registry,
    claims_total: IntCounter,
    claim_failures_total: IntCounterVec,
    rewards_claimed_total: IntCounter,
    pool_available: IntGaugeVec,
}

impl ClaimMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let claims_total = IntCounter::new("accrual_claims_total", "Committed claims").map_err(metrics_error)?;
        let claim_failures_total = IntCounterVec::new(
            Opts::new("accrual_claim_failures_total", "Rejected or rolled back claims"),
            &["reason"],
        )
        .map_err(metrics_error)?;
        let rewards_claimed_total =
            IntCounter::new("accrual_rewards_claimed_total", "Reward tokens paid out").map_err(metrics_error)?;
        let pool_available = IntGaugeVec::new(
            Opts::new("accrual_pool_available", "Funded but unclaimed reward tokens"),
            &["pool"],
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(claims_total.clone())).map_err(metrics_error)?;
        registry
            .register(Box::new(claim_failures_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(rewards_claimed_total.clone()))
            .map_err(metrics_error)?;
        registry.register(Box::new(pool_available.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            claims_total,
            claim_failures_total,
            rewards_claimed_total,
            pool_available,
        })
    }

    pub fn record_claim(&self, amount: u64) {
        self.claims_total.inc();
        self.rewards_claimed_total.inc_by(amount);
    }

    pub fn record_failure(&self, err: &AccrualError) {
        self.claim_failures_total.with_label_values(&[err.reason()]).inc();
    }

    pub fn set_available(&self, pool: &RewardPoolId, available: u64) {
        let value = i64::try_from(available).unwrap_or(i64::MAX);
        self.pool_available
            .with_label_values(&[&pool.to_hex()])
            .set(value);
    }

    pub fn claims(&self) -> u64 {
        self.claims_total.get()
    }

    pub fn failures(&self, reason: &str) -> u64 {
        self.claim_failures_total.with_label_values(&[reason]).get()
    }

    /// Text exposition of every metric
    pub fn gather(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| AccrualError::Config(e.to_string()))
    }
}

fn metrics_error(err: prometheus::Error) -> AccrualError {
    AccrualError::Config(format!("metrics: {}", err))
}
