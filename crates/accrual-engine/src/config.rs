//! Engine configuration types

use accrual_core::{AccountId, AccrualError, AccrualMode, Result, DEFAULT_FEE, FEE_PRECISION};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Accrual and claim settings
    #[serde(default)]
    pub accrual: AccrualConfig,

    /// Fund fee settings
    #[serde(default)]
    pub fees: FeeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| AccrualError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AccrualError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fees.fund_fee > FEE_PRECISION {
            return Err(AccrualError::Config(format!(
                "fees.fund_fee must be at most {}",
                FEE_PRECISION
            )));
        }
        self.fees.fee_collector()?;
        self.fees.fee_authority()?;
        Ok(())
    }
}

/// Accrual settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccrualConfig {
    /// How pending rate/period changes are reconciled
    #[serde(default)]
    pub mode: AccrualMode,

    /// Compare-and-swap retries on contended records
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: usize,

    /// Claim retries after a concurrent rate update
    #[serde(default = "default_stale_snapshot_retries")]
    pub stale_snapshot_retries: usize,
}

fn default_max_cas_retries() -> usize {
    16
}

fn default_stale_snapshot_retries() -> usize {
    3
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            mode: AccrualMode::default(),
            max_cas_retries: default_max_cas_retries(),
            stale_snapshot_retries: default_stale_snapshot_retries(),
        }
    }
}

/// Fee withheld when funding a reward pool
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Default fee in 1/10_000 of the funded amount
    #[serde(default = "default_fund_fee")]
    pub fund_fee: u64,

    /// Fee collector account (hex); derived from "fee-collector" when unset
    #[serde(default)]
    pub fee_collector: Option<String>,

    /// Account allowed to set per-funder fees (hex); derived from "fee-authority" when unset
    #[serde(default)]
    pub fee_authority: Option<String>,
}

fn default_fund_fee() -> u64 {
    DEFAULT_FEE
}

impl FeeConfig {
    pub fn fee_collector(&self) -> Result<AccountId> {
        account("fees.fee_collector", self.fee_collector.as_deref(), "fee-collector")
    }

    pub fn fee_authority(&self) -> Result<AccountId> {
        account("fees.fee_authority", self.fee_authority.as_deref(), "fee-authority")
    }
}

fn account(key: &str, hex: Option<&str>, label: &str) -> Result<AccountId> {
    match hex {
        Some(hex) => AccountId::from_hex(hex).map_err(|e| AccrualError::Config(format!("{}: {}", key, e))),
        None => Ok(AccountId::from_label(label)),
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            fund_fee: default_fund_fee(),
            fee_collector: None,
            fee_authority: None,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: text or json
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Print gathered metrics after a run
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
