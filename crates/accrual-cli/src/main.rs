//! Accrual CLI
//!
//! Operator tooling for duration-weighted staking rewards.

mod scenario;

use accrual_core::{decimals_shift, reward_amount_from_rate, reward_rate_from_amount, stake_weight, SCALE};
use accrual_engine::config::LoggingConfig;
use accrual_engine::EngineConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "accrual")]
#[command(version = "0.1.0")]
#[command(about = "Duration-weighted staking reward tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine configuration file
    #[arg(short, long, global = true, env = "ACCRUAL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a human rate into the internal reward amount
    RateToAmount {
        /// Reward tokens per staked token per period
        rate: f64,

        #[arg(long, default_value = "9")]
        stake_decimals: u8,

        #[arg(long, default_value = "9")]
        reward_decimals: u8,
    },

    /// Convert an internal reward amount back into a human rate
    AmountToRate {
        amount: u64,

        #[arg(long, default_value = "9")]
        stake_decimals: u8,

        #[arg(long, default_value = "9")]
        reward_decimals: u8,
    },

    /// Weight of a lock-up duration
    Weight {
        #[arg(long)]
        min_duration: u64,

        #[arg(long)]
        max_duration: u64,

        /// Scaled by 10^9
        #[arg(long)]
        max_weight: u64,

        #[arg(long)]
        duration: u64,

        /// Largest decimals shift to consider
        #[arg(long, default_value = "9")]
        max_shift: u32,
    },

    /// Run a scenario file against an in-memory engine
    Simulate {
        /// Scenario file (TOML)
        scenario: PathBuf,
    },
}

fn init_logging(verbose: bool, config: &LoggingConfig) {
    let default_level = if verbose { "debug" } else { config.level.as_str() };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    init_logging(cli.verbose, &config.logging);

    match cli.command {
        Commands::RateToAmount {
            rate,
            stake_decimals,
            reward_decimals,
        } => {
            let amount = reward_amount_from_rate(rate, stake_decimals, reward_decimals)?;
            println!("{}", amount);
        }

        Commands::AmountToRate {
            amount,
            stake_decimals,
            reward_decimals,
        } => {
            let rate = reward_rate_from_amount(amount, stake_decimals, reward_decimals)?;
            println!("{}", rate);
        }

        Commands::Weight {
            min_duration,
            max_duration,
            max_weight,
            duration,
            max_shift,
        } => {
            let weight = stake_weight(min_duration, max_duration, max_weight, duration)?;
            println!("weight:         {}", weight);
            println!("multiplier:     {}x", weight as f64 / SCALE as f64);
            println!("decimals shift: {}", decimals_shift(max_weight, max_shift));
        }

        Commands::Simulate { scenario: path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let parsed = scenario::Scenario::from_toml_str(&content)?;
            tracing::info!(steps = parsed.steps.len(), stakers = parsed.stakers.len(), "Running scenario");

            let simulation = scenario::run(&parsed, config).await?;
            println!("{}", serde_json::to_string_pretty(&simulation)?);
            if let Some(metrics) = &simulation.metrics {
                eprintln!("{}", metrics);
            }
        }
    }

    Ok(())
}
