//! Scenario simulation against an in-memory engine

use accrual_core::{reward_amount_from_rate, AccountId, RewardPool, StakeEntry};
use accrual_engine::{ClaimEngine, EngineConfig, EngineContext, ManualClock, MemoryVaults, PoolAdmin};
use accrual_storage::MemoryStore;
use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A scripted run: pools, stakers and timed actions
#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_start_ts")]
    pub start_ts: u64,
    pub stake_pool: StakePoolSetup,
    pub reward_pool: RewardPoolSetup,
    #[serde(default)]
    pub stakers: Vec<Staker>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_start_ts() -> u64 {
    1_000
}

#[derive(Debug, Deserialize)]
pub struct StakePoolSetup {
    pub min_duration: u64,
    pub max_duration: u64,
    /// Scaled by `SCALE`
    pub max_weight: u64,
}

#[derive(Debug, Deserialize)]
pub struct RewardPoolSetup {
    /// Reward tokens per staked token per period
    pub rate: f64,
    #[serde(default = "default_decimals")]
    pub stake_decimals: u8,
    #[serde(default = "default_decimals")]
    pub reward_decimals: u8,
    pub reward_period: u64,
    /// Raw reward units funded at start
    #[serde(default)]
    pub fund: u64,
}

fn default_decimals() -> u8 {
    9
}

/// A staker opened at `start_ts`
#[derive(Debug, Deserialize)]
pub struct Staker {
    pub name: String,
    pub amount: u64,
    pub duration: u64,
}

#[derive(Debug, Deserialize)]
pub struct Step {
    pub at: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Claim { staker: String },
    Preview { staker: String },
    Close { staker: String },
    /// Claim from the reward pool, then close the stake
    Unstake { staker: String },
    /// Drop the reward entry of a closed stake
    CloseEntry { staker: String },
    SetRate { rate: f64 },
    SetPeriod { period: u64 },
    /// Fund fee override for the scenario funder
    SetFee { fee: u64 },
    Fund { amount: u64 },
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::Preview { .. } => "preview",
            Self::Close { .. } => "close",
            Self::Unstake { .. } => "unstake",
            Self::CloseEntry { .. } => "close_entry",
            Self::SetRate { .. } => "set_rate",
            Self::SetPeriod { .. } => "set_period",
            Self::SetFee { .. } => "set_fee",
            Self::Fund { .. } => "fund",
        }
    }
}

/// Outcome of one step; engine errors are reported, not fatal
#[derive(Debug, Serialize)]
pub struct StepReport {
    pub at: u64,
    pub action: &'static str,
    pub ok: bool,
    pub outcome: Value,
}

#[derive(Debug, Serialize)]
pub struct Simulation {
    pub steps: Vec<StepReport>,
    pub vault_balance: u64,
    pub balances: HashMap<String, u64>,
    #[serde(skip)]
    pub metrics: Option<String>,
}

impl Scenario {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("invalid scenario")
    }
}

struct World {
    admin: PoolAdmin,
    engine: ClaimEngine,
    vaults: Arc<MemoryVaults>,
    authority: AccountId,
    fee_authority: AccountId,
    funder: AccountId,
    reward_pool: RewardPool,
    stakes: HashMap<String, StakeEntry>,
}

impl World {
    fn stake(&self, name: &str) -> anyhow::Result<&StakeEntry> {
        self.stakes.get(name).ok_or_else(|| anyhow!("unknown staker {:?}", name))
    }

    async fn fund(&self, amount: u64) -> accrual_core::Result<Value> {
        self.vaults.mint(&self.funder, amount)?;
        let receipt = self.admin.fund(&self.reward_pool.id, self.funder, amount).await?;
        Ok(to_value(&receipt))
    }
}

/// Run `scenario` from scratch
pub async fn run(scenario: &Scenario, config: EngineConfig) -> anyhow::Result<Simulation> {
    let metrics_enabled = config.metrics.enabled;
    let fee_authority = config.fees.fee_authority()?;
    let vaults = Arc::new(MemoryVaults::new());
    let clock = Arc::new(ManualClock::new(scenario.start_ts));
    let ctx = EngineContext::new(Arc::new(MemoryStore::new()), vaults.clone(), clock.clone(), config)?;
    let admin = PoolAdmin::new(ctx.clone());

    let authority = AccountId::from_label("authority");
    let setup = &scenario.stake_pool;
    let stake_pool = admin.create_stake_pool(
        AccountId::from_label("stake-mint"),
        authority,
        0,
        setup.min_duration,
        setup.max_duration,
        setup.max_weight,
    )?;
    let setup = &scenario.reward_pool;
    let reward_amount = reward_amount_from_rate(setup.rate, setup.stake_decimals, setup.reward_decimals)?;
    let reward_pool = admin.create_reward_pool(
        &stake_pool.id,
        authority,
        AccountId::from_label("reward-mint"),
        0,
        reward_amount,
        setup.reward_period,
    )?;

    let mut stakes = HashMap::new();
    for staker in &scenario.stakers {
        let owner = AccountId::from_label(&staker.name);
        let entry = admin.open_stake(&stake_pool.id, owner, 0, staker.amount, staker.duration)?;
        if stakes.insert(staker.name.clone(), entry).is_some() {
            bail!("duplicate staker {:?}", staker.name);
        }
    }

    let world = World {
        admin,
        engine: ClaimEngine::new(ctx),
        vaults,
        authority,
        fee_authority,
        funder: AccountId::from_label("funder"),
        reward_pool,
        stakes,
    };
    if setup.fund > 0 {
        world.fund(setup.fund).await?;
    }

    let mut reports = Vec::with_capacity(scenario.steps.len());
    let mut last_at = scenario.start_ts;
    for step in &scenario.steps {
        if step.at < last_at {
            bail!("step at {} goes back in time (previous {})", step.at, last_at);
        }
        last_at = step.at;
        clock.set(step.at);

        let result = execute(&world, &step.action, setup).await?;
        tracing::debug!(at = step.at, action = step.action.name(), ok = result.is_ok(), "Step executed");
        let (ok, outcome) = match result {
            Ok(value) => (true, value),
            Err(err) => (false, json!({ "error": err.to_string(), "code": err.code() })),
        };
        reports.push(StepReport {
            at: step.at,
            action: step.action.name(),
            ok,
            outcome,
        });
    }

    let balances = world
        .stakes
        .iter()
        .map(|(name, entry)| (name.clone(), world.vaults.balance(&entry.owner)))
        .collect();
    let metrics = if metrics_enabled {
        Some(world.engine.context().metrics.gather()?)
    } else {
        None
    };

    Ok(Simulation {
        steps: reports,
        vault_balance: world.vaults.balance(&world.reward_pool.id.vault()),
        balances,
        metrics,
    })
}

/// Scenario mistakes are fatal, engine errors are returned for the report
async fn execute(
    world: &World,
    action: &Action,
    setup: &RewardPoolSetup,
) -> anyhow::Result<accrual_core::Result<Value>> {
    let pool = &world.reward_pool.id;
    let result = match action {
        Action::Claim { staker } => {
            let stake = world.stake(staker)?;
            world.engine.claim(pool, &stake.id).await.map(|r| to_value(&r))
        }
        Action::Preview { staker } => {
            let stake = world.stake(staker)?;
            world.engine.preview(pool, &stake.id).map(|p| to_value(&p))
        }
        Action::Close { staker } => {
            let stake = world.stake(staker)?;
            world
                .admin
                .close_stake(&stake.id, stake.owner)
                .await
                .map(|e| json!({ "closed_ts": e.closed_ts }))
        }
        Action::Unstake { staker } => {
            let stake = world.stake(staker)?;
            world
                .engine
                .unstake_and_claim(&stake.id, stake.owner)
                .await
                .map(|r| to_value(&r))
        }
        Action::CloseEntry { staker } => {
            let stake = world.stake(staker)?;
            world
                .engine
                .close_reward_entry(pool, &stake.id, stake.owner)
                .await
                .and_then(|entry| {
                    let forfeited = entry.claimable_amount()?;
                    Ok(json!({ "claimed_amount": entry.claimed_amount, "forfeited": forfeited }))
                })
        }
        Action::SetRate { rate } => match reward_amount_from_rate(*rate, setup.stake_decimals, setup.reward_decimals) {
            Ok(amount) => world
                .admin
                .update_reward_amount(pool, world.authority, amount)
                .await
                .map(|changed| json!({ "reward_amount": amount, "changed": changed })),
            Err(err) => Err(err),
        },
        Action::SetPeriod { period } => world
            .admin
            .update_reward_period(pool, world.authority, *period)
            .await
            .map(|changed| json!({ "reward_period": period, "changed": changed })),
        Action::SetFee { fee } => world
            .admin
            .write_fee(world.fee_authority, world.funder, *fee)
            .map(|value| to_value(&value)),
        Action::Fund { amount } => world.fund(*amount).await,
    };
    Ok(result)
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
