//! Identifiers for pools, entries and token accounts
//!
//! Pool and entry identifiers are BLAKE3 digests over a domain prefix and the
//! fields that make the record unique, so the same inputs always address the
//! same record.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Create from raw bytes
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Convert to hex string
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from a 64 character hex string
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }
    };
}

define_id!(
    /// Token account: owner wallet, pool vault or fee collector
    AccountId
);
define_id!(
    /// Stake pool, unique per (mint, creator, nonce)
    StakePoolId
);
define_id!(
    /// Stake entry, unique per (stake pool, owner, nonce)
    StakeEntryId
);
define_id!(
    /// Reward pool, unique per (stake pool, reward mint, nonce)
    RewardPoolId
);

fn derive(prefix: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prefix);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

impl AccountId {
    /// Derive an account from a human-readable label (tests, tooling)
    pub fn from_label(label: &str) -> Self {
        Self(derive(b"account", &[label.as_bytes()]))
    }
}

impl StakePoolId {
    pub fn derive(mint: &AccountId, creator: &AccountId, nonce: u8) -> Self {
        Self(derive(b"stake-pool", &[mint.as_bytes(), creator.as_bytes(), &[nonce]]))
    }
}

impl StakeEntryId {
    pub fn derive(stake_pool: &StakePoolId, owner: &AccountId, nonce: u32) -> Self {
        Self(derive(
            b"stake-entry",
            &[stake_pool.as_bytes(), owner.as_bytes(), &nonce.to_le_bytes()],
        ))
    }
}

impl RewardPoolId {
    pub fn derive(stake_pool: &StakePoolId, mint: &AccountId, nonce: u8) -> Self {
        Self(derive(b"reward-pool", &[stake_pool.as_bytes(), mint.as_bytes(), &[nonce]]))
    }

    /// Vault account holding this pool's reward tokens
    pub fn vault(&self) -> AccountId {
        AccountId(derive(b"reward-vault", &[self.as_bytes()]))
    }
}

/// Key of a reward entry: one per (reward pool, stake entry) pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RewardEntryKey {
    pub reward_pool: RewardPoolId,
    pub stake_entry: StakeEntryId,
}

impl RewardEntryKey {
    pub fn new(reward_pool: RewardPoolId, stake_entry: StakeEntryId) -> Self {
        Self {
            reward_pool,
            stake_entry,
        }
    }
}

impl fmt::Display for RewardEntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.reward_pool, self.stake_entry)
    }
}

/// Key of a logged rate change: its position in the reward pool's log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RateLogKey {
    pub reward_pool: RewardPoolId,
    pub seq: u64,
}

impl RateLogKey {
    pub fn new(reward_pool: RewardPoolId, seq: u64) -> Self {
        Self { reward_pool, seq }
    }
}

impl fmt::Display for RateLogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.reward_pool, self.seq)
    }
}
