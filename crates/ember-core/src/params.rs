use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use ember_crypto::PublicKey;

/// Named consensus features that switch on at a height or timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    /// Automated-transaction execution and AT-authored payments.
    AutomatedTransactions,
    /// Group-approval transactions and approval voting.
    GroupApproval,
}

/// When a feature becomes active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationTrigger {
    Height(u32),
    /// Milliseconds since the Unix epoch.
    Timestamp(u64),
}

/// One era of the block-reward schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEra {
    pub start_height: u32,
    pub reward: Amount,
}

/// One era of the block-version schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEra {
    pub start_height: u32,
    pub version: u32,
}

/// A balance granted to an address by the genesis block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisGrantEntry {
    pub recipient: String,
    pub amount: Amount,
}

/// An approval group seeded at chain bootstrap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisGroupEntry {
    pub id: u32,
    pub name: String,
    /// In-favour votes needed for approval.
    pub threshold: u32,
    /// Blocks after inclusion before the sweep may approve.
    pub min_delay: u32,
    /// Blocks after inclusion before a pending transaction expires.
    pub max_delay: u32,
    pub admins: Vec<String>,
}

/// A proxy-forge delegation seeded at chain bootstrap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisDelegationEntry {
    pub generator: PublicKey,
    pub delegate: String,
    /// Delegate's percentage of rewards and fees, 0-100.
    pub share_percent: u8,
}

/// Immutable chain parameters.
///
/// Loaded once from settings and passed by reference into every component
/// that needs them; there is deliberately no global accessor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainParams {
    /// Fee floor per fee unit.
    pub unit_fee: Amount,
    /// How many serialized bytes one fee unit covers.
    pub max_bytes_per_unit_fee: u64,
    /// Coin-supply ceiling; also the upper clamp for generating balance.
    pub max_balance: Amount,
    /// Lower clamp for generating balance, and the stake floor a generator
    /// account must hold to be accepted.
    pub min_generating_balance: Amount,
    /// Generating balance is retargeted once per this many blocks.
    pub retarget_interval: u32,
    pub min_block_time_secs: u64,
    pub max_block_time_secs: u64,
    /// How far into the future a block timestamp may run ahead of us.
    pub max_time_drift_ms: u64,
    /// Maximum serialized block size.
    pub max_block_bytes: u64,
    /// Reward eras, ascending by start height.
    pub reward_schedule: Vec<RewardEra>,
    /// Block-version eras, ascending by start height.
    pub version_schedule: Vec<VersionEra>,
    pub features: BTreeMap<Feature, ActivationTrigger>,
    /// Millisecond timestamp of the genesis block.
    pub genesis_timestamp: u64,
    pub genesis_generating_balance: Amount,
    pub genesis_grants: Vec<GenesisGrantEntry>,
    pub genesis_groups: Vec<GenesisGroupEntry>,
    pub genesis_delegations: Vec<GenesisDelegationEntry>,
}

impl Default for ChainParams {
    fn default() -> Self {
        let mut features = BTreeMap::new();
        features.insert(Feature::AutomatedTransactions, ActivationTrigger::Height(2));
        features.insert(Feature::GroupApproval, ActivationTrigger::Height(2));
        ChainParams {
            unit_fee: Amount::from_coins(1),
            max_bytes_per_unit_fee: 1024,
            max_balance: Amount::from_coins(10_000_000_000),
            min_generating_balance: Amount::from_coins(1),
            retarget_interval: 10,
            min_block_time_secs: 60,
            max_block_time_secs: 300,
            max_time_drift_ms: 30_000,
            max_block_bytes: 1_048_576,
            reward_schedule: vec![
                RewardEra { start_height: 1, reward: Amount::from_coins(100) },
                RewardEra { start_height: 259_201, reward: Amount::from_coins(50) },
                RewardEra { start_height: 518_401, reward: Amount::from_coins(25) },
            ],
            version_schedule: vec![
                VersionEra { start_height: 1, version: 1 },
                VersionEra { start_height: 2, version: 4 },
            ],
            features,
            genesis_timestamp: 1_717_200_000_000,
            genesis_generating_balance: Amount::from_coins(10_000_000),
            genesis_grants: Vec::new(),
            genesis_groups: Vec::new(),
            genesis_delegations: Vec::new(),
        }
    }
}

impl ChainParams {
    /// Block reward at a height, from the last era at or below it.
    pub fn reward_at(&self, height: u32) -> Amount {
        self.reward_schedule
            .iter()
            .rev()
            .find(|era| era.start_height <= height)
            .map(|era| era.reward)
            .unwrap_or(Amount::ZERO)
    }

    /// Expected protocol version for a block at a height.
    pub fn block_version_at(&self, height: u32) -> u32 {
        self.version_schedule
            .iter()
            .rev()
            .find(|era| era.start_height <= height)
            .map(|era| era.version)
            .unwrap_or(1)
    }

    /// Whether a feature is active for a block at (height, timestamp).
    pub fn is_active(&self, feature: Feature, height: u32, timestamp: u64) -> bool {
        match self.features.get(&feature) {
            Some(ActivationTrigger::Height(h)) => height >= *h,
            Some(ActivationTrigger::Timestamp(t)) => timestamp >= *t,
            None => false,
        }
    }

    /// Target inter-block time, scaled linearly by generating balance: full
    /// stake forges at `min_block_time`, an empty chain drifts towards
    /// `max_block_time`.
    pub fn target_block_time_ms(&self, generating_balance: Amount) -> u64 {
        let min = self.min_block_time_secs * 1000;
        let max = self.max_block_time_secs * 1000;
        let gb = generating_balance.raw().clamp(0, self.max_balance.raw()) as u128;
        let span = (max - min) as u128;
        let scaled = span * gb / self.max_balance.raw() as u128;
        max - scaled as u64
    }
}
