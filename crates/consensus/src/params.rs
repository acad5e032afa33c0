//! Consensus parameter definitions.

use std::fmt;

use crate::constants::{
    BLOCK_TIME_SECONDS, COINBASE_BLOB_RESERVED_SIZE, EMISSION_SPEED_FACTOR, MAX_BLOCK_BLOB_SIZE,
    MAX_FUSION_TRANSACTION_SIZE, MAX_TRANSACTION_SIZE, MINED_MONEY_UNLOCK_WINDOW, PRUNING_DEPTH,
    REWARD_BLOCKS_WINDOW, UPGRADE_VOTING_WINDOW,
};
use crate::money::{Amount, COIN, MINIMUM_FEE, MONEY_SUPPLY, PREMINE};
use crate::rules::{
    BlockVersionCheckpoint, CheckpointError, CheckpointTable, DifficultyAlgorithm,
    DifficultyCheckpoint, DustCheckpoint, MinerRewardCheckpoint, RuleTables,
    StaticRewardCheckpoint, TimeCheckpoint, FEATURE_STATIC_REWARD, FEATURE_UPGRADE_VOTING,
};
use crate::upgrades::UpgradeManager;
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Stagenet,
    Testnet,
    Localnet,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Stagenet => "stagenet",
            Network::Testnet => "testnet",
            Network::Localnet => "localnet",
        }
    }

    pub fn from_name(name: &str) -> Option<Network> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Network::Mainnet),
            "stagenet" | "stage" => Some(Network::Stagenet),
            "testnet" | "test" => Some(Network::Testnet),
            "localnet" | "local" | "localtestnet" => Some(Network::Localnet),
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: Hash256,
}

/// Inputs of the deterministic genesis block.
#[derive(Clone, Debug)]
pub struct GenesisParams {
    pub timestamp: u64,
    pub nonce: u32,
    /// Key receiving the premine output.
    pub reward_public_key: Hash256,
    pub reward: Amount,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub block_time: u16,
    pub money_supply: Amount,
    pub emission_speed_factor: u32,
    /// Lowest fee a non-fusion transaction must pay outside of a block.
    pub minimum_fee: Amount,
    pub max_block_blob_size: u64,
    pub coinbase_blob_reserved_size: u64,
    pub max_transaction_size: u64,
    pub max_fusion_transaction_size: u64,
    pub mined_money_unlock_window: u32,
    pub upgrade_voting_window: u32,
    pub pruning_depth: u32,
    pub rules: RuleTables,
    pub genesis: GenesisParams,
    pub checkpoints: Vec<Checkpoint>,
}

impl ConsensusParams {
    /// Startup check of the rule tables.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        self.rules.validate()
    }

    pub fn upgrade_manager(&self) -> UpgradeManager {
        UpgradeManager::from_table(&self.rules.block_versions)
    }

    pub fn genesis_version(&self) -> u8 {
        self.rules.block_versions.genesis_version()
    }

    /// Largest transaction blob a block of `version` may carry.
    pub fn max_transaction_size_for(&self, version: u8) -> u64 {
        self.size_within_reward_zone(version, self.max_transaction_size)
    }

    /// Largest blob a fusion transaction may have under `version`.
    pub fn max_fusion_transaction_size_for(&self, version: u8) -> u64 {
        self.size_within_reward_zone(version, self.max_fusion_transaction_size)
    }

    fn size_within_reward_zone(&self, version: u8, cap: u64) -> u64 {
        let zone = self.rules.miner_reward.full_reward_zone(version);
        zone.min(cap)
            .saturating_sub(self.coinbase_blob_reserved_size)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "hash must be 64 hex characters"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a hash printed in storage byte order.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }
    if !hex.is_ascii() {
        return Err(HexError::InvalidHex);
    }

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out =
            u8::from_str_radix(&hex[start..start + 2], 16).map_err(|_| HexError::InvalidHex)?;
    }
    Ok(bytes)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(64);
    for byte in hash {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Stagenet => stagenet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Localnet => localnet_consensus_params(),
    }
}

fn base_params(network: Network, rules: RuleTables, genesis: GenesisParams) -> ConsensusParams {
    ConsensusParams {
        network,
        block_time: BLOCK_TIME_SECONDS,
        money_supply: MONEY_SUPPLY,
        emission_speed_factor: EMISSION_SPEED_FACTOR,
        minimum_fee: MINIMUM_FEE,
        max_block_blob_size: MAX_BLOCK_BLOB_SIZE,
        coinbase_blob_reserved_size: COINBASE_BLOB_RESERVED_SIZE,
        max_transaction_size: MAX_TRANSACTION_SIZE,
        max_fusion_transaction_size: MAX_FUSION_TRANSACTION_SIZE,
        mined_money_unlock_window: MINED_MONEY_UNLOCK_WINDOW,
        upgrade_voting_window: UPGRADE_VOTING_WINDOW,
        pruning_depth: PRUNING_DEPTH,
        rules,
        genesis,
        checkpoints: Vec::new(),
    }
}

struct Schedule {
    fork_height: u32,
    initial_difficulty: u64,
    difficulty_window: u32,
    static_reward_address: &'static str,
    static_reward: Amount,
}

/// Two-version schedule shared by the public networks. Version 2 is a hard
/// fork switching LWMA-2 to LWMA-3 and enabling static rewards and voting.
fn two_version_rules(schedule: &Schedule) -> RuleTables {
    let limit = 6 * u64::from(BLOCK_TIME_SECONDS);
    RuleTables {
        block_versions: CheckpointTable::new(
            "block_version",
            vec![
                BlockVersionCheckpoint {
                    index: 0,
                    height: 0,
                    version: 1,
                    is_fork: false,
                    features: 0,
                },
                BlockVersionCheckpoint {
                    index: 1,
                    height: schedule.fork_height,
                    version: 2,
                    is_fork: true,
                    features: FEATURE_STATIC_REWARD | FEATURE_UPGRADE_VOTING,
                },
            ],
        ),
        difficulty: CheckpointTable::new(
            "difficulty",
            vec![
                DifficultyCheckpoint {
                    index: 0,
                    version: 1,
                    window_size: schedule.difficulty_window,
                    initial_value: schedule.initial_difficulty,
                    time_limit: limit,
                    algorithm: DifficultyAlgorithm::Lwma2,
                },
                DifficultyCheckpoint {
                    index: 1,
                    version: 2,
                    window_size: schedule.difficulty_window,
                    initial_value: schedule.initial_difficulty,
                    time_limit: limit,
                    algorithm: DifficultyAlgorithm::Lwma3,
                },
            ],
        ),
        time: CheckpointTable::new(
            "time",
            vec![
                TimeCheckpoint {
                    index: 0,
                    version: 1,
                    past_window_size: 50,
                    future_time_limit: 600,
                },
                TimeCheckpoint {
                    index: 1,
                    version: 2,
                    past_window_size: 16,
                    future_time_limit: 600,
                },
            ],
        ),
        dust: CheckpointTable::new(
            "dust",
            vec![DustCheckpoint {
                index: 0,
                version: 1,
                dust: 10,
            }],
        ),
        fusion_dust: CheckpointTable::new(
            "fusion_dust",
            vec![DustCheckpoint {
                index: 0,
                version: 1,
                dust: 10,
            }],
        ),
        miner_reward: CheckpointTable::new(
            "miner_reward",
            vec![
                MinerRewardCheckpoint {
                    index: 0,
                    version: 1,
                    window: REWARD_BLOCKS_WINDOW,
                    full_reward_zone: 100_000,
                    cut_off: 0,
                },
                MinerRewardCheckpoint {
                    index: 1,
                    version: 2,
                    window: REWARD_BLOCKS_WINDOW,
                    full_reward_zone: 300_000,
                    cut_off: 100,
                },
            ],
        ),
        static_reward: CheckpointTable::new(
            "static_reward",
            vec![
                StaticRewardCheckpoint {
                    index: 0,
                    version: 1,
                    amount: 0,
                    address: String::new(),
                },
                StaticRewardCheckpoint {
                    index: 1,
                    version: 2,
                    amount: schedule.static_reward,
                    address: schedule.static_reward_address.to_string(),
                },
            ],
        ),
    }
}

fn genesis(timestamp: u64, nonce: u32, tag: u8) -> GenesisParams {
    let mut reward_public_key = [0u8; 32];
    reward_public_key[0] = tag;
    reward_public_key[31] = 0x58;
    GenesisParams {
        timestamp,
        nonce,
        reward_public_key,
        reward: PREMINE,
    }
}

fn mainnet_consensus_params() -> ConsensusParams {
    let rules = two_version_rules(&Schedule {
        fork_height: 300_000,
        initial_difficulty: 100_000,
        difficulty_window: 60,
        static_reward_address: "gxi1mainnetstaticrewardpool",
        static_reward: 3 * COIN,
    });
    base_params(Network::Mainnet, rules, genesis(1_546_300_800, 0x0000_0f00, 1))
}

fn stagenet_consensus_params() -> ConsensusParams {
    let rules = two_version_rules(&Schedule {
        fork_height: 1_000,
        initial_difficulty: 10_000,
        difficulty_window: 60,
        static_reward_address: "gxs1stagenetstaticrewardpool",
        static_reward: 3 * COIN,
    });
    base_params(Network::Stagenet, rules, genesis(1_546_300_800, 0x0000_0f01, 2))
}

fn testnet_consensus_params() -> ConsensusParams {
    let rules = two_version_rules(&Schedule {
        fork_height: 100,
        initial_difficulty: 1_000,
        difficulty_window: 60,
        static_reward_address: "gxt1testnetstaticrewardpool",
        static_reward: 3 * COIN,
    });
    base_params(Network::Testnet, rules, genesis(1_546_300_800, 0x0000_0f02, 3))
}

/// Local test chain: the difficulty window is long enough that blocks are
/// always mined at the initial difficulty of 1.
fn localnet_consensus_params() -> ConsensusParams {
    let rules = two_version_rules(&Schedule {
        fork_height: 20,
        initial_difficulty: 1,
        difficulty_window: 1_000,
        static_reward_address: "gxl1localnetstaticrewardpool",
        static_reward: COIN,
    });
    base_params(Network::Localnet, rules, genesis(1_546_300_800, 0, 4))
}
