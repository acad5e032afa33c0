//! Consensus constants, rule checkpoint tables, and the upgrade schedule.

pub mod block_error;
pub mod constants;
pub mod eligible;
pub mod money;
pub mod params;
pub mod rewards;
pub mod rules;
pub mod upgrades;

pub type Hash256 = [u8; 32];

pub use block_error::BlockValidationError;
pub use eligible::EligibleIndex;
pub use params::{
    consensus_params, hash256_from_hex, hash256_to_hex, Checkpoint, ConsensusParams, Network,
};
pub use rewards::{block_reward, penalized_amount, BlockReward, RewardError};
pub use rules::{CheckpointError, DifficultyAlgorithm, RuleTables};
pub use upgrades::{UpgradeError, UpgradeManager};
