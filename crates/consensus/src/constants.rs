//! Consensus-wide constants shared across validation.

/// Target spacing between blocks in seconds.
pub const BLOCK_TIME_SECONDS: u16 = 60;

/// Unlock times below this value are block heights, above it unix timestamps.
/// Also the highest block index the chain may ever reach.
pub const MAX_BLOCK_NUMBER: u32 = 500_000_000;

/// Upper bound for a serialized block template blob.
pub const MAX_BLOCK_BLOB_SIZE: u64 = 10 * 1024 * 1024;
/// Room left in every block for the miner transaction.
pub const COINBASE_BLOB_RESERVED_SIZE: u64 = 600;
/// Absolute transaction size cap; the full reward zone is the tighter bound
/// on every shipped network.
pub const MAX_TRANSACTION_SIZE: u64 = 1_000_000_000_000;
pub const MAX_FUSION_TRANSACTION_SIZE: u64 = 32 * 1024;
pub const FUSION_TX_MIN_INPUT_COUNT: usize = 12;
pub const FUSION_TX_MIN_IN_OUT_COUNT_RATIO: usize = 4;

/// Blocks a miner output stays locked after being mined.
pub const MINED_MONEY_UNLOCK_WINDOW: u32 = 10;

/// Number of trailing blob sizes used for the reward median.
pub const REWARD_BLOCKS_WINDOW: u32 = 50;
pub const EMISSION_SPEED_FACTOR: u32 = 21;

/// Percentage of votes in a voting window required to switch major version.
pub const UPGRADE_VOTING_THRESHOLD: u32 = 90;
pub const UPGRADE_VOTING_WINDOW: u32 = 1440;

/// Depth below the tip at which a pruning node drops transaction signatures.
pub const PRUNING_DEPTH: u32 = 5_000;

pub const CURRENT_TRANSACTION_VERSION: u8 = 1;
/// Largest ring a key input may reference.
pub const MAX_RING_SIZE: usize = 128;
