//! Versioned rule checkpoint tables.
//!
//! Every rule family is an append-only list of checkpoints. Entry `i` takes
//! effect once the block version (or, for the block version table itself, the
//! block height) reaches its threshold and stays in effect until a later
//! entry supersedes it. Resolution scans from the newest entry backwards and
//! falls back to entry 0, the genesis rule set.
//!
//! Tables are plain data; `RuleTables::validate` must run once at startup
//! before any resolver is used.

use std::fmt;

pub const FEATURE_STATIC_REWARD: u8 = 1 << 0;
pub const FEATURE_UPGRADE_VOTING: u8 = 1 << 1;
pub const FEATURE_MERGE_MINING: u8 = 1 << 2;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CheckpointError {
    Empty {
        family: &'static str,
    },
    IndexMismatch {
        family: &'static str,
        position: usize,
        index: u8,
    },
    NonMonotonic {
        family: &'static str,
        index: u8,
        threshold: u32,
        previous: u32,
    },
    MissingFloor {
        family: &'static str,
        threshold: u32,
        floor: u32,
    },
    DuplicateVersion {
        version: u8,
    },
    UnknownVersion {
        family: &'static str,
        index: u8,
        version: u8,
    },
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Empty { family } => write!(f, "{family} checkpoint table is empty"),
            CheckpointError::IndexMismatch {
                family,
                position,
                index,
            } => write!(
                f,
                "{family} checkpoint at position {position} declares index {index}"
            ),
            CheckpointError::NonMonotonic {
                family,
                index,
                threshold,
                previous,
            } => write!(
                f,
                "{family} checkpoint {index} threshold {threshold} is below its predecessor {previous}"
            ),
            CheckpointError::MissingFloor {
                family,
                threshold,
                floor,
            } => write!(
                f,
                "{family} checkpoint 0 starts at {threshold}, expected {floor}"
            ),
            CheckpointError::DuplicateVersion { version } => {
                write!(f, "block version {version} registered more than once")
            }
            CheckpointError::UnknownVersion {
                family,
                index,
                version,
            } => write!(
                f,
                "{family} checkpoint {index} references non existing major block version {version}"
            ),
        }
    }
}

impl std::error::Error for CheckpointError {}

/// One row of a rule table.
pub trait RuleCheckpoint {
    fn index(&self) -> u8;
    /// Activation threshold compared against the resolution key.
    fn threshold(&self) -> u32;
    /// Block version this row depends on, if it is keyed by version.
    fn referenced_version(&self) -> Option<u8> {
        None
    }
}

#[derive(Clone, Debug)]
pub struct CheckpointTable<C> {
    family: &'static str,
    entries: Vec<C>,
}

impl<C: RuleCheckpoint> CheckpointTable<C> {
    pub fn new(family: &'static str, entries: Vec<C>) -> Self {
        Self { family, entries }
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn entries(&self) -> &[C] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the newest entry whose threshold `key` reaches, or entry 0.
    ///
    /// # Panics
    ///
    /// Panics on an empty table; `validate` rejects those at startup.
    pub fn resolve(&self, key: u32) -> &C {
        self.entries
            .iter()
            .rev()
            .find(|entry| key >= entry.threshold())
            .unwrap_or(&self.entries[0])
    }

    /// Local table invariants: non-empty, dense indices, non-decreasing thresholds.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.entries.is_empty() {
            return Err(CheckpointError::Empty {
                family: self.family,
            });
        }
        for (position, entry) in self.entries.iter().enumerate() {
            if usize::from(entry.index()) != position {
                return Err(CheckpointError::IndexMismatch {
                    family: self.family,
                    position,
                    index: entry.index(),
                });
            }
        }
        for pair in self.entries.windows(2) {
            if pair[1].threshold() < pair[0].threshold() {
                return Err(CheckpointError::NonMonotonic {
                    family: self.family,
                    index: pair[1].index(),
                    threshold: pair[1].threshold(),
                    previous: pair[0].threshold(),
                });
            }
        }
        Ok(())
    }

    fn validate_references(&self, versions: &BlockVersionTable) -> Result<(), CheckpointError> {
        for entry in &self.entries {
            if let Some(version) = entry.referenced_version() {
                if !versions.exists(version) {
                    return Err(CheckpointError::UnknownVersion {
                        family: self.family,
                        index: entry.index(),
                        version,
                    });
                }
            }
        }
        let floor = u32::from(versions.genesis_version());
        let first = self.entries[0].threshold();
        if first != floor {
            return Err(CheckpointError::MissingFloor {
                family: self.family,
                threshold: first,
                floor,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Block versions

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockVersionCheckpoint {
    pub index: u8,
    pub height: u32,
    pub version: u8,
    pub is_fork: bool,
    /// Header feature bits a block of this version may carry.
    pub features: u8,
}

impl RuleCheckpoint for BlockVersionCheckpoint {
    fn index(&self) -> u8 {
        self.index
    }

    fn threshold(&self) -> u32 {
        self.height
    }
}

pub type BlockVersionTable = CheckpointTable<BlockVersionCheckpoint>;

impl CheckpointTable<BlockVersionCheckpoint> {
    pub fn version(&self, height: u32) -> u8 {
        self.resolve(height).version
    }

    pub fn exists(&self, version: u8) -> bool {
        self.entries.iter().any(|entry| entry.version == version)
    }

    pub fn genesis_version(&self) -> u8 {
        self.entries.first().map(|entry| entry.version).unwrap_or(0)
    }

    pub fn versions(&self) -> Vec<u8> {
        self.entries.iter().map(|entry| entry.version).collect()
    }

    pub fn maximum(&self) -> u8 {
        self.entries
            .iter()
            .map(|entry| entry.version)
            .max()
            .unwrap_or(0)
    }

    pub fn upgrade_height(&self, version: u8) -> Option<u32> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.version == version)
            .map(|entry| entry.height)
    }

    pub fn upgrade_heights(&self) -> Vec<u32> {
        self.entries.iter().map(|entry| entry.height).collect()
    }

    /// Activation heights of the hard forks only.
    pub fn forks(&self) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|entry| entry.is_fork)
            .map(|entry| entry.height)
            .collect()
    }

    pub fn is_fork(&self, version: u8) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.version == version && entry.is_fork)
    }

    /// Feature mask of `version`, or 0 when the version is unknown.
    pub fn features(&self, version: u8) -> u8 {
        self.entries
            .iter()
            .find(|entry| entry.version == version)
            .map(|entry| entry.features)
            .unwrap_or(0)
    }

    /// Next registered version after `version`, if any.
    pub fn successor(&self, version: u8) -> Option<u8> {
        self.entries
            .iter()
            .map(|entry| entry.version)
            .find(|candidate| *candidate > version)
    }

    fn validate_versions(&self) -> Result<(), CheckpointError> {
        self.validate()?;
        if self.entries[0].height != 0 {
            return Err(CheckpointError::MissingFloor {
                family: self.family,
                threshold: self.entries[0].height,
                floor: 0,
            });
        }
        for pair in self.entries.windows(2) {
            if pair[1].version <= pair[0].version {
                return Err(CheckpointError::DuplicateVersion {
                    version: pair[1].version,
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Difficulty

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DifficultyAlgorithm {
    /// Signed solve times clamped to `[-4T, 6T]`.
    Lwma2,
    /// Monotonic timestamps, solve times capped at `6T`.
    Lwma3,
}

impl DifficultyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            DifficultyAlgorithm::Lwma2 => "lwma-2",
            DifficultyAlgorithm::Lwma3 => "lwma-3",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DifficultyCheckpoint {
    pub index: u8,
    pub version: u8,
    pub window_size: u32,
    pub initial_value: u64,
    /// Seconds.
    pub time_limit: u64,
    pub algorithm: DifficultyAlgorithm,
}

impl RuleCheckpoint for DifficultyCheckpoint {
    fn index(&self) -> u8 {
        self.index
    }

    fn threshold(&self) -> u32 {
        u32::from(self.version)
    }

    fn referenced_version(&self) -> Option<u8> {
        Some(self.version)
    }
}

pub type DifficultyTable = CheckpointTable<DifficultyCheckpoint>;

impl CheckpointTable<DifficultyCheckpoint> {
    pub fn window_size(&self, version: u8) -> u32 {
        self.resolve(u32::from(version)).window_size
    }

    /// Historical accessor kept bit-compatible with deployed nodes: it
    /// reports the window size of the resolved checkpoint, not its initial
    /// difficulty. Consensus code must use `configured_initial_value`.
    pub fn initial_value(&self, version: u8) -> u64 {
        u64::from(self.window_size(version))
    }

    /// Difficulty used while fewer than `window_size + 1` samples exist.
    pub fn configured_initial_value(&self, version: u8) -> u64 {
        self.resolve(u32::from(version)).initial_value
    }

    pub fn time_limit(&self, version: u8) -> u64 {
        self.resolve(u32::from(version)).time_limit
    }

    pub fn algorithm(&self, version: u8) -> DifficultyAlgorithm {
        self.resolve(u32::from(version)).algorithm
    }
}

// ---------------------------------------------------------------------------
// Time

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimeCheckpoint {
    pub index: u8,
    pub version: u8,
    pub past_window_size: u32,
    /// Seconds a block timestamp may lead the local clock.
    pub future_time_limit: u64,
}

impl RuleCheckpoint for TimeCheckpoint {
    fn index(&self) -> u8 {
        self.index
    }

    fn threshold(&self) -> u32 {
        u32::from(self.version)
    }

    fn referenced_version(&self) -> Option<u8> {
        Some(self.version)
    }
}

pub type TimeTable = CheckpointTable<TimeCheckpoint>;

impl CheckpointTable<TimeCheckpoint> {
    pub fn past_window_size(&self, version: u8) -> u32 {
        self.resolve(u32::from(version)).past_window_size
    }

    pub fn future_time_limit(&self, version: u8) -> u64 {
        self.resolve(u32::from(version)).future_time_limit
    }
}

// ---------------------------------------------------------------------------
// Dust

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DustCheckpoint {
    pub index: u8,
    pub version: u8,
    pub dust: u64,
}

impl RuleCheckpoint for DustCheckpoint {
    fn index(&self) -> u8 {
        self.index
    }

    fn threshold(&self) -> u32 {
        u32::from(self.version)
    }

    fn referenced_version(&self) -> Option<u8> {
        Some(self.version)
    }
}

pub type DustTable = CheckpointTable<DustCheckpoint>;

impl CheckpointTable<DustCheckpoint> {
    pub fn dust(&self, version: u8) -> u64 {
        self.resolve(u32::from(version)).dust
    }
}

// ---------------------------------------------------------------------------
// Miner reward

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MinerRewardCheckpoint {
    pub index: u8,
    pub version: u8,
    /// Trailing blocks whose sizes form the reward median.
    pub window: u32,
    pub full_reward_zone: u64,
    /// Base rewards are rounded down to a multiple of this unit (0 disables).
    pub cut_off: u64,
}

impl RuleCheckpoint for MinerRewardCheckpoint {
    fn index(&self) -> u8 {
        self.index
    }

    fn threshold(&self) -> u32 {
        u32::from(self.version)
    }

    fn referenced_version(&self) -> Option<u8> {
        Some(self.version)
    }
}

pub type MinerRewardTable = CheckpointTable<MinerRewardCheckpoint>;

impl CheckpointTable<MinerRewardCheckpoint> {
    pub fn window(&self, version: u8) -> u32 {
        self.resolve(u32::from(version)).window
    }

    pub fn full_reward_zone(&self, version: u8) -> u64 {
        self.resolve(u32::from(version)).full_reward_zone
    }

    pub fn cut_off(&self, version: u8) -> u64 {
        self.resolve(u32::from(version)).cut_off
    }
}

// ---------------------------------------------------------------------------
// Static reward

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StaticRewardCheckpoint {
    pub index: u8,
    pub version: u8,
    pub amount: u64,
    pub address: String,
}

impl RuleCheckpoint for StaticRewardCheckpoint {
    fn index(&self) -> u8 {
        self.index
    }

    fn threshold(&self) -> u32 {
        u32::from(self.version)
    }

    fn referenced_version(&self) -> Option<u8> {
        Some(self.version)
    }
}

pub type StaticRewardTable = CheckpointTable<StaticRewardCheckpoint>;

impl CheckpointTable<StaticRewardCheckpoint> {
    pub fn amount(&self, version: u8) -> u64 {
        self.resolve(u32::from(version)).amount
    }

    pub fn address(&self, version: u8) -> &str {
        &self.resolve(u32::from(version)).address
    }

    pub fn is_enabled(&self, version: u8) -> bool {
        let entry = self.resolve(u32::from(version));
        !entry.address.is_empty() && entry.amount > 0
    }
}

// ---------------------------------------------------------------------------

/// Every rule family of a network.
#[derive(Clone, Debug)]
pub struct RuleTables {
    pub block_versions: BlockVersionTable,
    pub difficulty: DifficultyTable,
    pub time: TimeTable,
    pub dust: DustTable,
    pub fusion_dust: DustTable,
    pub miner_reward: MinerRewardTable,
    pub static_reward: StaticRewardTable,
}

impl RuleTables {
    /// Startup pass over the assembled tables. Rejects empty tables, gaps in
    /// the index sequence, decreasing thresholds, and references to block
    /// versions the version table does not register.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        self.block_versions.validate_versions()?;

        self.difficulty.validate()?;
        self.difficulty.validate_references(&self.block_versions)?;
        self.time.validate()?;
        self.time.validate_references(&self.block_versions)?;
        self.dust.validate()?;
        self.dust.validate_references(&self.block_versions)?;
        self.fusion_dust.validate()?;
        self.fusion_dust.validate_references(&self.block_versions)?;
        self.miner_reward.validate()?;
        self.miner_reward.validate_references(&self.block_versions)?;
        self.static_reward.validate()?;
        self.static_reward.validate_references(&self.block_versions)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions() -> BlockVersionTable {
        CheckpointTable::new(
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
                    height: 100,
                    version: 2,
                    is_fork: true,
                    features: FEATURE_STATIC_REWARD,
                },
            ],
        )
    }

    #[test]
    fn resolve_scans_backwards() {
        let table = versions();
        assert_eq!(table.version(0), 1);
        assert_eq!(table.version(99), 1);
        assert_eq!(table.version(100), 2);
        assert_eq!(table.version(u32::MAX), 2);
    }

    #[test]
    fn upgrade_height_lookup() {
        let table = versions();
        assert_eq!(table.upgrade_height(2), Some(100));
        assert_eq!(table.upgrade_height(7), None);
        assert_eq!(table.forks(), vec![100]);
        assert_eq!(table.upgrade_heights(), vec![0, 100]);
        assert_eq!(table.successor(1), Some(2));
        assert_eq!(table.successor(2), None);
    }

    #[test]
    fn time_table_rejects_forward_reference() {
        let time = CheckpointTable::new(
            "time",
            vec![
                TimeCheckpoint {
                    index: 0,
                    version: 1,
                    past_window_size: 10,
                    future_time_limit: 600,
                },
                TimeCheckpoint {
                    index: 1,
                    version: 5,
                    past_window_size: 16,
                    future_time_limit: 600,
                },
            ],
        );
        assert!(time.validate().is_ok());
        assert_eq!(
            time.validate_references(&versions()),
            Err(CheckpointError::UnknownVersion {
                family: "time",
                index: 1,
                version: 5
            })
        );
    }

    #[test]
    fn non_monotonic_versions_rejected() {
        let table = CheckpointTable::new(
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
                    height: 50,
                    version: 1,
                    is_fork: false,
                    features: 0,
                },
            ],
        );
        assert_eq!(
            table.validate_versions(),
            Err(CheckpointError::DuplicateVersion { version: 1 })
        );
    }

    #[test]
    fn dense_indices_required() {
        let table = CheckpointTable::new(
            "dust",
            vec![DustCheckpoint {
                index: 3,
                version: 1,
                dust: 10,
            }],
        );
        assert!(matches!(
            table.validate(),
            Err(CheckpointError::IndexMismatch { position: 0, index: 3, .. })
        ));
    }
}
