//! Major block version schedule.

use std::fmt;

use crate::constants::{UPGRADE_VOTING_THRESHOLD, UPGRADE_VOTING_WINDOW};
use crate::rules::BlockVersionTable;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpgradeError {
    NotFound { version: u8 },
}

impl fmt::Display for UpgradeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeError::NotFound { version } => {
                write!(f, "block version {version} is not registered")
            }
        }
    }
}

impl std::error::Error for UpgradeError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UpgradeDetector {
    pub version: u8,
    pub activation_height: u32,
    pub is_fork: bool,
}

#[derive(Clone, Debug, Default)]
pub struct UpgradeManager {
    detectors: Vec<UpgradeDetector>,
}

impl UpgradeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: &BlockVersionTable) -> Self {
        let mut manager = Self::new();
        for entry in table.entries() {
            manager.add_block_version(entry.version, entry.height, entry.is_fork);
        }
        manager
    }

    /// Registers the next major version.
    ///
    /// # Panics
    ///
    /// Panics unless `version` is strictly greater than the last registered one.
    pub fn add_block_version(&mut self, version: u8, activation_height: u32, is_fork: bool) {
        if let Some(last) = self.detectors.last() {
            assert!(
                version > last.version,
                "block version {version} registered after {}",
                last.version
            );
        }
        self.detectors.push(UpgradeDetector {
            version,
            activation_height,
            is_fork,
        });
    }

    pub fn detectors(&self) -> &[UpgradeDetector] {
        &self.detectors
    }

    /// Version of the newest detector active at `height`; the genesis version
    /// when none is.
    pub fn block_version(&self, height: u32) -> u8 {
        self.detectors
            .iter()
            .rev()
            .find(|detector| detector.activation_height <= height)
            .or_else(|| self.detectors.first())
            .map(|detector| detector.version)
            .unwrap_or(0)
    }

    pub fn is_fork(&self, version: u8) -> bool {
        self.detectors
            .iter()
            .any(|detector| detector.version == version && detector.is_fork)
    }

    pub fn fork_index(&self, version: u8) -> Result<u32, UpgradeError> {
        self.detectors
            .iter()
            .find(|detector| detector.version == version)
            .map(|detector| detector.activation_height)
            .ok_or(UpgradeError::NotFound { version })
    }

    pub fn maximum_version(&self) -> u8 {
        self.detectors
            .last()
            .map(|detector| detector.version)
            .unwrap_or(0)
    }

    pub fn upgrade_heights(&self) -> Vec<u32> {
        self.detectors
            .iter()
            .map(|detector| detector.activation_height)
            .collect()
    }

    /// Version registered right after `version`, the only other value a
    /// block's upgrade vote may name.
    pub fn next_version(&self, version: u8) -> Option<u8> {
        self.detectors
            .iter()
            .map(|detector| detector.version)
            .find(|candidate| *candidate > version)
    }

    pub fn vote_passed<T: UpgradeVoteTally + ?Sized>(
        &self,
        tally: &T,
        version: u8,
        height: u32,
    ) -> bool {
        vote_threshold_reached(tally.votes_for(version, height), tally.window())
    }
}

/// Source of upgrade votes, usually the chain cache.
pub trait UpgradeVoteTally {
    /// Blocks in the window ending at `height` that voted for `version`.
    fn votes_for(&self, version: u8, height: u32) -> u32;

    fn window(&self) -> u32 {
        UPGRADE_VOTING_WINDOW
    }
}

pub fn vote_threshold_reached(votes: u32, window: u32) -> bool {
    if window == 0 {
        return false;
    }
    u64::from(votes) * 100 >= u64::from(window) * u64::from(UPGRADE_VOTING_THRESHOLD)
}
