//! Settled `(index, hash)` pairs below which the chain cannot be rewritten.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use xid_consensus::{hash256_from_hex, hash256_to_hex, Checkpoint, Hash256};

#[derive(Debug)]
pub enum CheckpointsFileError {
    Io(std::io::Error),
    Parse { line: usize, message: &'static str },
    Conflict { index: u32 },
}

impl std::fmt::Display for CheckpointsFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointsFileError::Io(err) => write!(f, "{err}"),
            CheckpointsFileError::Parse { line, message } => {
                write!(f, "checkpoints line {line}: {message}")
            }
            CheckpointsFileError::Conflict { index } => {
                write!(f, "conflicting checkpoint hashes for block {index}")
            }
        }
    }
}

impl std::error::Error for CheckpointsFileError {}

impl From<std::io::Error> for CheckpointsFileError {
    fn from(err: std::io::Error) -> Self {
        CheckpointsFileError::Io(err)
    }
}

#[derive(Clone, Debug)]
pub struct Checkpoints {
    points: BTreeMap<u32, Hash256>,
    enabled: bool,
}

impl Default for Checkpoints {
    fn default() -> Self {
        Self::new()
    }
}

impl Checkpoints {
    pub fn new() -> Self {
        Self {
            points: BTreeMap::new(),
            enabled: true,
        }
    }

    pub fn from_builtin(builtin: &[Checkpoint]) -> Result<Self, CheckpointsFileError> {
        let mut checkpoints = Self::new();
        for checkpoint in builtin {
            checkpoints.add_checkpoint(checkpoint.height, checkpoint.hash)?;
        }
        Ok(checkpoints)
    }

    /// Adding the same pair twice is a no-op; a different hash for a known
    /// index is a conflict.
    pub fn add_checkpoint(&mut self, index: u32, hash: Hash256) -> Result<(), CheckpointsFileError> {
        match self.points.get(&index) {
            Some(existing) if *existing != hash => Err(CheckpointsFileError::Conflict { index }),
            Some(_) => Ok(()),
            None => {
                self.points.insert(index, hash);
                Ok(())
            }
        }
    }

    /// Reads `index,hash` lines. Blank lines and `#` comments are skipped.
    /// Returns the number of lines that named a checkpoint.
    pub fn load_from_reader<R: BufRead>(&mut self, reader: R) -> Result<usize, CheckpointsFileError> {
        let mut loaded = 0;
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (index, hash) = line.split_once(',').ok_or(CheckpointsFileError::Parse {
                line: number + 1,
                message: "expected index,hash",
            })?;
            let index = index
                .trim()
                .parse::<u32>()
                .map_err(|_| CheckpointsFileError::Parse {
                    line: number + 1,
                    message: "invalid block index",
                })?;
            let hash = hash256_from_hex(hash.trim()).map_err(|_| CheckpointsFileError::Parse {
                line: number + 1,
                message: "invalid block hash",
            })?;
            self.add_checkpoint(index, hash)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn load_from_file(&mut self, path: &Path) -> Result<usize, CheckpointsFileError> {
        let file = std::fs::File::open(path)?;
        let loaded = self.load_from_reader(std::io::BufReader::new(file))?;
        xid_log::log_info!(
            "loaded {loaded} checkpoints from {}, top {}",
            path.display(),
            self.top_checkpoint_index()
                .map(|index| index.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(loaded)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn top_checkpoint_index(&self) -> Option<u32> {
        self.points.keys().next_back().copied()
    }

    pub fn checkpoint_heights(&self) -> Vec<u32> {
        self.points.keys().copied().collect()
    }

    pub fn hash_at(&self, index: u32) -> Option<Hash256> {
        self.points.get(&index).copied()
    }

    pub fn is_in_checkpoint_zone(&self, index: u32) -> bool {
        self.enabled
            && self
                .top_checkpoint_index()
                .is_some_and(|top| index <= top)
    }

    /// False only for a known index whose hash differs. Disabled checkpoints
    /// never vouch for a block.
    pub fn check_block(&self, index: u32, hash: &Hash256) -> bool {
        if !self.enabled {
            return false;
        }
        match self.points.get(&index) {
            None => true,
            Some(expected) if expected == hash => {
                xid_log::log_debug!("checkpoint passed for block {index}");
                true
            }
            Some(expected) => {
                xid_log::log_warn!(
                    "checkpoint failed for block {index}: expected {}, got {}",
                    hash256_to_hex(expected),
                    hash256_to_hex(hash)
                );
                false
            }
        }
    }

    /// Whether a side-chain block at `index` may be accepted while the main
    /// chain has `blockchain_size` blocks. Alternatives must fork above the
    /// last checkpoint the main chain has already passed.
    pub fn is_alternative_block_allowed(&self, blockchain_size: u32, index: u32) -> bool {
        if blockchain_size == 0 {
            return false;
        }
        match self.points.range(..=blockchain_size).next_back() {
            None => true,
            Some((checkpoint, _)) => *checkpoint < index,
        }
    }
}
