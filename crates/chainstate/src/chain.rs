//! Main chain plus alternative branches, with reorganization to the
//! heaviest branch.
//!
//! Every alternative branch forks directly off the main chain. Growing a
//! branch from the middle of another branch copies the shared prefix so the
//! invariant holds. Branches that fall too far behind the tip, or that fork
//! below a checkpoint the main chain has passed, are dropped.

use std::sync::{Arc, RwLock};

use xid_consensus::upgrades::UpgradeVoteTally;
use xid_consensus::Hash256;
use xid_primitives::encoding::DecodeError;
use xid_primitives::raw::RawBlock;

use crate::cache::{BlockchainCache, CacheError, CachedBlockInfo, ChainView, PushedBlock};
use crate::checkpoints::Checkpoints;
use crate::context::{ChainContext, ContextError};
use crate::genesis::genesis_block;
use crate::memory::{ForkView, MemoryBlockchainCache};
use crate::validation::{BlockValidator, ValidationError, ValidationReport};

/// Blocks an alternative tip may trail the main tip before it is dropped.
pub const DEFAULT_ALTERNATIVE_DEPTH: u32 = 1_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddBlockOutcome {
    AddedToMain,
    AddedToAlternative,
    Reorganized { popped: u32, pushed: u32 },
    AlreadyExists,
    /// Parent unknown; the block was not kept.
    Orphaned,
}

#[derive(Debug)]
pub enum ChainError {
    Rejected(ValidationReport),
    Decode(DecodeError),
    AlternativeNotAllowed { index: u32 },
    CheckpointConflict { index: u32 },
    GenesisMismatch,
    Cache(CacheError),
    Context(ContextError),
    Poisoned,
}

impl ChainError {
    /// Conditions after which block processing must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            ChainError::Cache(err) => err.is_fatal(),
            ChainError::GenesisMismatch | ChainError::Context(_) | ChainError::Poisoned => true,
            ChainError::Rejected(_)
            | ChainError::Decode(_)
            | ChainError::AlternativeNotAllowed { .. }
            | ChainError::CheckpointConflict { .. } => false,
        }
    }
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Rejected(report) => write!(f, "block rejected: {report}"),
            ChainError::Decode(err) => write!(f, "undecodable block: {err}"),
            ChainError::AlternativeNotAllowed { index } => {
                write!(f, "alternative block {index} forks below a checkpoint")
            }
            ChainError::CheckpointConflict { index } => {
                write!(f, "checkpoint for block {index} conflicts with the chain")
            }
            ChainError::GenesisMismatch => write!(f, "stored genesis does not match network"),
            ChainError::Cache(err) => write!(f, "{err}"),
            ChainError::Context(err) => write!(f, "{err}"),
            ChainError::Poisoned => write!(f, "chain lock poisoned"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<CacheError> for ChainError {
    fn from(err: CacheError) -> Self {
        ChainError::Cache(err)
    }
}

impl From<ContextError> for ChainError {
    fn from(err: ContextError) -> Self {
        ChainError::Context(err)
    }
}

impl From<ValidationError> for ChainError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Rejected(report) => ChainError::Rejected(report),
            ValidationError::Decode(err) => ChainError::Decode(err),
            ValidationError::Cache(err) => ChainError::Cache(err),
        }
    }
}

/// Snapshot of the chain tip.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChainTip {
    pub index: u32,
    pub info: CachedBlockInfo,
}

struct ChainState<C> {
    main: C,
    alternatives: Vec<MemoryBlockchainCache>,
    /// Starts as the context's checkpoints; grows through
    /// [`Blockchain::add_checkpoint`].
    checkpoints: Checkpoints,
}

pub struct Blockchain<C> {
    validator: BlockValidator,
    pruning: bool,
    alternative_depth: u32,
    state: RwLock<ChainState<C>>,
}

impl<C: BlockchainCache> Blockchain<C> {
    pub fn new(context: Arc<ChainContext>, main: C) -> Result<Self, ChainError> {
        Self::with_validator(BlockValidator::new(context), main)
    }

    /// Pushes genesis into an empty `main`, or checks the stored one.
    pub fn with_validator(validator: BlockValidator, mut main: C) -> Result<Self, ChainError> {
        let genesis = genesis_block(&validator.context().params);
        match main.block_hash(0)? {
            None => {
                main.push_block(genesis)?;
                xid_log::log_info!("initialized chain with genesis");
            }
            Some(hash) if hash == genesis.hash() => {}
            Some(_) => return Err(ChainError::GenesisMismatch),
        }
        let checkpoints = validator.context().checkpoints.clone();
        Ok(Self {
            validator,
            pruning: false,
            alternative_depth: DEFAULT_ALTERNATIVE_DEPTH,
            state: RwLock::new(ChainState {
                main,
                alternatives: Vec::new(),
                checkpoints,
            }),
        })
    }

    /// Prune main-chain transactions once they are `pruning_depth` blocks
    /// below the tip.
    pub fn with_pruning(mut self, enabled: bool) -> Self {
        self.pruning = enabled;
        self
    }

    pub fn with_alternative_depth(mut self, depth: u32) -> Self {
        self.alternative_depth = depth;
        self
    }

    pub fn context(&self) -> &ChainContext {
        self.validator.context()
    }

    /// Runs `read` against the main chain under the read lock.
    pub fn with_main<R>(&self, read: impl FnOnce(&C) -> R) -> Result<R, ChainError> {
        let state = self.state.read().map_err(|_| ChainError::Poisoned)?;
        Ok(read(&state.main))
    }

    pub fn tip(&self) -> Result<ChainTip, ChainError> {
        let state = self.state.read().map_err(|_| ChainError::Poisoned)?;
        let index = state
            .main
            .top_block_index()
            .ok_or(CacheError::Corrupt("main chain lost genesis"))?;
        let info = state
            .main
            .block_info(index)?
            .ok_or(CacheError::Corrupt("missing top block info"))?;
        Ok(ChainTip { index, info })
    }

    pub fn alternative_count(&self) -> Result<usize, ChainError> {
        let state = self.state.read().map_err(|_| ChainError::Poisoned)?;
        Ok(state.alternatives.len())
    }

    /// Snapshot of the checkpoints currently enforced.
    pub fn checkpoints(&self) -> Result<Checkpoints, ChainError> {
        let state = self.state.read().map_err(|_| ChainError::Poisoned)?;
        Ok(state.checkpoints.clone())
    }

    /// Adds a checkpoint at runtime. A hash that contradicts a known
    /// checkpoint or the main-chain block at `index` is refused.
    pub fn add_checkpoint(&self, index: u32, hash: Hash256) -> Result<(), ChainError> {
        let mut state = self.state.write().map_err(|_| ChainError::Poisoned)?;
        if state.main.block_hash(index)?.is_some_and(|stored| stored != hash) {
            return Err(ChainError::CheckpointConflict { index });
        }
        state
            .checkpoints
            .add_checkpoint(index, hash)
            .map_err(|_| ChainError::CheckpointConflict { index })?;
        state.evict_alternatives(self.alternative_depth);
        Ok(())
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool, ChainError> {
        let state = self.state.read().map_err(|_| ChainError::Poisoned)?;
        state.contains(hash)
    }

    /// Main-chain votes for `version` in the voting window ending at the tip.
    pub fn upgrade_votes(&self, version: u8) -> Result<u32, ChainError> {
        let state = self.state.read().map_err(|_| ChainError::Poisoned)?;
        let Some(top) = state.main.top_block_index() else {
            return Ok(0);
        };
        let tally = ChainVoteTally::new(&state.main, self.context().params.upgrade_voting_window);
        Ok(tally.votes_for(version, top))
    }

    /// Validates `raw` and links it into the main chain or a branch,
    /// reorganizing when a branch becomes heavier than the main chain.
    pub fn add_block(&self, raw: &RawBlock, now: u64) -> Result<AddBlockOutcome, ChainError> {
        let template = raw.template().map_err(ChainError::Decode)?;
        let hash = template.hash();
        let previous = template.header.previous_block_hash;

        let mut state = self.state.write().map_err(|_| ChainError::Poisoned)?;
        if state.contains(&hash)? {
            return Ok(AddBlockOutcome::AlreadyExists);
        }

        let outcome = self.link(&mut state, raw, &hash, previous, now)?;
        let first_new = match outcome {
            AddBlockOutcome::AddedToMain => state.main.top_block_index(),
            AddBlockOutcome::Reorganized { pushed, .. } => state
                .main
                .top_block_index()
                .map(|top| (top + 1).saturating_sub(pushed)),
            _ => None,
        };
        if self.pruning {
            if let Some(first_new) = first_new {
                state.prune_main(first_new, self.context().params.pruning_depth)?;
            }
        }
        if outcome != AddBlockOutcome::Orphaned {
            state.evict_alternatives(self.alternative_depth);
        }
        Ok(outcome)
    }

    fn link(
        &self,
        state: &mut ChainState<C>,
        raw: &RawBlock,
        hash: &Hash256,
        previous: Hash256,
        now: u64,
    ) -> Result<AddBlockOutcome, ChainError> {
        if state.main.top_block_hash()? == Some(previous) {
            let block = self
                .validator
                .validate_with(&state.main, raw, now, &state.checkpoints)?;
            state.main.push_block(block)?;
            return Ok(AddBlockOutcome::AddedToMain);
        }

        let (branch, created) = match state.main.block_index(&previous)? {
            Some(parent) => {
                let split = parent + 1;
                state.check_alternative(split)?;
                let fork = MemoryBlockchainCache::fork_from(&state.main, split)?;
                state.alternatives.push(fork);
                (state.alternatives.len() - 1, true)
            }
            None => match state.find_alternative(&previous)? {
                Some((position, parent)) => {
                    state.check_alternative(parent + 1)?;
                    let alternative = &state.alternatives[position];
                    if alternative.top_block_index() == Some(parent) {
                        (position, false)
                    } else {
                        let fork = alternative.fork_at(parent + 1)?;
                        state.alternatives.push(fork);
                        (state.alternatives.len() - 1, true)
                    }
                }
                None => {
                    xid_log::log_debug!(
                        "orphan block {}",
                        xid_consensus::hash256_to_hex(hash)
                    );
                    return Ok(AddBlockOutcome::Orphaned);
                }
            },
        };

        let validated = {
            let ChainState {
                main,
                alternatives,
                checkpoints,
            } = &*state;
            let view = ForkView::new(main, &alternatives[branch]);
            self.validator.validate_with(&view, raw, now, checkpoints)
        };
        let result = validated
            .map_err(ChainError::from)
            .and_then(|block| {
                state.alternatives[branch]
                    .push_block(block)
                    .map_err(ChainError::from)
            });
        if let Err(err) = result {
            if created {
                state.alternatives.remove(branch);
            }
            return Err(err);
        }

        let main_weight = state.main.parent_state()?.cumulative_difficulty;
        if state.alternatives[branch].cumulative_difficulty() > main_weight {
            let (popped, pushed) = state.reorganize(branch)?;
            xid_log::log_info!(
                "reorganized: popped {popped} blocks, pushed {pushed} blocks, new tip {}",
                state.main.top_block_index().unwrap_or(0)
            );
            return Ok(AddBlockOutcome::Reorganized { popped, pushed });
        }
        Ok(AddBlockOutcome::AddedToAlternative)
    }
}

impl<C: BlockchainCache> ChainState<C> {
    fn check_alternative(&self, index: u32) -> Result<(), ChainError> {
        if self.checkpoints.is_enabled()
            && !self
                .checkpoints
                .is_alternative_block_allowed(self.main.block_count(), index)
        {
            return Err(ChainError::AlternativeNotAllowed { index });
        }
        Ok(())
    }

    /// Prunes the blocks that sank `depth` below the tip when the main chain
    /// gained every block from `first_new` up.
    fn prune_main(&mut self, first_new: u32, depth: u32) -> Result<(), ChainError> {
        let Some(last) = self
            .main
            .top_block_index()
            .and_then(|top| top.checked_sub(depth))
        else {
            return Ok(());
        };
        for index in first_new.saturating_sub(depth)..=last {
            if self.main.prune_block(index)? {
                xid_log::log_trace!("pruned transactions of block {index}");
            }
        }
        Ok(())
    }

    /// Drops branches whose tip trails the main tip by more than `depth`
    /// blocks and branches forking at or below a passed checkpoint.
    fn evict_alternatives(&mut self, depth: u32) {
        let Some(top) = self.main.top_block_index() else {
            return;
        };
        let size = self.main.block_count();
        let checkpoints = &self.checkpoints;
        let before = self.alternatives.len();
        self.alternatives.retain(|alternative| {
            let start = alternative.start_block_index();
            let tip = alternative.top_block_index().unwrap_or(start);
            let allowed =
                !checkpoints.is_enabled() || checkpoints.is_alternative_block_allowed(size, start);
            allowed && tip.saturating_add(depth) >= top
        });
        let evicted = before - self.alternatives.len();
        if evicted > 0 {
            xid_log::log_debug!("dropped {evicted} stale alternative chains");
        }
    }

    fn contains(&self, hash: &Hash256) -> Result<bool, ChainError> {
        if self.main.has_block(hash)? {
            return Ok(true);
        }
        for alternative in &self.alternatives {
            if alternative.has_block(hash)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Branch holding `hash` and the index of that block.
    fn find_alternative(&self, hash: &Hash256) -> Result<Option<(usize, u32)>, ChainError> {
        for (position, alternative) in self.alternatives.iter().enumerate() {
            if let Some(index) = alternative.block_index(hash)? {
                return Ok(Some((position, index)));
            }
        }
        Ok(None)
    }

    /// Swaps the main chain suffix for branch `position`. The old suffix
    /// becomes a branch; branches that forked off it are re-rooted onto it.
    fn reorganize(&mut self, position: usize) -> Result<(u32, u32), ChainError> {
        let mut side = self.alternatives.remove(position);
        let split = side.start_block_index();
        let incoming = side.pop_to(split)?;

        let outgoing = self.main.pop_to(split)?;
        let mut old = MemoryBlockchainCache::fork_from(&self.main, split)?;
        for block in &outgoing {
            old.push_block(block.clone())?;
        }

        if let Err(err) = push_all(&mut self.main, &incoming) {
            xid_log::log_error!("reorganization at {split} failed, restoring main chain: {err}");
            self.main.pop_to(split)?;
            push_all(&mut self.main, &outgoing)?;
            return Err(err.into());
        }

        let mut rerooted = Vec::with_capacity(self.alternatives.len() + 1);
        for alternative in std::mem::take(&mut self.alternatives) {
            let start = alternative.start_block_index();
            if start <= split {
                rerooted.push(alternative);
                continue;
            }
            let mut branch = old.fork_at(start)?;
            let mut source = alternative;
            push_all(&mut branch, &source.pop_to(start)?)?;
            rerooted.push(branch);
        }
        if old.top_block_index().is_some() {
            rerooted.push(old);
        }
        self.alternatives = rerooted;
        Ok((outgoing.len() as u32, incoming.len() as u32))
    }
}

fn push_all<C: BlockchainCache + ?Sized>(cache: &mut C, blocks: &[PushedBlock]) -> Result<(), CacheError> {
    for block in blocks {
        cache.push_block(block.clone())?;
    }
    Ok(())
}

/// Counts upgrade votes recorded in cached block infos.
pub struct ChainVoteTally<'a> {
    view: &'a dyn ChainView,
    window: u32,
}

impl<'a> ChainVoteTally<'a> {
    pub fn new(view: &'a dyn ChainView, window: u32) -> Self {
        Self { view, window }
    }
}

impl UpgradeVoteTally for ChainVoteTally<'_> {
    fn votes_for(&self, version: u8, height: u32) -> u32 {
        let first = (height + 1).saturating_sub(self.window);
        (first..=height)
            .filter_map(|index| self.view.block_info(index).ok().flatten())
            .filter(|info| info.upgrade_vote == Some(version))
            .count() as u32
    }

    fn window(&self) -> u32 {
        self.window
    }
}
