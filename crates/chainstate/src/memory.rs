//! In-memory cache, used for side chains and tests.

use std::collections::{BTreeMap, HashMap, HashSet};

use xid_consensus::Hash256;
use xid_primitives::hash::NULL_HASH;
use xid_primitives::raw::RawBlock;
use xid_primitives::transaction::{KeyImage, Transaction};

use crate::cache::{
    check_parent, BlockchainCache, CacheError, CachedBlockInfo, ChainView, OutputReference,
    ParentState, PushedBlock, TransactionLocation,
};

#[derive(Clone, Debug)]
struct CachedBlock {
    info: CachedBlockInfo,
    block: PushedBlock,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryBlockchainCache {
    start_index: u32,
    parent: ParentState,
    /// Outputs per amount below `start_index`.
    base_output_counts: BTreeMap<u64, u32>,
    blocks: Vec<CachedBlock>,
    hashes: HashMap<Hash256, u32>,
    transactions: HashMap<Hash256, TransactionLocation>,
    spent: HashMap<KeyImage, u32>,
    /// Outputs per amount, the first one at global index `base_output_counts[amount]`.
    outputs: BTreeMap<u64, Vec<OutputReference>>,
}

impl MemoryBlockchainCache {
    /// Empty cache starting at genesis.
    pub fn new() -> Self {
        Self {
            parent: ParentState {
                hash: NULL_HASH,
                ..ParentState::default()
            },
            ..Self::default()
        }
    }

    /// Empty side chain whose first block will sit at `split_index` on top of
    /// `parent`'s block `split_index - 1`.
    pub fn fork_from(parent: &dyn BlockchainCache, split_index: u32) -> Result<Self, CacheError> {
        if split_index == 0 || split_index <= parent.start_block_index() {
            return Err(CacheError::InvalidBlock("side chains cannot replace genesis"));
        }
        let below = parent
            .block_info(split_index - 1)?
            .ok_or(CacheError::BlockOutOfRange {
                index: split_index - 1,
            })?;
        Ok(Self {
            start_index: split_index,
            parent: ParentState::of(&below),
            base_output_counts: parent.output_counts_before(split_index)?,
            ..Self::default()
        })
    }

    /// Copy of this side chain truncated so that `split_index` is its next
    /// block.
    pub fn fork_at(&self, split_index: u32) -> Result<Self, CacheError> {
        let mut fork = self.clone();
        fork.pop_to(split_index)?;
        Ok(fork)
    }

    pub fn cumulative_difficulty(&self) -> u64 {
        self.blocks
            .last()
            .map(|block| block.info.cumulative_difficulty)
            .unwrap_or(self.parent.cumulative_difficulty)
    }

    fn next_index(&self) -> u32 {
        self.start_index + self.blocks.len() as u32
    }

    fn base_count(&self, amount: u64) -> u32 {
        self.base_output_counts.get(&amount).copied().unwrap_or(0)
    }

    fn cached(&self, index: u32) -> Option<&CachedBlock> {
        index
            .checked_sub(self.start_index)
            .and_then(|offset| self.blocks.get(offset as usize))
    }

    fn cached_mut(&mut self, index: u32) -> Option<&mut CachedBlock> {
        index
            .checked_sub(self.start_index)
            .and_then(|offset| self.blocks.get_mut(offset as usize))
    }
}

impl ChainView for MemoryBlockchainCache {
    fn top_block_index(&self) -> Option<u32> {
        if self.blocks.is_empty() {
            None
        } else {
            Some(self.next_index() - 1)
        }
    }

    fn block_info(&self, index: u32) -> Result<Option<CachedBlockInfo>, CacheError> {
        Ok(self.cached(index).map(|block| block.info))
    }

    fn key_image_spent_at(&self, key_image: &KeyImage) -> Result<Option<u32>, CacheError> {
        Ok(self.spent.get(key_image).copied())
    }

    fn key_output(
        &self,
        amount: u64,
        global_index: u32,
    ) -> Result<Option<OutputReference>, CacheError> {
        let Some(local) = global_index.checked_sub(self.base_count(amount)) else {
            return Ok(None);
        };
        Ok(self
            .outputs
            .get(&amount)
            .and_then(|outputs| outputs.get(local as usize))
            .copied())
    }

    fn transaction_location(
        &self,
        hash: &Hash256,
    ) -> Result<Option<TransactionLocation>, CacheError> {
        Ok(self.transactions.get(hash).copied())
    }
}

impl BlockchainCache for MemoryBlockchainCache {
    fn start_block_index(&self) -> u32 {
        self.start_index
    }

    fn parent_hash(&self) -> Hash256 {
        self.parent.hash
    }

    fn parent_state(&self) -> Result<ParentState, CacheError> {
        Ok(self
            .blocks
            .last()
            .map(|block| ParentState::of(&block.info))
            .unwrap_or(self.parent))
    }

    fn block_index(&self, hash: &Hash256) -> Result<Option<u32>, CacheError> {
        Ok(self.hashes.get(hash).copied())
    }

    fn raw_block(&self, index: u32) -> Result<Option<RawBlock>, CacheError> {
        Ok(self.cached(index).map(|block| block.block.raw_block.clone()))
    }

    fn raw_transaction(
        &self,
        block_index: u32,
        transaction_index: u32,
    ) -> Result<Transaction, CacheError> {
        let block = self
            .cached(block_index)
            .ok_or(CacheError::BlockOutOfRange { index: block_index })?;
        block
            .block
            .transactions
            .get(transaction_index as usize)
            .cloned()
            .ok_or(CacheError::TransactionOutOfRange {
                block_index,
                transaction_index,
            })
    }

    fn output_count(&self, amount: u64) -> Result<u32, CacheError> {
        let local = self.outputs.get(&amount).map(Vec::len).unwrap_or(0) as u32;
        Ok(self.base_count(amount) + local)
    }

    fn output_counts_before(&self, index: u32) -> Result<BTreeMap<u64, u32>, CacheError> {
        if index < self.start_index {
            return Err(CacheError::BlockOutOfRange { index });
        }
        let mut counts = self.base_output_counts.clone();
        for (amount, outputs) in &self.outputs {
            let below = outputs.partition_point(|output| output.block_index < index) as u32;
            if below > 0 {
                *counts.entry(*amount).or_insert(0) += below;
            }
        }
        Ok(counts)
    }

    fn push_block(&mut self, block: PushedBlock) -> Result<(), CacheError> {
        let parent = self.parent_state()?;
        check_parent(&block, &parent)?;
        let index = self.next_index();
        if block.template.block_index() != Some(index) {
            return Err(CacheError::InvalidBlock(
                "base transaction height does not match block index",
            ));
        }
        let info = block.info_on_top_of(&parent)?;

        let mut seen = HashSet::new();
        for key_image in block.transactions.iter().flat_map(|tx| tx.key_images()) {
            if self.spent.contains_key(key_image) || !seen.insert(*key_image) {
                return Err(CacheError::InvalidBlock("key image already spent"));
            }
        }

        for (position, transaction) in block.transactions.iter().enumerate() {
            self.transactions.insert(
                transaction.hash(),
                TransactionLocation {
                    block_index: index,
                    transaction_index: position as u32,
                },
            );
            for key_image in transaction.key_images() {
                self.spent.insert(*key_image, index);
            }
            let unlock = transaction.unlock_index();
            for (output_index, output) in transaction.prefix.outputs.iter().enumerate() {
                self.outputs
                    .entry(output.amount)
                    .or_default()
                    .push(OutputReference {
                        block_index: index,
                        transaction_index: position as u32,
                        output_index: output_index as u32,
                        public_key: *output.public_key(),
                        unlock,
                    });
            }
        }
        self.hashes.insert(info.hash, index);
        self.blocks.push(CachedBlock { info, block });
        Ok(())
    }

    fn prune_block(&mut self, index: u32) -> Result<bool, CacheError> {
        let cached = self
            .cached_mut(index)
            .ok_or(CacheError::BlockOutOfRange { index })?;
        Ok(cached.block.prune())
    }

    fn pop_to(&mut self, index: u32) -> Result<Vec<PushedBlock>, CacheError> {
        if index < self.start_index {
            return Err(CacheError::PopPastStart {
                requested: index,
                start: self.start_index,
            });
        }
        let keep = (index - self.start_index) as usize;
        if keep >= self.blocks.len() {
            return Ok(Vec::new());
        }
        let popped = self.blocks.split_off(keep);
        for cached in popped.iter().rev() {
            self.hashes.remove(&cached.info.hash);
            for transaction in cached.block.transactions.iter().rev() {
                self.transactions.remove(&transaction.hash());
                for key_image in transaction.key_images() {
                    self.spent.remove(key_image);
                }
                for output in transaction.prefix.outputs.iter().rev() {
                    if let Some(outputs) = self.outputs.get_mut(&output.amount) {
                        outputs.pop();
                        if outputs.is_empty() {
                            self.outputs.remove(&output.amount);
                        }
                    }
                }
            }
        }
        Ok(popped.into_iter().map(|cached| cached.block).collect())
    }
}

/// A side chain seen together with the main chain below its split point.
pub struct ForkView<'a> {
    main: &'a dyn BlockchainCache,
    side: &'a MemoryBlockchainCache,
}

impl<'a> ForkView<'a> {
    pub fn new(main: &'a dyn BlockchainCache, side: &'a MemoryBlockchainCache) -> Self {
        Self { main, side }
    }
}

impl ChainView for ForkView<'_> {
    fn top_block_index(&self) -> Option<u32> {
        self.side
            .top_block_index()
            .or_else(|| self.side.start_index.checked_sub(1))
    }

    fn block_info(&self, index: u32) -> Result<Option<CachedBlockInfo>, CacheError> {
        if index >= self.side.start_index {
            self.side.block_info(index)
        } else {
            self.main.block_info(index)
        }
    }

    fn key_image_spent_at(&self, key_image: &KeyImage) -> Result<Option<u32>, CacheError> {
        if let Some(index) = self.side.key_image_spent_at(key_image)? {
            return Ok(Some(index));
        }
        Ok(self
            .main
            .key_image_spent_at(key_image)?
            .filter(|index| *index < self.side.start_index))
    }

    fn key_output(
        &self,
        amount: u64,
        global_index: u32,
    ) -> Result<Option<OutputReference>, CacheError> {
        if global_index < self.side.base_count(amount) {
            self.main.key_output(amount, global_index)
        } else {
            self.side.key_output(amount, global_index)
        }
    }

    fn transaction_location(
        &self,
        hash: &Hash256,
    ) -> Result<Option<TransactionLocation>, CacheError> {
        if let Some(location) = self.side.transaction_location(hash)? {
            return Ok(Some(location));
        }
        Ok(self
            .main
            .transaction_location(hash)?
            .filter(|location| location.block_index < self.side.start_index))
    }
}
