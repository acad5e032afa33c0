//! Block-indexed chain caches.
//!
//! A cache owns a contiguous run of blocks starting at `start_block_index`.
//! The main chain starts at genesis; side-chain caches start at their split
//! point and read everything below it from the main chain through
//! [`ForkView`](crate::memory::ForkView).

use std::collections::BTreeMap;

use xid_consensus::{EligibleIndex, Hash256};
use xid_primitives::block::BlockTemplate;
use xid_primitives::encoding::{DecodeError, Decoder, Encoder};
use xid_primitives::raw::RawBlock;
use xid_primitives::transaction::{KeyImage, PublicKey, Transaction};
use xid_storage::StoreError;

const BLOCK_INFO_LEN: usize = 32 + 1 + 1 + 1 + 8 * 5;
const OUTPUT_REFERENCE_LEN: usize = 4 * 3 + 32 + 4 + 8;
const TX_LOCATION_LEN: usize = 8;

#[derive(Debug)]
pub enum CacheError {
    Store(StoreError),
    Decode(DecodeError),
    Corrupt(&'static str),
    ParentMismatch {
        expected: Hash256,
        found: Hash256,
    },
    PopPastStart {
        requested: u32,
        start: u32,
    },
    BlockOutOfRange {
        index: u32,
    },
    TransactionOutOfRange {
        block_index: u32,
        transaction_index: u32,
    },
    InvalidBlock(&'static str),
    SchemaTooNew {
        found: u32,
        supported: u32,
    },
}

impl CacheError {
    /// Conditions after which the cache can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CacheError::Store(_)
                | CacheError::Corrupt(_)
                | CacheError::Decode(_)
                | CacheError::ParentMismatch { .. }
                | CacheError::PopPastStart { .. }
                | CacheError::SchemaTooNew { .. }
        )
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Store(err) => write!(f, "{err}"),
            CacheError::Decode(err) => write!(f, "{err}"),
            CacheError::Corrupt(message) => write!(f, "corrupt cache: {message}"),
            CacheError::ParentMismatch { expected, found } => write!(
                f,
                "block parent {} does not extend top {}",
                xid_consensus::hash256_to_hex(found),
                xid_consensus::hash256_to_hex(expected)
            ),
            CacheError::PopPastStart { requested, start } => {
                write!(f, "cannot pop to {requested}, cache starts at {start}")
            }
            CacheError::BlockOutOfRange { index } => write!(f, "block {index} is not cached"),
            CacheError::TransactionOutOfRange {
                block_index,
                transaction_index,
            } => write!(
                f,
                "block {block_index} has no transaction {transaction_index}"
            ),
            CacheError::InvalidBlock(message) => write!(f, "{message}"),
            CacheError::SchemaTooNew { found, supported } => write!(
                f,
                "database schema {found} is newer than supported schema {supported}"
            ),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        CacheError::Store(err)
    }
}

impl From<DecodeError> for CacheError {
    fn from(err: DecodeError) -> Self {
        CacheError::Decode(err)
    }
}

/// Per-height summary kept for every cached block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CachedBlockInfo {
    pub hash: Hash256,
    pub major_version: u8,
    pub upgrade_vote: Option<u8>,
    pub timestamp: u64,
    pub blob_size: u64,
    pub cumulative_difficulty: u64,
    pub already_generated_coins: u64,
    pub already_generated_transactions: u64,
}

impl CachedBlockInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(BLOCK_INFO_LEN);
        encoder.write_hash(&self.hash);
        encoder.write_u8(self.major_version);
        match self.upgrade_vote {
            Some(vote) => {
                encoder.write_u8(1);
                encoder.write_u8(vote);
            }
            None => {
                encoder.write_u8(0);
                encoder.write_u8(0);
            }
        }
        encoder.write_u64_le(self.timestamp);
        encoder.write_u64_le(self.blob_size);
        encoder.write_u64_le(self.cumulative_difficulty);
        encoder.write_u64_le(self.already_generated_coins);
        encoder.write_u64_le(self.already_generated_transactions);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let hash = decoder.read_hash()?;
        let major_version = decoder.read_u8()?;
        let has_vote = decoder.read_u8()?;
        let vote = decoder.read_u8()?;
        let upgrade_vote = match has_vote {
            0 => None,
            1 => Some(vote),
            _ => return Err(DecodeError::InvalidData("invalid upgrade vote flag")),
        };
        let info = Self {
            hash,
            major_version,
            upgrade_vote,
            timestamp: decoder.read_u64_le()?,
            blob_size: decoder.read_u64_le()?,
            cumulative_difficulty: decoder.read_u64_le()?,
            already_generated_coins: decoder.read_u64_le()?,
            already_generated_transactions: decoder.read_u64_le()?,
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(info)
    }
}

/// Where an output with a given `(amount, global index)` lives, and when it
/// unlocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutputReference {
    pub block_index: u32,
    pub transaction_index: u32,
    pub output_index: u32,
    pub public_key: PublicKey,
    pub unlock: EligibleIndex,
}

impl OutputReference {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(OUTPUT_REFERENCE_LEN);
        encoder.write_u32_le(self.block_index);
        encoder.write_u32_le(self.transaction_index);
        encoder.write_u32_le(self.output_index);
        encoder.write_hash(&self.public_key);
        encoder.write_u32_le(self.unlock.height);
        encoder.write_u64_le(self.unlock.timestamp);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != OUTPUT_REFERENCE_LEN {
            return Err(DecodeError::InvalidData("invalid output reference length"));
        }
        let mut decoder = Decoder::new(bytes);
        Ok(Self {
            block_index: decoder.read_u32_le()?,
            transaction_index: decoder.read_u32_le()?,
            output_index: decoder.read_u32_le()?,
            public_key: decoder.read_hash()?,
            unlock: EligibleIndex::new(decoder.read_u32_le()?, decoder.read_u64_le()?),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransactionLocation {
    pub block_index: u32,
    /// Position among the block's transactions: base first, then the static
    /// reward when present, then the listed transactions.
    pub transaction_index: u32,
}

impl TransactionLocation {
    pub fn encode(&self) -> [u8; TX_LOCATION_LEN] {
        let mut out = [0u8; TX_LOCATION_LEN];
        out[0..4].copy_from_slice(&self.block_index.to_le_bytes());
        out[4..8].copy_from_slice(&self.transaction_index.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != TX_LOCATION_LEN {
            return None;
        }
        Some(Self {
            block_index: u32::from_le_bytes(bytes[0..4].try_into().ok()?),
            transaction_index: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
        })
    }
}

/// A validated block ready to be appended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PushedBlock {
    pub template: BlockTemplate,
    /// Base transaction, static reward transaction when present, then the
    /// listed transactions in template order.
    pub transactions: Vec<Transaction>,
    pub raw_block: RawBlock,
    pub block_difficulty: u64,
    pub blob_size: u64,
    /// Change of the generated coin total caused by this block.
    pub generated_coins: i64,
}

impl PushedBlock {
    pub fn hash(&self) -> Hash256 {
        self.template.hash()
    }

    pub fn static_reward_transaction(&self) -> Option<&Transaction> {
        self.template
            .static_reward_hash
            .and_then(|_| self.transactions.get(1))
    }

    /// Prunes the listed transactions, keeping `raw_block` in step. Returns
    /// whether anything changed.
    pub fn prune(&mut self) -> bool {
        let listed = self
            .transactions
            .len()
            .saturating_sub(self.raw_block.transactions.len());
        let mut changed = false;
        for (transaction, bytes) in self.transactions[listed..]
            .iter_mut()
            .zip(&mut self.raw_block.transactions)
        {
            if !transaction.signatures.is_pruned() {
                transaction.prune();
                *bytes = transaction.to_bytes();
                changed = true;
            }
        }
        changed
    }

    pub(crate) fn info_on_top_of(&self, parent: &ParentState) -> Result<CachedBlockInfo, CacheError> {
        let cumulative_difficulty = parent
            .cumulative_difficulty
            .checked_add(self.block_difficulty)
            .ok_or(CacheError::InvalidBlock("cumulative difficulty overflow"))?;
        let already_generated_coins = parent
            .generated_coins
            .checked_add_signed(self.generated_coins)
            .ok_or(CacheError::InvalidBlock("generated coins out of range"))?;
        Ok(CachedBlockInfo {
            hash: self.hash(),
            major_version: self.template.header.major_version,
            upgrade_vote: self.template.upgrade_vote,
            timestamp: self.template.header.timestamp,
            blob_size: self.blob_size,
            cumulative_difficulty,
            already_generated_coins,
            already_generated_transactions: parent.generated_transactions
                + self.transactions.len() as u64,
        })
    }

    /// Rebuilds the push record of a cached block from its summary and the
    /// summary of its parent.
    pub(crate) fn restore(
        info: &CachedBlockInfo,
        parent: &ParentState,
        raw_block: RawBlock,
        transactions: Vec<Transaction>,
        template: BlockTemplate,
    ) -> Self {
        Self {
            template,
            transactions,
            raw_block,
            block_difficulty: info.cumulative_difficulty - parent.cumulative_difficulty,
            blob_size: info.blob_size,
            generated_coins: info.already_generated_coins as i64 - parent.generated_coins as i64,
        }
    }
}

/// Running totals just below a cache's next block.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ParentState {
    pub hash: Hash256,
    pub cumulative_difficulty: u64,
    pub generated_coins: u64,
    pub generated_transactions: u64,
}

impl ParentState {
    pub fn of(info: &CachedBlockInfo) -> Self {
        Self {
            hash: info.hash,
            cumulative_difficulty: info.cumulative_difficulty,
            generated_coins: info.already_generated_coins,
            generated_transactions: info.already_generated_transactions,
        }
    }
}

/// Read access to a chain, used by validation.
pub trait ChainView {
    fn top_block_index(&self) -> Option<u32>;
    fn block_info(&self, index: u32) -> Result<Option<CachedBlockInfo>, CacheError>;
    /// Index of the block that spent `key_image`.
    fn key_image_spent_at(&self, key_image: &KeyImage) -> Result<Option<u32>, CacheError>;
    fn key_output(
        &self,
        amount: u64,
        global_index: u32,
    ) -> Result<Option<OutputReference>, CacheError>;
    fn transaction_location(
        &self,
        hash: &Hash256,
    ) -> Result<Option<TransactionLocation>, CacheError>;

    fn top_block_info(&self) -> Result<Option<CachedBlockInfo>, CacheError> {
        match self.top_block_index() {
            Some(index) => self.block_info(index),
            None => Ok(None),
        }
    }

    /// Up to `count` trailing block infos, oldest first.
    fn last_block_infos(&self, count: usize) -> Result<Vec<CachedBlockInfo>, CacheError> {
        let Some(top) = self.top_block_index() else {
            return Ok(Vec::new());
        };
        let available = top as usize + 1;
        let first = (available - count.min(available)) as u32;
        let mut infos = Vec::with_capacity(count.min(available));
        for index in first..=top {
            let info = self
                .block_info(index)?
                .ok_or(CacheError::Corrupt("gap below top block"))?;
            infos.push(info);
        }
        Ok(infos)
    }

    fn last_timestamps(&self, count: usize) -> Result<Vec<u64>, CacheError> {
        Ok(self
            .last_block_infos(count)?
            .iter()
            .map(|info| info.timestamp)
            .collect())
    }

    fn last_cumulative_difficulties(&self, count: usize) -> Result<Vec<u64>, CacheError> {
        Ok(self
            .last_block_infos(count)?
            .iter()
            .map(|info| info.cumulative_difficulty)
            .collect())
    }

    fn last_blob_sizes(&self, count: usize) -> Result<Vec<u64>, CacheError> {
        Ok(self
            .last_block_infos(count)?
            .iter()
            .map(|info| info.blob_size)
            .collect())
    }

    fn already_generated_coins(&self, index: u32) -> Result<u64, CacheError> {
        self.block_info(index)?
            .map(|info| info.already_generated_coins)
            .ok_or(CacheError::BlockOutOfRange { index })
    }
}

/// Contract shared by the in-memory and persistent caches.
pub trait BlockchainCache: ChainView + Send + Sync {
    fn start_block_index(&self) -> u32;

    /// Hash the first block of this cache must reference.
    fn parent_hash(&self) -> Hash256;

    fn block_index(&self, hash: &Hash256) -> Result<Option<u32>, CacheError>;
    fn raw_block(&self, index: u32) -> Result<Option<RawBlock>, CacheError>;
    fn raw_transaction(
        &self,
        block_index: u32,
        transaction_index: u32,
    ) -> Result<Transaction, CacheError>;
    /// Outputs with `amount` in this cache and everything below it.
    fn output_count(&self, amount: u64) -> Result<u32, CacheError>;
    /// Per-amount output counts over the blocks below `index`.
    fn output_counts_before(&self, index: u32) -> Result<BTreeMap<u64, u32>, CacheError>;

    fn push_block(&mut self, block: PushedBlock) -> Result<(), CacheError>;
    /// Removes every block at or above `index`, returning them oldest first.
    fn pop_to(&mut self, index: u32) -> Result<Vec<PushedBlock>, CacheError>;
    /// Swaps the signatures of block `index`'s listed transactions for their
    /// pruned form. Hashes and indexes are unaffected. Returns whether the
    /// block changed.
    fn prune_block(&mut self, index: u32) -> Result<bool, CacheError>;

    fn top_block_hash(&self) -> Result<Option<Hash256>, CacheError> {
        Ok(self.top_block_info()?.map(|info| info.hash))
    }

    fn block_count(&self) -> u32 {
        self.top_block_index()
            .map(|top| top + 1 - self.start_block_index())
            .unwrap_or(0)
    }

    fn has_block(&self, hash: &Hash256) -> Result<bool, CacheError> {
        Ok(self.block_index(hash)?.is_some())
    }

    fn block_hash(&self, index: u32) -> Result<Option<Hash256>, CacheError> {
        Ok(self.block_info(index)?.map(|info| info.hash))
    }

    fn block_hashes(&self, start: u32, count: u32) -> Result<Vec<Hash256>, CacheError> {
        let mut hashes = Vec::new();
        for index in start..start.saturating_add(count) {
            match self.block_hash(index)? {
                Some(hash) => hashes.push(hash),
                None => break,
            }
        }
        Ok(hashes)
    }

    /// Infos in request order; every index must be cached.
    fn block_infos(&self, indices: &[u32]) -> Result<Vec<CachedBlockInfo>, CacheError> {
        indices
            .iter()
            .map(|index| {
                self.block_info(*index)?
                    .ok_or(CacheError::BlockOutOfRange { index: *index })
            })
            .collect()
    }

    /// Forward scan that only comes up short at the top of the cache.
    fn blocks(&self, start: u32, count: u32) -> Result<Vec<RawBlock>, CacheError> {
        let mut blocks = Vec::new();
        for index in start..start.saturating_add(count) {
            match self.raw_block(index)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    fn is_spent(&self, key_image: &KeyImage) -> Result<bool, CacheError> {
        Ok(self.key_image_spent_at(key_image)?.is_some())
    }

    fn has_transaction(&self, hash: &Hash256) -> Result<bool, CacheError> {
        Ok(self.transaction_location(hash)?.is_some())
    }

    fn pop_blocks(&mut self, count: u32) -> Result<Vec<PushedBlock>, CacheError> {
        let next = self
            .top_block_index()
            .map(|top| top + 1)
            .unwrap_or_else(|| self.start_block_index());
        if count > next.saturating_sub(self.start_block_index()) {
            return Err(CacheError::PopPastStart {
                requested: next.saturating_sub(count),
                start: self.start_block_index(),
            });
        }
        self.pop_to(next - count)
    }

    /// Totals below the next block to be pushed.
    fn parent_state(&self) -> Result<ParentState, CacheError>;
}

/// Prunes every listed transaction blob of `raw` in place.
pub(crate) fn prune_listed(raw: &mut RawBlock) -> Result<bool, DecodeError> {
    let mut changed = false;
    for bytes in &mut raw.transactions {
        let mut transaction = Transaction::from_bytes(bytes)?;
        if transaction.signatures.is_pruned() {
            continue;
        }
        transaction.prune();
        *bytes = transaction.to_bytes();
        changed = true;
    }
    Ok(changed)
}

/// Checks that `block` extends a cache whose top totals are `parent`.
pub(crate) fn check_parent(block: &PushedBlock, parent: &ParentState) -> Result<(), CacheError> {
    let found = block.template.header.previous_block_hash;
    if found != parent.hash {
        return Err(CacheError::ParentMismatch {
            expected: parent.hash,
            found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_info_layout() {
        let info = CachedBlockInfo {
            hash: [7u8; 32],
            major_version: 2,
            upgrade_vote: Some(3),
            timestamp: 1,
            blob_size: 2,
            cumulative_difficulty: 3,
            already_generated_coins: 4,
            already_generated_transactions: 5,
        };
        let bytes = info.encode();
        assert_eq!(bytes.len(), BLOCK_INFO_LEN);
        assert_eq!(&bytes[32..35], &[2, 1, 3]);
        assert_eq!(CachedBlockInfo::decode(&bytes).expect("decode"), info);

        let mut bad = bytes.clone();
        bad[33] = 2;
        assert!(CachedBlockInfo::decode(&bad).is_err());
    }

    #[test]
    fn output_reference_layout() {
        let reference = OutputReference {
            block_index: 9,
            transaction_index: 1,
            output_index: 2,
            public_key: [4u8; 32],
            unlock: EligibleIndex::new(19, 0),
        };
        let bytes = reference.encode();
        assert_eq!(bytes.len(), OUTPUT_REFERENCE_LEN);
        assert_eq!(OutputReference::decode(&bytes).expect("decode"), reference);
        assert!(OutputReference::decode(&bytes[1..]).is_err());
    }
}
