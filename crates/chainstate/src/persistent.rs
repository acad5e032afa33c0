//! Main-chain cache persisted in a [`KeyValueStore`].
//!
//! Every push and every pop is a single `WriteBatch`, so a crash leaves the
//! store at a block boundary.

use std::collections::{BTreeMap, HashSet};

use xid_consensus::Hash256;
use xid_primitives::block::BlockTemplate;
use xid_primitives::encoding::{DecodeError, Decoder, Encoder};
use xid_primitives::hash::NULL_HASH;
use xid_primitives::raw::RawBlock;
use xid_primitives::transaction::{KeyImage, Transaction};
use xid_storage::{Column, KeyValueStore, WriteBatch};

use crate::cache::{
    check_parent, prune_listed, BlockchainCache, CacheError, CachedBlockInfo, ChainView, OutputReference,
    ParentState, PushedBlock, TransactionLocation,
};

pub const DB_SCHEME_VERSION_KEY: &[u8] = b"db_scheme_version";
pub const CURRENT_DB_SCHEME_VERSION: u32 = 2;
const TOP_BLOCK_INDEX_KEY: &[u8] = b"top_block_index";

/// Compares the stored schema with [`CURRENT_DB_SCHEME_VERSION`].
///
/// A fresh store is stamped with the current version. `Ok(false)` means the
/// store was written by an older release and must be rebuilt.
pub fn check_schema_version<S: KeyValueStore + ?Sized>(store: &S) -> Result<bool, CacheError> {
    match store.get(Column::Meta, DB_SCHEME_VERSION_KEY)? {
        None => {
            store.put(
                Column::Meta,
                DB_SCHEME_VERSION_KEY,
                &CURRENT_DB_SCHEME_VERSION.to_le_bytes(),
            )?;
            Ok(true)
        }
        Some(bytes) => {
            let found = decode_u32(&bytes, "invalid schema version record")?;
            if found > CURRENT_DB_SCHEME_VERSION {
                return Err(CacheError::SchemaTooNew {
                    found,
                    supported: CURRENT_DB_SCHEME_VERSION,
                });
            }
            Ok(found == CURRENT_DB_SCHEME_VERSION)
        }
    }
}

pub fn schema_version<S: KeyValueStore + ?Sized>(store: &S) -> Result<Option<u32>, CacheError> {
    store
        .get(Column::Meta, DB_SCHEME_VERSION_KEY)?
        .map(|bytes| decode_u32(&bytes, "invalid schema version record"))
        .transpose()
}

pub struct PersistentBlockchainCache<S> {
    store: S,
    top: Option<u32>,
}

impl<S: KeyValueStore> PersistentBlockchainCache<S> {
    pub fn open(store: S) -> Result<Self, CacheError> {
        let top = store
            .get(Column::Meta, TOP_BLOCK_INDEX_KEY)?
            .map(|bytes| decode_u32(&bytes, "invalid top block record"))
            .transpose()?;
        Ok(Self { store, top })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn stored_block(&self, index: u32) -> Result<Option<StoredBlock>, CacheError> {
        match self.store.get(Column::RawBlock, &height_key(index))? {
            Some(bytes) => Ok(Some(StoredBlock::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn stored_output_count(&self, amount: u64) -> Result<u32, CacheError> {
        self.store
            .get(Column::OutputCount, &amount.to_be_bytes())?
            .map(|bytes| decode_u32(&bytes, "invalid output count"))
            .transpose()
            .map(|count| count.unwrap_or(0))
    }

    fn require_info(&self, index: u32) -> Result<CachedBlockInfo, CacheError> {
        self.block_info(index)?
            .ok_or(CacheError::Corrupt("missing block info below top"))
    }
}

impl<S: KeyValueStore> ChainView for PersistentBlockchainCache<S> {
    fn top_block_index(&self) -> Option<u32> {
        self.top
    }

    fn block_info(&self, index: u32) -> Result<Option<CachedBlockInfo>, CacheError> {
        if self.top.map_or(true, |top| index > top) {
            return Ok(None);
        }
        match self.store.get(Column::BlockInfo, &height_key(index))? {
            Some(bytes) => Ok(Some(CachedBlockInfo::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn key_image_spent_at(&self, key_image: &KeyImage) -> Result<Option<u32>, CacheError> {
        self.store
            .get(Column::KeyImage, key_image)?
            .map(|bytes| decode_u32(&bytes, "invalid key image record"))
            .transpose()
    }

    fn key_output(
        &self,
        amount: u64,
        global_index: u32,
    ) -> Result<Option<OutputReference>, CacheError> {
        match self
            .store
            .get(Column::KeyOutput, &key_output_key(amount, global_index))?
        {
            Some(bytes) => Ok(Some(OutputReference::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn transaction_location(
        &self,
        hash: &Hash256,
    ) -> Result<Option<TransactionLocation>, CacheError> {
        match self.store.get(Column::TxLocation, hash)? {
            Some(bytes) => TransactionLocation::decode(&bytes)
                .map(Some)
                .ok_or(CacheError::Corrupt("invalid transaction location")),
            None => Ok(None),
        }
    }
}

impl<S: KeyValueStore> BlockchainCache for PersistentBlockchainCache<S> {
    fn start_block_index(&self) -> u32 {
        0
    }

    fn parent_hash(&self) -> Hash256 {
        NULL_HASH
    }

    fn parent_state(&self) -> Result<ParentState, CacheError> {
        match self.top {
            Some(top) => Ok(ParentState::of(&self.require_info(top)?)),
            None => Ok(ParentState {
                hash: NULL_HASH,
                ..ParentState::default()
            }),
        }
    }

    fn block_index(&self, hash: &Hash256) -> Result<Option<u32>, CacheError> {
        self.store
            .get(Column::BlockHash, hash)?
            .map(|bytes| decode_u32(&bytes, "invalid block hash record"))
            .transpose()
    }

    fn raw_block(&self, index: u32) -> Result<Option<RawBlock>, CacheError> {
        if self.top.map_or(true, |top| index > top) {
            return Ok(None);
        }
        Ok(self.stored_block(index)?.map(|stored| stored.raw))
    }

    fn raw_transaction(
        &self,
        block_index: u32,
        transaction_index: u32,
    ) -> Result<Transaction, CacheError> {
        if self.top.map_or(true, |top| block_index > top) {
            return Err(CacheError::BlockOutOfRange { index: block_index });
        }
        let stored = self
            .stored_block(block_index)?
            .ok_or(CacheError::Corrupt("missing raw block below top"))?;
        stored
            .transactions()?
            .into_iter()
            .nth(transaction_index as usize)
            .ok_or(CacheError::TransactionOutOfRange {
                block_index,
                transaction_index,
            })
    }

    fn output_count(&self, amount: u64) -> Result<u32, CacheError> {
        self.stored_output_count(amount)
    }

    fn output_counts_before(&self, index: u32) -> Result<BTreeMap<u64, u32>, CacheError> {
        let mut totals = Vec::new();
        self.store
            .for_each_prefix(Column::OutputCount, &[], &mut |key: &[u8], value: &[u8]| {
                let amount = u64::from_be_bytes(
                    key.try_into()
                        .map_err(|_| xid_storage::StoreError::Corrupt("invalid output count key"))?,
                );
                let count = u32::from_le_bytes(
                    value
                        .try_into()
                        .map_err(|_| xid_storage::StoreError::Corrupt("invalid output count"))?,
                );
                totals.push((amount, count));
                Ok(())
            })?;

        let mut counts = BTreeMap::new();
        for (amount, total) in totals {
            // Global indices grow with block index, so the boundary can be
            // found by bisection.
            let (mut low, mut high) = (0u32, total);
            while low < high {
                let middle = low + (high - low) / 2;
                let reference = self
                    .key_output(amount, middle)?
                    .ok_or(CacheError::Corrupt("missing key output below count"))?;
                if reference.block_index < index {
                    low = middle + 1;
                } else {
                    high = middle;
                }
            }
            if low > 0 {
                counts.insert(amount, low);
            }
        }
        Ok(counts)
    }

    fn push_block(&mut self, block: PushedBlock) -> Result<(), CacheError> {
        let parent = self.parent_state()?;
        check_parent(&block, &parent)?;
        let index = self.top.map_or(0, |top| top + 1);
        if block.template.block_index() != Some(index) {
            return Err(CacheError::InvalidBlock(
                "base transaction height does not match block index",
            ));
        }
        let info = block.info_on_top_of(&parent)?;

        let mut seen = HashSet::new();
        for key_image in block.transactions.iter().flat_map(|tx| tx.key_images()) {
            if !seen.insert(*key_image) || self.key_image_spent_at(key_image)?.is_some() {
                return Err(CacheError::InvalidBlock("key image already spent"));
            }
        }

        let mut batch = WriteBatch::new();
        let mut counts: BTreeMap<u64, u32> = BTreeMap::new();
        for (position, transaction) in block.transactions.iter().enumerate() {
            let location = TransactionLocation {
                block_index: index,
                transaction_index: position as u32,
            };
            batch.put(Column::TxLocation, transaction.hash(), location.encode());
            for key_image in transaction.key_images() {
                batch.put(Column::KeyImage, *key_image, index.to_le_bytes());
            }
            let unlock = transaction.unlock_index();
            for (output_index, output) in transaction.prefix.outputs.iter().enumerate() {
                let count = match counts.get(&output.amount) {
                    Some(count) => *count,
                    None => self.stored_output_count(output.amount)?,
                };
                let reference = OutputReference {
                    block_index: index,
                    transaction_index: position as u32,
                    output_index: output_index as u32,
                    public_key: *output.public_key(),
                    unlock,
                };
                batch.put(
                    Column::KeyOutput,
                    key_output_key(output.amount, count),
                    reference.encode(),
                );
                counts.insert(output.amount, count + 1);
            }
        }
        for (amount, count) in &counts {
            batch.put(Column::OutputCount, amount.to_be_bytes(), count.to_le_bytes());
        }

        let stored = StoredBlock {
            raw: block.raw_block.clone(),
            static_reward: block.static_reward_transaction().map(Transaction::to_bytes),
        };
        batch.put(Column::BlockInfo, height_key(index), info.encode());
        batch.put(Column::BlockHash, info.hash, index.to_le_bytes());
        batch.put(Column::RawBlock, height_key(index), stored.encode());
        batch.put(Column::Meta, TOP_BLOCK_INDEX_KEY, index.to_le_bytes());
        self.store.write_batch(&batch)?;
        self.top = Some(index);
        xid_log::log_trace!("cached block {index} ({} ops)", batch.len());
        Ok(())
    }

    fn prune_block(&mut self, index: u32) -> Result<bool, CacheError> {
        if self.top.map_or(true, |top| index > top) {
            return Err(CacheError::BlockOutOfRange { index });
        }
        let mut stored = self
            .stored_block(index)?
            .ok_or(CacheError::Corrupt("missing raw block below top"))?;
        if !prune_listed(&mut stored.raw)? {
            return Ok(false);
        }
        self.store
            .put(Column::RawBlock, &height_key(index), &stored.encode())?;
        Ok(true)
    }

    fn pop_to(&mut self, index: u32) -> Result<Vec<PushedBlock>, CacheError> {
        let Some(top) = self.top else {
            return Ok(Vec::new());
        };
        if index > top {
            return Ok(Vec::new());
        }

        let mut batch = WriteBatch::new();
        let mut counts: BTreeMap<u64, u32> = BTreeMap::new();
        let mut popped = Vec::with_capacity((top - index + 1) as usize);
        for height in (index..=top).rev() {
            let info = self.require_info(height)?;
            let parent = match height.checked_sub(1) {
                Some(below) => ParentState::of(&self.require_info(below)?),
                None => ParentState {
                    hash: NULL_HASH,
                    ..ParentState::default()
                },
            };
            let stored = self
                .stored_block(height)?
                .ok_or(CacheError::Corrupt("missing raw block below top"))?;
            let template = stored.raw.template()?;
            let transactions = stored.transactions_with(&template)?;

            for transaction in transactions.iter().rev() {
                batch.delete(Column::TxLocation, transaction.hash());
                for key_image in transaction.key_images() {
                    batch.delete(Column::KeyImage, *key_image);
                }
                for output in transaction.prefix.outputs.iter().rev() {
                    let count = match counts.get(&output.amount) {
                        Some(count) => *count,
                        None => self.stored_output_count(output.amount)?,
                    };
                    let last = count
                        .checked_sub(1)
                        .ok_or(CacheError::Corrupt("output count underflow"))?;
                    batch.delete(Column::KeyOutput, key_output_key(output.amount, last));
                    counts.insert(output.amount, last);
                }
            }
            batch.delete(Column::BlockInfo, height_key(height));
            batch.delete(Column::BlockHash, info.hash);
            batch.delete(Column::RawBlock, height_key(height));
            popped.push(PushedBlock::restore(
                &info,
                &parent,
                stored.raw,
                transactions,
                template,
            ));
        }
        for (amount, count) in &counts {
            if *count == 0 {
                batch.delete(Column::OutputCount, amount.to_be_bytes());
            } else {
                batch.put(Column::OutputCount, amount.to_be_bytes(), count.to_le_bytes());
            }
        }
        match index.checked_sub(1) {
            Some(new_top) => batch.put(Column::Meta, TOP_BLOCK_INDEX_KEY, new_top.to_le_bytes()),
            None => batch.delete(Column::Meta, TOP_BLOCK_INDEX_KEY),
        }
        self.store.write_batch(&batch)?;
        self.top = index.checked_sub(1);
        popped.reverse();
        Ok(popped)
    }
}

/// Raw block plus the static reward transaction, which the raw block does
/// not carry.
struct StoredBlock {
    raw: RawBlock,
    static_reward: Option<Vec<u8>>,
}

impl StoredBlock {
    fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_var_bytes(&self.raw.to_bytes());
        match &self.static_reward {
            Some(bytes) => {
                encoder.write_u8(1);
                encoder.write_var_bytes(bytes);
            }
            None => encoder.write_u8(0),
        }
        encoder.into_inner()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let raw = RawBlock::from_bytes(&decoder.read_var_bytes()?)?;
        let static_reward = match decoder.read_u8()? {
            0 => None,
            1 => Some(decoder.read_var_bytes()?),
            _ => return Err(DecodeError::InvalidData("invalid static reward flag")),
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { raw, static_reward })
    }

    fn transactions(&self) -> Result<Vec<Transaction>, CacheError> {
        let template = self.raw.template()?;
        self.transactions_with(&template)
    }

    fn transactions_with(&self, template: &BlockTemplate) -> Result<Vec<Transaction>, CacheError> {
        let listed = self.raw.decode_transactions()?;
        let mut transactions = Vec::with_capacity(listed.len() + 2);
        transactions.push(template.base_transaction.clone());
        if let Some(bytes) = &self.static_reward {
            transactions.push(Transaction::from_bytes(bytes)?);
        }
        transactions.extend(listed);
        Ok(transactions)
    }
}

fn height_key(index: u32) -> [u8; 4] {
    index.to_be_bytes()
}

fn key_output_key(amount: u64, global_index: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&amount.to_be_bytes());
    key[8..].copy_from_slice(&global_index.to_be_bytes());
    key
}

fn decode_u32(bytes: &[u8], message: &'static str) -> Result<u32, CacheError> {
    let array: [u8; 4] = bytes.try_into().map_err(|_| CacheError::Corrupt(message))?;
    Ok(u32::from_le_bytes(array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xid_storage::memory::MemoryStore;

    #[test]
    fn fresh_store_is_stamped_with_current_schema() {
        let store = MemoryStore::new();
        assert!(check_schema_version(&store).expect("check"));
        assert_eq!(schema_version(&store).expect("read"), Some(CURRENT_DB_SCHEME_VERSION));
        assert!(check_schema_version(&store).expect("check again"));
    }

    #[test]
    fn older_schema_requests_rebuild_and_newer_is_refused() {
        let store = MemoryStore::new();
        store
            .put(Column::Meta, DB_SCHEME_VERSION_KEY, &1u32.to_le_bytes())
            .expect("put");
        assert!(!check_schema_version(&store).expect("check"));

        store
            .put(Column::Meta, DB_SCHEME_VERSION_KEY, &3u32.to_le_bytes())
            .expect("put");
        assert!(matches!(
            check_schema_version(&store),
            Err(CacheError::SchemaTooNew {
                found: 3,
                supported: CURRENT_DB_SCHEME_VERSION
            })
        ));

        store
            .put(Column::Meta, DB_SCHEME_VERSION_KEY, &[1, 2])
            .expect("put");
        assert!(matches!(
            check_schema_version(&store),
            Err(CacheError::Corrupt(_))
        ));
    }

    #[test]
    fn output_keys_sort_by_amount_then_index() {
        assert!(key_output_key(1, 300) < key_output_key(2, 0));
        assert!(key_output_key(1, 255) < key_output_key(1, 256));
    }
}
