//! Block header and block template types.

use xid_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{fast_hash, tree_hash};
use crate::transaction::Transaction;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct BlockFeatures(u8);

impl BlockFeatures {
    pub const NONE: BlockFeatures = BlockFeatures(0);
    pub const STATIC_REWARD: BlockFeatures = BlockFeatures(1 << 0);
    pub const UPGRADE_VOTING: BlockFeatures = BlockFeatures(1 << 1);
    pub const MERGE_MINING: BlockFeatures = BlockFeatures(1 << 2);

    const DEFINED: u8 = 0b0000_0111;

    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::DEFINED != 0 {
            None
        } else {
            Some(BlockFeatures(bits))
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: BlockFeatures) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Whether every set flag is also set in `mask`.
    pub fn is_subset_of(self, mask: u8) -> bool {
        self.0 & !mask == 0
    }

    pub fn insert(&mut self, other: BlockFeatures) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: BlockFeatures) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for BlockFeatures {
    type Output = BlockFeatures;

    fn bitor(self, rhs: BlockFeatures) -> BlockFeatures {
        BlockFeatures(self.0 | rhs.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub features: BlockFeatures,
    pub nonce: [u8; 4],
    pub timestamp: u64,
    pub previous_block_hash: Hash256,
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.major_version);
        encoder.write_u8(self.minor_version);
        encoder.write_u8(self.features.bits());
        encoder.write_bytes(&self.nonce);
        encoder.write_u64_le(self.timestamp);
        encoder.write_hash(&self.previous_block_hash);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let major_version = decoder.read_u8()?;
        let minor_version = decoder.read_u8()?;
        let features = BlockFeatures::from_bits(decoder.read_u8()?)
            .ok_or(DecodeError::InvalidData("undefined block feature bits"))?;
        let nonce = decoder.read_fixed::<4>()?;
        let timestamp = decoder.read_u64_le()?;
        let previous_block_hash = decoder.read_hash()?;
        Ok(Self {
            major_version,
            minor_version,
            features,
            nonce,
            timestamp,
            previous_block_hash,
        })
    }
}

impl BlockHeader {
    pub fn nonce_u32(&self) -> u32 {
        u32::from_le_bytes(self.nonce)
    }

    pub fn set_nonce(&mut self, nonce: u32) {
        self.nonce = nonce.to_le_bytes();
    }
}

/// A block as mined: header, base transaction and the hashes of the
/// transactions it includes.
///
/// `static_reward_hash` is present exactly when the header carries
/// `STATIC_REWARD`, and `upgrade_vote` exactly when it carries
/// `UPGRADE_VOTING`. Decoding always produces consistent templates; use the
/// setters when building one by hand.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockTemplate {
    pub header: BlockHeader,
    pub base_transaction: Transaction,
    pub static_reward_hash: Option<Hash256>,
    pub upgrade_vote: Option<u8>,
    pub transaction_hashes: Vec<Hash256>,
}

impl BlockTemplate {
    pub fn set_static_reward_hash(&mut self, hash: Option<Hash256>) {
        match hash {
            Some(_) => self.header.features.insert(BlockFeatures::STATIC_REWARD),
            None => self.header.features.remove(BlockFeatures::STATIC_REWARD),
        }
        self.static_reward_hash = hash;
    }

    pub fn set_upgrade_vote(&mut self, vote: Option<u8>) {
        match vote {
            Some(_) => self.header.features.insert(BlockFeatures::UPGRADE_VOTING),
            None => self.header.features.remove(BlockFeatures::UPGRADE_VOTING),
        }
        self.upgrade_vote = vote;
    }

    /// Optional fields agree with the header feature flags.
    pub fn is_consistent(&self) -> bool {
        self.header.features.contains(BlockFeatures::STATIC_REWARD)
            == self.static_reward_hash.is_some()
            && self.header.features.contains(BlockFeatures::UPGRADE_VOTING)
                == self.upgrade_vote.is_some()
    }

    /// Index encoded in the base transaction input.
    pub fn block_index(&self) -> Option<u32> {
        self.base_transaction.base_height()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        crate::encoding::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::encoding::decode(bytes)
    }

    /// Leaves of the transaction tree: base transaction, static reward
    /// (hashed again), then the listed transactions.
    pub fn tree_leaves(&self) -> Vec<Hash256> {
        let mut leaves = Vec::with_capacity(self.transaction_hashes.len() + 2);
        leaves.push(self.base_transaction.hash());
        if let Some(hash) = &self.static_reward_hash {
            leaves.push(fast_hash(hash));
        }
        leaves.extend_from_slice(&self.transaction_hashes);
        leaves
    }

    pub fn hashing_blob(&self) -> Vec<u8> {
        let leaves = self.tree_leaves();
        let mut encoder = Encoder::with_capacity(128);
        self.header.consensus_encode(&mut encoder);
        if let Some(vote) = self.upgrade_vote {
            encoder.write_u8(vote);
        }
        // the base transaction leaf is always present
        let root = tree_hash(&leaves).unwrap_or_default();
        encoder.write_hash(&root);
        encoder.write_varint(leaves.len() as u64);
        encoder.into_inner()
    }

    pub fn hash(&self) -> Hash256 {
        let blob = self.hashing_blob();
        let mut encoder = Encoder::with_capacity(blob.len() + 2);
        encoder.write_var_bytes(&blob);
        fast_hash(&encoder.into_inner())
    }
}

impl Encodable for BlockTemplate {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.header.consensus_encode(encoder);
        self.base_transaction.consensus_encode(encoder);
        if self.header.features.contains(BlockFeatures::STATIC_REWARD) {
            encoder.write_hash(&self.static_reward_hash.unwrap_or_default());
        }
        if self.header.features.contains(BlockFeatures::UPGRADE_VOTING) {
            encoder.write_u8(self.upgrade_vote.unwrap_or(self.header.major_version));
        }
        encoder.write_varint(self.transaction_hashes.len() as u64);
        for hash in &self.transaction_hashes {
            encoder.write_hash(hash);
        }
    }
}

impl Decodable for BlockTemplate {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = BlockHeader::consensus_decode(decoder)?;
        let base_transaction = Transaction::consensus_decode(decoder)?;
        let static_reward_hash = if header.features.contains(BlockFeatures::STATIC_REWARD) {
            Some(decoder.read_hash()?)
        } else {
            None
        };
        let upgrade_vote = if header.features.contains(BlockFeatures::UPGRADE_VOTING) {
            Some(decoder.read_u8()?)
        } else {
            None
        };
        let count = decoder.read_count()?;
        if count.saturating_mul(32) > decoder.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut transaction_hashes = Vec::with_capacity(count);
        for _ in 0..count {
            transaction_hashes.push(decoder.read_hash()?);
        }
        Ok(Self {
            header,
            base_transaction,
            static_reward_hash,
            upgrade_vote,
            transaction_hashes,
        })
    }
}
