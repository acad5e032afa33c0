//! Raw block container: the serialized template followed by the serialized
//! transactions it lists.

use crate::block::BlockTemplate;
use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::transaction::Transaction;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawBlock {
    pub block: Vec<u8>,
    pub transactions: Vec<Vec<u8>>,
}

impl RawBlock {
    pub fn from_parts(template: &BlockTemplate, transactions: &[Transaction]) -> Self {
        Self {
            block: template.to_bytes(),
            transactions: transactions.iter().map(Transaction::to_bytes).collect(),
        }
    }

    pub fn template(&self) -> Result<BlockTemplate, DecodeError> {
        BlockTemplate::from_bytes(&self.block)
    }

    pub fn decode_transactions(&self) -> Result<Vec<Transaction>, DecodeError> {
        self.transactions
            .iter()
            .map(|bytes| Transaction::from_bytes(bytes))
            .collect()
    }

    /// Template blob plus every transaction blob.
    pub fn blob_size(&self) -> u64 {
        self.block.len() as u64 + self.transactions.iter().map(|tx| tx.len() as u64).sum::<u64>()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        crate::encoding::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::encoding::decode(bytes)
    }
}

impl Encodable for RawBlock {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_bytes(&self.block);
        encoder.write_varint(self.transactions.len() as u64);
        for transaction in &self.transactions {
            encoder.write_var_bytes(transaction);
        }
    }
}

impl Decodable for RawBlock {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let block = decoder.read_var_bytes()?;
        let count = decoder.read_count()?;
        let mut transactions = Vec::with_capacity(count.min(decoder.remaining()));
        for _ in 0..count {
            transactions.push(decoder.read_var_bytes()?);
        }
        Ok(Self {
            block,
            transactions,
        })
    }
}
