//! Block/transaction data model and its binary encoding.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod raw;
pub mod transaction;

pub use block::{BlockFeatures, BlockHeader, BlockTemplate};
pub use encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
pub use hash::{fast_hash, tree_hash, NULL_HASH};
pub use raw::RawBlock;
pub use transaction::{
    BaseInput, KeyImage, KeyInput, KeyOutput, OutputTarget, PrunedSignatures, PublicKey,
    Signature, Transaction, TransactionInput, TransactionOutput, TransactionPrefix,
    TransactionSignatures,
};
