//! Deterministic genesis block and the protocol-built static reward
//! transaction.

use xid_consensus::constants::CURRENT_TRANSACTION_VERSION;
use xid_consensus::money::decompose_amount;
use xid_consensus::params::ConsensusParams;
use xid_primitives::block::{BlockFeatures, BlockHeader, BlockTemplate};
use xid_primitives::hash::{fast_hash, NULL_HASH};
use xid_primitives::raw::RawBlock;
use xid_primitives::transaction::{
    BaseInput, PublicKey, Transaction, TransactionInput, TransactionOutput, TransactionPrefix,
    TransactionSignatures,
};

use crate::cache::PushedBlock;

/// Base transaction paying `outputs` at block `index`.
pub fn base_transaction(
    params: &ConsensusParams,
    index: u32,
    outputs: Vec<TransactionOutput>,
    extra: Vec<u8>,
) -> Transaction {
    Transaction {
        prefix: TransactionPrefix {
            version: CURRENT_TRANSACTION_VERSION,
            unlock_time: u64::from(index) + u64::from(params.mined_money_unlock_window),
            inputs: vec![TransactionInput::Base(BaseInput { height: index })],
            outputs,
            extra,
        },
        signatures: TransactionSignatures::Full(vec![Vec::new()]),
    }
}

pub fn genesis_template(params: &ConsensusParams) -> BlockTemplate {
    let output = TransactionOutput::to_key(params.genesis.reward, params.genesis.reward_public_key);
    BlockTemplate {
        header: BlockHeader {
            major_version: params.genesis_version(),
            minor_version: 0,
            features: BlockFeatures::NONE,
            nonce: params.genesis.nonce.to_le_bytes(),
            timestamp: params.genesis.timestamp,
            previous_block_hash: NULL_HASH,
        },
        base_transaction: base_transaction(params, 0, vec![output], Vec::new()),
        static_reward_hash: None,
        upgrade_vote: None,
        transaction_hashes: Vec::new(),
    }
}

/// Genesis as a push record. It is trusted, so no validation runs on it.
pub fn genesis_block(params: &ConsensusParams) -> PushedBlock {
    let template = genesis_template(params);
    let raw_block = RawBlock::from_parts(&template, &[]);
    PushedBlock {
        transactions: vec![template.base_transaction.clone()],
        blob_size: raw_block.blob_size(),
        raw_block,
        template,
        block_difficulty: 1,
        generated_coins: params.genesis.reward as i64,
    }
}

/// Most outputs a static reward transaction is split into.
pub const STATIC_REWARD_MAX_OUTPUTS: usize = 10;

/// Splits `amount` into digit outputs above the dust threshold of
/// `version`, folding the highest chunks together until at most
/// `max_outputs` remain. `key` derives the key of each output by position.
pub fn reward_outputs(
    params: &ConsensusParams,
    version: u8,
    amount: u64,
    max_outputs: usize,
    key: impl Fn(u32) -> PublicKey,
) -> Vec<TransactionOutput> {
    let mut amounts = decompose_amount(amount, params.rules.dust.dust(version));
    while amounts.len() > max_outputs.max(1) {
        if let Some(last) = amounts.pop() {
            if let Some(previous) = amounts.last_mut() {
                *previous += last;
            }
        }
    }
    amounts
        .into_iter()
        .enumerate()
        .map(|(position, amount)| TransactionOutput::to_key(amount, key(position as u32)))
        .collect()
}

/// Key of output `position` of the static reward paid at block `index`.
pub fn static_reward_key(address: &str, index: u32, position: u32) -> PublicKey {
    let mut data = Vec::with_capacity(address.len() + 8);
    data.extend_from_slice(address.as_bytes());
    data.extend_from_slice(&index.to_le_bytes());
    data.extend_from_slice(&position.to_le_bytes());
    fast_hash(&data)
}

/// Static reward transaction every block of `version` at `index` must
/// commit to, or `None` when the version pays no static reward.
pub fn static_reward_transaction(
    params: &ConsensusParams,
    version: u8,
    index: u32,
) -> Option<Transaction> {
    let table = &params.rules.static_reward;
    if !table.is_enabled(version) {
        return None;
    }
    let address = table.address(version);
    let outputs = reward_outputs(
        params,
        version,
        table.amount(version),
        STATIC_REWARD_MAX_OUTPUTS,
        |position| static_reward_key(address, index, position),
    );
    Some(base_transaction(params, index, outputs, b"static".to_vec()))
}
