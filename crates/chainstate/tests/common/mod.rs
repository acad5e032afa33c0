#![allow(dead_code)]

use std::sync::Arc;

use xid_chainstate::genesis::{base_transaction, genesis_block, static_reward_transaction};
use xid_chainstate::{Blockchain, BlockchainCache, ChainContext, ChainError, MemoryBlockchainCache};
use xid_consensus::{block_reward, consensus_params, ConsensusParams, Hash256, Network};
use xid_primitives::block::{BlockFeatures, BlockHeader, BlockTemplate};
use xid_primitives::raw::RawBlock;
use xid_primitives::transaction::{
    KeyInput, Transaction, TransactionInput, TransactionOutput, TransactionPrefix,
    TransactionSignatures,
};

/// Local clock far ahead of every test block.
pub const NOW: u64 = 4_000_000_000;

pub fn localnet() -> Arc<ChainContext> {
    Arc::new(ChainContext::new(consensus_params(Network::Localnet)).expect("localnet context"))
}

pub fn memory_chain(context: Arc<ChainContext>) -> Blockchain<MemoryBlockchainCache> {
    Blockchain::new(context, MemoryBlockchainCache::new()).expect("chain")
}

/// What a miner needs to know about the block it builds on.
#[derive(Clone, Copy, Debug)]
pub struct Tip {
    pub hash: Hash256,
    pub index: u32,
    pub timestamp: u64,
    pub generated_coins: u64,
}

impl Tip {
    pub fn genesis(params: &ConsensusParams) -> Self {
        let genesis = genesis_block(params);
        Self {
            hash: genesis.hash(),
            index: 0,
            timestamp: genesis.template.header.timestamp,
            generated_coins: params.genesis.reward,
        }
    }
}

/// Template for the block after `tip` paying the exact reward to `[tag; 32]`.
pub fn template(
    params: &ConsensusParams,
    tip: &Tip,
    tag: u8,
    transactions: &[Transaction],
) -> BlockTemplate {
    let index = tip.index + 1;
    let version = params.upgrade_manager().block_version(index);
    let fees: u64 = transactions.iter().filter_map(Transaction::fee).sum();
    let reward = block_reward(params, version, 0, 0, tip.generated_coins, fees).expect("reward");
    let base = base_transaction(
        params,
        index,
        vec![TransactionOutput::to_key(reward.reward, [tag; 32])],
        vec![tag],
    );
    let mut template = BlockTemplate {
        header: BlockHeader {
            major_version: version,
            minor_version: 0,
            features: BlockFeatures::NONE,
            nonce: [tag, 0, 0, 0],
            timestamp: tip.timestamp + u64::from(params.block_time),
            previous_block_hash: tip.hash,
        },
        base_transaction: base,
        static_reward_hash: None,
        upgrade_vote: None,
        transaction_hashes: transactions.iter().map(Transaction::hash).collect(),
    };
    template.set_static_reward_hash(
        static_reward_transaction(params, version, index).map(|tx| tx.hash()),
    );
    template
}

pub fn next_tip(params: &ConsensusParams, tip: &Tip, template: &BlockTemplate) -> Tip {
    let version = template.header.major_version;
    let reward = block_reward(params, version, 0, 0, tip.generated_coins, 0).expect("reward");
    Tip {
        hash: template.hash(),
        index: tip.index + 1,
        timestamp: template.header.timestamp,
        generated_coins: tip
            .generated_coins
            .checked_add_signed(reward.emission_change)
            .expect("generated coins"),
    }
}

/// Block after `tip` and the tip it produces.
pub fn mine(
    params: &ConsensusParams,
    tip: &Tip,
    tag: u8,
    transactions: &[Transaction],
) -> (RawBlock, Tip) {
    let template = template(params, tip, tag, transactions);
    let next = next_tip(params, tip, &template);
    (RawBlock::from_parts(&template, transactions), next)
}

/// Mines `count` empty blocks onto the main chain.
pub fn extend<C: BlockchainCache>(
    chain: &Blockchain<C>,
    tip: Tip,
    count: u32,
    tag: u8,
) -> Result<Tip, ChainError> {
    let params = &chain.context().params;
    let mut tip = tip;
    for _ in 0..count {
        let (raw, next) = mine(params, &tip, tag, &[]);
        chain.add_block(&raw, NOW)?;
        tip = next;
    }
    Ok(tip)
}

/// One-input spend of output `global_index` with `amount`, paying `fee`.
pub fn spend(amount: u64, global_index: u32, key_image: u8, fee: u64) -> Transaction {
    Transaction {
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Key(KeyInput::from_absolute(
                amount,
                &[global_index],
                [key_image; 32],
            ))],
            outputs: vec![TransactionOutput::to_key(amount - fee, [0xaa; 32])],
            extra: Vec::new(),
        },
        signatures: TransactionSignatures::Full(vec![vec![[0x11; 64]]]),
    }
}
