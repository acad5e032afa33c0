mod common;

use std::sync::Arc;

use common::{extend, localnet, memory_chain, mine, spend, template, Tip, NOW};
use xid_chainstate::genesis::static_reward_transaction;
use xid_chainstate::{
    AddBlockOutcome, BlockValidator, BlockchainCache, CacheError, CachedBlockInfo, ChainError,
    ChainView, Checkpoints, OutputReference, TransactionError, TransactionLocation,
    TransactionRejection, TransactionValidator, ValidationError, ValidationStage,
};
use xid_consensus::money::{COIN, PREMINE};
use xid_consensus::{BlockValidationError, EligibleIndex, Hash256};
use xid_primitives::raw::RawBlock;
use xid_primitives::transaction::{
    KeyImage, KeyInput, Transaction, TransactionInput, TransactionOutput, TransactionPrefix,
    TransactionSignatures,
};

fn rejection(result: Result<AddBlockOutcome, ChainError>) -> (ValidationStage, BlockValidationError) {
    match result {
        Err(ChainError::Rejected(report)) => (report.stage, report.error),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn version_and_vote_checks() {
    let context = localnet();
    let chain = memory_chain(context.clone());
    let params = &context.params;
    let tip = extend(&chain, Tip::genesis(params), 19, 1).expect("v1 blocks");

    let mut wrong_version = template(params, &tip, 1, &[]);
    wrong_version.header.major_version = 1;
    assert_eq!(
        rejection(chain.add_block(&RawBlock::from_parts(&wrong_version, &[]), NOW)),
        (ValidationStage::StructurallyChecked, BlockValidationError::WrongVersion)
    );

    let mut bad_vote = template(params, &tip, 1, &[]);
    bad_vote.set_upgrade_vote(Some(3));
    assert_eq!(
        rejection(chain.add_block(&RawBlock::from_parts(&bad_vote, &[]), NOW)).1,
        BlockValidationError::WrongUpgradeVote
    );

    let mut vote = template(params, &tip, 1, &[]);
    vote.set_upgrade_vote(Some(2));
    assert_eq!(
        chain
            .add_block(&RawBlock::from_parts(&vote, &[]), NOW)
            .expect("vote for current version"),
        AddBlockOutcome::AddedToMain
    );
    assert_eq!(chain.upgrade_votes(2).expect("votes"), 1);
}

#[test]
fn voting_is_refused_before_the_fork() {
    let context = localnet();
    let chain = memory_chain(context.clone());
    let params = &context.params;

    let mut early = template(params, &Tip::genesis(params), 1, &[]);
    early.set_upgrade_vote(Some(2));
    assert_eq!(
        rejection(chain.add_block(&RawBlock::from_parts(&early, &[]), NOW)).1,
        BlockValidationError::WrongUpgradeVote
    );
}

#[test]
fn static_reward_is_committed_from_the_fork_on() {
    let context = localnet();
    let chain = memory_chain(context.clone());
    let params = &context.params;

    let genesis = Tip::genesis(params);
    let mut unexpected = template(params, &genesis, 1, &[]);
    unexpected.set_static_reward_hash(Some([9; 32]));
    assert_eq!(
        rejection(chain.add_block(&RawBlock::from_parts(&unexpected, &[]), NOW)),
        (
            ValidationStage::TransactionsResolved,
            BlockValidationError::UnexpectedStaticReward
        )
    );

    let tip = extend(&chain, genesis, 19, 1).expect("v1 blocks");
    let mut missing = template(params, &tip, 1, &[]);
    missing.set_static_reward_hash(None);
    assert_eq!(
        rejection(chain.add_block(&RawBlock::from_parts(&missing, &[]), NOW)).1,
        BlockValidationError::StaticRewardMismatch
    );

    let tip = extend(&chain, tip, 2, 1).expect("v2 blocks");
    assert_eq!(tip.index, 21);
    let expected = static_reward_transaction(params, 2, 20).expect("static reward");
    chain
        .with_main(|main| {
            let stored = main.raw_transaction(20, 1).expect("static reward stored");
            assert_eq!(stored, expected);
            assert_eq!(stored.output_amount(), Some(COIN));
            assert!(matches!(
                main.raw_transaction(20, 2),
                Err(CacheError::TransactionOutOfRange { .. })
            ));
        })
        .expect("read");
}

#[test]
fn reward_and_transaction_set_checks() {
    let context = localnet();
    let chain = memory_chain(context.clone());
    let params = &context.params;
    let tip = extend(&chain, Tip::genesis(params), 10, 1).expect("blocks");

    let mut greedy = template(params, &tip, 1, &[]);
    greedy.base_transaction.prefix.outputs[0].amount += 1;
    assert_eq!(
        rejection(chain.add_block(&RawBlock::from_parts(&greedy, &[]), NOW)),
        (ValidationStage::TransactionsResolved, BlockValidationError::BlockRewardMismatch)
    );

    let transaction = spend(xid_consensus::money::PREMINE, 0, 1, 100);
    let listed = template(params, &tip, 1, &[transaction.clone()]);
    assert_eq!(
        rejection(chain.add_block(&RawBlock::from_parts(&listed, &[]), NOW)).1,
        BlockValidationError::TransactionAbsent
    );

    let mut duplicated = listed.clone();
    duplicated.transaction_hashes.push(transaction.hash());
    assert_eq!(
        rejection(chain.add_block(
            &RawBlock::from_parts(&duplicated, &[transaction.clone(), transaction.clone()]),
            NOW
        ))
        .1,
        BlockValidationError::TransactionDuplicates
    );

    let unlisted = template(params, &tip, 1, &[]);
    assert_eq!(
        rejection(chain.add_block(&RawBlock::from_parts(&unlisted, &[transaction]), NOW)).1,
        BlockValidationError::TransactionInconsistency
    );

    let missing_output = spend(777, 0, 2, 7);
    let (block, _) = mine(params, &tip, 1, &[missing_output]);
    assert_eq!(
        rejection(chain.add_block(&block, NOW)).1,
        BlockValidationError::TransactionAbsent
    );
}

#[test]
fn premine_unlocks_at_its_unlock_height() {
    let context = localnet();
    let chain = memory_chain(context.clone());
    let params = &context.params;
    let tip8 = extend(&chain, Tip::genesis(params), 8, 1).expect("blocks");

    let premine = spend(xid_consensus::money::PREMINE, 0, 5, 100);
    let (early, _) = mine(params, &tip8, 1, &[premine.clone()]);
    assert_eq!(
        rejection(chain.add_block(&early, NOW)).1,
        BlockValidationError::TransactionInconsistency
    );

    let tip9 = extend(&chain, tip8, 1, 1).expect("block 9");
    let (on_time, _) = mine(params, &tip9, 1, &[premine]);
    assert_eq!(chain.add_block(&on_time, NOW).expect("block 10"), AddBlockOutcome::AddedToMain);
}

#[test]
fn timestamp_limits() {
    let context = localnet();
    let chain = memory_chain(context.clone());
    let params = &context.params;
    let tip = Tip::genesis(params);

    let (block, _) = mine(params, &tip, 1, &[]);
    let now = tip.timestamp;
    assert_eq!(
        rejection(chain.add_block(&block, now - 600)),
        (
            ValidationStage::VersionChecked,
            BlockValidationError::TimestampTooFarInFuture
        )
    );
    assert_eq!(chain.add_block(&block, now).expect("within limit"), AddBlockOutcome::AddedToMain);
}

#[test]
fn checkpoint_mismatch_rejects_before_proof_of_work() {
    let params = xid_consensus::consensus_params(xid_consensus::Network::Localnet);
    let mut checkpoints = Checkpoints::new();
    checkpoints.add_checkpoint(2, [0xee; 32]).expect("checkpoint");
    let context = Arc::new(
        xid_chainstate::ChainContext::new(params)
            .expect("context")
            .with_checkpoints(checkpoints),
    );
    let chain = memory_chain(context.clone());
    let params = &context.params;

    let tip1 = extend(&chain, Tip::genesis(params), 1, 1).expect("block 1");
    let (block2, _) = mine(params, &tip1, 1, &[]);
    assert_eq!(
        rejection(chain.add_block(&block2, NOW)),
        (
            ValidationStage::TimestampChecked,
            BlockValidationError::CheckpointBlockHashMismatch
        )
    );

    // Branches may not fork at or below a checkpoint the chain has passed.
    let mut checkpoints = Checkpoints::new();
    checkpoints.add_checkpoint(2, block2.template().expect("template").hash()).expect("checkpoint");
    let context = Arc::new(
        xid_chainstate::ChainContext::new(context.params.clone())
            .expect("context")
            .with_checkpoints(checkpoints),
    );
    let chain = memory_chain(context.clone());
    let tip3 = extend(&chain, Tip::genesis(params), 3, 1).expect("blocks");
    assert_eq!(tip3.index, 3);
    let (alt2, _) = mine(params, &tip1, 2, &[]);
    assert!(matches!(
        chain.add_block(&alt2, NOW),
        Err(ChainError::AlternativeNotAllowed { index: 2 })
    ));
}

/// Chain of synthetic summaries with one output per amount locked until
/// height 1000.
struct LockedOutputChain {
    top: u32,
}

impl LockedOutputChain {
    fn info(index: u32) -> CachedBlockInfo {
        let mut hash = [0u8; 32];
        hash[..4].copy_from_slice(&index.to_le_bytes());
        hash[31] = 0x5a;
        CachedBlockInfo {
            hash,
            major_version: if index >= 20 { 2 } else { 1 },
            upgrade_vote: None,
            timestamp: 1_600_000_000 + u64::from(index) * 60,
            blob_size: 200,
            cumulative_difficulty: u64::from(index) + 1,
            already_generated_coins: 10_000 * COIN,
            already_generated_transactions: u64::from(index) + 1,
        }
    }

    fn tip(&self) -> Tip {
        let info = Self::info(self.top);
        Tip {
            hash: info.hash,
            index: self.top,
            timestamp: info.timestamp,
            generated_coins: info.already_generated_coins,
        }
    }
}

impl ChainView for LockedOutputChain {
    fn top_block_index(&self) -> Option<u32> {
        Some(self.top)
    }

    fn block_info(&self, index: u32) -> Result<Option<CachedBlockInfo>, CacheError> {
        Ok((index <= self.top).then(|| Self::info(index)))
    }

    fn key_image_spent_at(&self, _key_image: &KeyImage) -> Result<Option<u32>, CacheError> {
        Ok(None)
    }

    fn key_output(
        &self,
        _amount: u64,
        global_index: u32,
    ) -> Result<Option<OutputReference>, CacheError> {
        Ok((global_index == 0).then_some(OutputReference {
            block_index: 3,
            transaction_index: 1,
            output_index: 0,
            public_key: [0x33; 32],
            unlock: EligibleIndex::new(1_000, 0),
        }))
    }

    fn transaction_location(
        &self,
        _hash: &Hash256,
    ) -> Result<Option<TransactionLocation>, CacheError> {
        Ok(None)
    }
}

fn validate_spend_at(index: u32) -> Result<Transaction, ValidationError> {
    let context = localnet();
    let validator = BlockValidator::new(context.clone());
    let view = LockedOutputChain { top: index - 1 };
    let transaction = spend(50 * COIN, 0, 9, COIN);
    let (block, _) = mine(&context.params, &view.tip(), 1, &[transaction.clone()]);
    validator
        .validate(&view, &block, NOW)
        .map(|pushed| pushed.transactions[2].clone())
}

#[test]
fn eligible_height_boundary() {
    let err = validate_spend_at(999).expect_err("locked at 999");
    assert_eq!(
        err.rejection(),
        Some(BlockValidationError::TransactionInconsistency)
    );
    let accepted = validate_spend_at(1_000).expect("unlocked at 1000");
    assert_eq!(accepted.fee(), Some(COIN));
}

#[test]
fn transactions_without_inputs_or_value_are_rejected() {
    let context = localnet();
    let chain = memory_chain(context.clone());
    let params = &context.params;
    let tip = extend(&chain, Tip::genesis(params), 2, 1).expect("blocks");

    let empty = Transaction {
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: Vec::new(),
            outputs: vec![TransactionOutput::to_key(0, [0xaa; 32])],
            extra: Vec::new(),
        },
        signatures: TransactionSignatures::Full(Vec::new()),
    };
    let (block, _) = mine(params, &tip, 1, &[empty]);
    assert_eq!(
        rejection(chain.add_block(&block, NOW)),
        (ValidationStage::Received, BlockValidationError::TransactionInconsistency)
    );

    let mut zero_output = spend(PREMINE, 0, 1, 100);
    zero_output.prefix.outputs.push(TransactionOutput::to_key(0, [0xab; 32]));
    let (block, _) = mine(params, &tip, 1, &[zero_output]);
    assert_eq!(
        rejection(chain.add_block(&block, NOW)).1,
        BlockValidationError::TransactionInconsistency
    );
    assert_eq!(chain.tip().expect("tip").index, 2);
}

#[test]
fn transaction_already_in_the_chain_is_not_included_again() {
    let context = localnet();
    let chain = memory_chain(context.clone());
    let params = &context.params;
    let tip9 = extend(&chain, Tip::genesis(params), 9, 1).expect("blocks");

    let premine = spend(PREMINE, 0, 5, 100);
    let (block10, tip10) = mine(params, &tip9, 1, &[premine.clone()]);
    assert_eq!(chain.add_block(&block10, NOW).expect("block 10"), AddBlockOutcome::AddedToMain);

    let (block11, _) = mine(params, &tip10, 1, &[premine.clone()]);
    assert_eq!(
        rejection(chain.add_block(&block11, NOW)).1,
        BlockValidationError::TransactionInconsistency
    );
    chain
        .with_main(|main| {
            assert_eq!(
                main.transaction_location(&premine.hash()).expect("location"),
                Some(TransactionLocation {
                    block_index: 10,
                    transaction_index: 1,
                })
            );
            let mut validator = TransactionValidator::new(&context, main);
            assert!(matches!(
                validator.check_inputs(&premine, &EligibleIndex::new(11, NOW)),
                Err(TransactionError::Rejected(TransactionRejection::AlreadyInChain))
            ));
        })
        .expect("read");
}

#[test]
fn oversized_transaction_is_rejected_structurally() {
    let context = localnet();
    let chain = memory_chain(context.clone());
    let params = &context.params;
    let tip9 = extend(&chain, Tip::genesis(params), 9, 1).expect("blocks");
    let limit = params.max_transaction_size_for(1);
    assert_eq!(limit, 99_400);

    let mut large = spend(PREMINE, 0, 5, 100);
    large.prefix.extra = vec![0x42; limit as usize];
    assert!(large.to_bytes().len() as u64 > limit);
    let (block, _) = mine(params, &tip9, 1, &[large]);
    assert!(block.blob_size() < params.max_block_blob_size);
    assert_eq!(
        rejection(chain.add_block(&block, NOW)),
        (ValidationStage::Received, BlockValidationError::TransactionInconsistency)
    );

    let mut fitting = spend(PREMINE, 0, 5, 100);
    fitting.prefix.extra = vec![0x42; 90_000];
    let (block, _) = mine(params, &tip9, 1, &[fitting]);
    assert_eq!(chain.add_block(&block, NOW).expect("block 10"), AddBlockOutcome::AddedToMain);
}

fn fusion_inputs(count: u8, amount: u64) -> Vec<TransactionInput> {
    (0..count)
        .map(|image| TransactionInput::Key(KeyInput::from_absolute(amount, &[0], [image; 32])))
        .collect()
}

fn unsigned(inputs: Vec<TransactionInput>, outputs: &[u64]) -> Transaction {
    let rings = inputs.iter().map(|input| vec![[0x11; 64]; input.signature_count()]).collect();
    Transaction {
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs,
            outputs: outputs
                .iter()
                .map(|amount| TransactionOutput::to_key(*amount, [0xaa; 32]))
                .collect(),
            extra: Vec::new(),
        },
        signatures: TransactionSignatures::Full(rings),
    }
}

#[test]
fn standalone_fee_and_fusion_exemption() {
    let context = localnet();
    let view = LockedOutputChain { top: 1_000 };
    let check = |transaction: &Transaction| {
        let size = transaction.to_bytes().len() as u64;
        TransactionValidator::new(&context, &view).check_standalone(transaction, size, NOW)
    };

    assert_eq!(check(&spend(50 * COIN, 0, 9, 100)).expect("minimum fee"), 100);
    assert!(matches!(
        check(&spend(50 * COIN, 0, 9, 99)),
        Err(TransactionError::Rejected(TransactionRejection::FeeTooLow {
            fee: 99,
            minimum: 100
        }))
    ));

    // Twelve inputs of 100 merge into the canonical outputs of 1200.
    let fusion = unsigned(fusion_inputs(12, 100), &[1_000, 200]);
    assert_eq!(check(&fusion).expect("fusion"), 0);

    let not_canonical = unsigned(fusion_inputs(12, 100), &[1_200]);
    assert!(matches!(
        check(&not_canonical),
        Err(TransactionError::Rejected(TransactionRejection::FeeTooLow { fee: 0, .. }))
    ));
    let too_few = unsigned(fusion_inputs(11, 100), &[1_000, 100]);
    assert!(matches!(
        check(&too_few),
        Err(TransactionError::Rejected(TransactionRejection::FeeTooLow { fee: 0, .. }))
    ));

    let locked = LockedOutputChain { top: 500 };
    let transaction = spend(50 * COIN, 0, 9, COIN);
    let size = transaction.to_bytes().len() as u64;
    assert!(matches!(
        TransactionValidator::new(&context, &locked).check_standalone(&transaction, size, NOW),
        Err(TransactionError::Rejected(TransactionRejection::OutputLocked))
    ));
}
