mod common;

use std::sync::Arc;

use common::{extend, localnet, mine, spend, Tip, NOW};
use xid_chainstate::genesis::static_reward_transaction;
use xid_chainstate::{
    check_schema_version, AddBlockOutcome, Blockchain, BlockchainCache, CacheError, ChainView,
    MemoryBlockchainCache, PersistentBlockchainCache,
};
use xid_consensus::money::PREMINE;
use xid_storage::fjall::FjallStore;
use xid_storage::memory::MemoryStore;

type StoreChain = Blockchain<PersistentBlockchainCache<Arc<MemoryStore>>>;

fn store_chain(store: &Arc<MemoryStore>) -> StoreChain {
    let cache = PersistentBlockchainCache::open(Arc::clone(store)).expect("open cache");
    Blockchain::new(localnet(), cache).expect("chain")
}

#[test]
fn reopened_store_keeps_tip_and_indexes() {
    let store = Arc::new(MemoryStore::new());
    assert!(check_schema_version(store.as_ref()).expect("schema"));

    let tip11 = {
        let chain = store_chain(&store);
        let params = chain.context().params.clone();
        let tip10 = extend(&chain, Tip::genesis(&params), 10, 1).expect("blocks");
        let (block, tip11) = mine(&params, &tip10, 1, &[spend(PREMINE, 0, 0x42, 500)]);
        assert_eq!(chain.add_block(&block, NOW).expect("spend"), AddBlockOutcome::AddedToMain);
        tip11
    };

    let chain = store_chain(&store);
    let tip = chain.tip().expect("tip");
    assert_eq!(tip.index, 11);
    assert_eq!(tip.info.hash, tip11.hash);
    assert_eq!(tip.info.already_generated_coins, tip11.generated_coins);
    chain
        .with_main(|main| {
            assert_eq!(main.key_image_spent_at(&[0x42; 32]).expect("lookup"), Some(11));
            assert_eq!(main.block_index(&tip11.hash).expect("lookup"), Some(11));
            assert_eq!(main.output_count(PREMINE).expect("count"), 1);
            let spent = main.raw_transaction(11, 1).expect("stored spend");
            assert_eq!(spent.fee(), Some(500));
        })
        .expect("read");
}

#[test]
fn pops_match_the_memory_cache() {
    let store = Arc::new(MemoryStore::new());
    let stored = store_chain(&store);
    let memory = Blockchain::new(localnet(), MemoryBlockchainCache::new()).expect("chain");
    let params = stored.context().params.clone();

    let mut tip = Tip::genesis(&params);
    for _ in 0..22 {
        let (block, next) = mine(&params, &tip, 3, &[]);
        stored.add_block(&block, NOW).expect("stored push");
        memory.add_block(&block, NOW).expect("memory push");
        tip = next;
    }
    let expected = static_reward_transaction(&params, 2, 21).expect("static reward");
    stored
        .with_main(|main| assert_eq!(main.raw_transaction(21, 1).expect("static"), expected))
        .expect("read");

    let mut stored_cache = PersistentBlockchainCache::open(Arc::clone(&store)).expect("open");
    let mut memory_cache = MemoryBlockchainCache::new();
    memory
        .with_main(|main| {
            for index in 0..=tip.index {
                let raw = main.raw_block(index).expect("raw").expect("present");
                assert_eq!(
                    stored_cache.raw_block(index).expect("raw").expect("present"),
                    raw
                );
            }
            let blocks = main.clone().pop_to(0).expect("pop all");
            for block in blocks {
                memory_cache.push_block(block).expect("copy");
            }
        })
        .expect("read");
    drop(stored);

    let from_store = stored_cache.pop_to(15).expect("pop store");
    let from_memory = memory_cache.pop_to(15).expect("pop memory");
    assert_eq!(from_store.len(), 8);
    assert_eq!(from_store, from_memory);
    assert_eq!(
        stored_cache.top_block_hash().expect("hash"),
        memory_cache.top_block_hash().expect("hash")
    );
    assert_eq!(
        stored_cache.output_counts_before(15).expect("counts"),
        memory_cache.output_counts_before(15).expect("counts")
    );

    for block in from_store {
        stored_cache.push_block(block).expect("re-push");
    }
    assert_eq!(stored_cache.top_block_hash().expect("hash"), Some(tip.hash));
    assert_eq!(
        stored_cache.parent_state().expect("state"),
        memory
            .with_main(|main| main.parent_state().expect("state"))
            .expect("read")
    );
}

#[test]
fn persistent_main_chain_reorganizes() {
    let store = Arc::new(MemoryStore::new());
    let chain = store_chain(&store);
    let params = chain.context().params.clone();

    let tip1 = extend(&chain, Tip::genesis(&params), 1, 1).expect("block 1");
    let old = extend(&chain, tip1, 2, 1).expect("main");
    let mut branch_tip = tip1;
    let mut outcome = AddBlockOutcome::AddedToMain;
    for _ in 0..3 {
        let (block, next) = mine(&params, &branch_tip, 2, &[]);
        outcome = chain.add_block(&block, NOW).expect("branch block");
        branch_tip = next;
    }
    assert_eq!(outcome, AddBlockOutcome::Reorganized { popped: 2, pushed: 3 });
    drop(chain);

    let reopened = store_chain(&store);
    let tip = reopened.tip().expect("tip");
    assert_eq!((tip.index, tip.info.hash), (4, branch_tip.hash));
    assert!(!reopened.has_block(&old.hash).expect("lookup"));
}

#[test]
fn fjall_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tip = {
        let store = FjallStore::open(dir.path()).expect("open fjall");
        assert!(check_schema_version(&store).expect("schema"));
        let cache = PersistentBlockchainCache::open(store).expect("cache");
        let chain = Blockchain::new(localnet(), cache).expect("chain");
        let params = chain.context().params.clone();
        extend(&chain, Tip::genesis(&params), 5, 4).expect("blocks")
    };

    let store = FjallStore::open(dir.path()).expect("reopen fjall");
    assert!(check_schema_version(&store).expect("schema"));
    let cache = PersistentBlockchainCache::open(store).expect("cache");
    assert_eq!(cache.top_block_index(), Some(5));
    assert_eq!(cache.top_block_hash().expect("hash"), Some(tip.hash));
    assert_eq!(cache.block_count(), 6);
}

#[test]
fn key_image_repeated_inside_one_block_is_refused_by_both_caches() {
    let store = Arc::new(MemoryStore::new());
    let stored = store_chain(&store);
    let memory = Blockchain::new(localnet(), MemoryBlockchainCache::new()).expect("chain");
    let params = stored.context().params.clone();

    let tip9 = extend(&stored, Tip::genesis(&params), 9, 1).expect("stored blocks");
    extend(&memory, Tip::genesis(&params), 9, 1).expect("memory blocks");
    let (block, _) = mine(&params, &tip9, 1, &[spend(PREMINE, 0, 0x42, 500)]);
    memory.add_block(&block, NOW).expect("block 10");
    drop(stored);

    let (mut memory_cache, mut pushed) = memory
        .with_main(|main| {
            let mut cache = main.clone();
            let mut popped = cache.pop_to(10).expect("pop");
            (cache, popped.remove(0))
        })
        .expect("read");
    let mut twin = pushed.transactions[1].clone();
    twin.prefix.outputs[0].amount -= 1;
    pushed.transactions.push(twin);

    let mut stored_cache = PersistentBlockchainCache::open(Arc::clone(&store)).expect("open");
    assert!(matches!(
        memory_cache.push_block(pushed.clone()),
        Err(CacheError::InvalidBlock(_))
    ));
    assert!(matches!(
        stored_cache.push_block(pushed),
        Err(CacheError::InvalidBlock(_))
    ));
    assert_eq!(stored_cache.top_block_index(), Some(9));
    assert_eq!(memory_cache.top_block_index(), Some(9));
    assert_eq!(stored_cache.key_image_spent_at(&[0x42; 32]).expect("lookup"), None);
}

#[test]
fn pruned_block_keeps_its_hashes_after_reopen() {
    let store = Arc::new(MemoryStore::new());
    let transaction = spend(PREMINE, 0, 0x24, 100);
    let tip11 = {
        let chain = store_chain(&store);
        let params = chain.context().params.clone();
        let tip10 = extend(&chain, Tip::genesis(&params), 10, 1).expect("blocks");
        let (block, tip11) = mine(&params, &tip10, 1, &[transaction.clone()]);
        chain.add_block(&block, NOW).expect("spend");
        tip11
    };

    {
        let mut cache = PersistentBlockchainCache::open(Arc::clone(&store)).expect("open");
        assert!(cache.prune_block(11).expect("prune"));
        assert!(!cache.prune_block(11).expect("prune again"));
        assert!(!cache.prune_block(3).expect("nothing to prune"));
        assert!(matches!(
            cache.prune_block(12),
            Err(CacheError::BlockOutOfRange { index: 12 })
        ));
    }

    let cache = PersistentBlockchainCache::open(Arc::clone(&store)).expect("reopen");
    let pruned = cache.raw_transaction(11, 1).expect("stored spend");
    assert!(pruned.signatures.is_pruned());
    assert_eq!(pruned.hash(), transaction.hash());
    assert_eq!(pruned.signatures_hash(), transaction.signatures_hash());
    assert_eq!(cache.block_hash(11).expect("hash"), Some(tip11.hash));
    assert_eq!(
        cache.raw_block(11).expect("raw").expect("block 11").template().expect("template").hash(),
        tip11.hash
    );
    assert!(cache.has_transaction(&transaction.hash()).expect("lookup"));
}
