mod common;

use std::sync::Arc;

use common::*;
use smartd_mempool::{accept_to_pool, update_for_reorg, AcceptOptions, Mempool};
use smartd_script::AcceptAllVerifier;
use smartd_storage::memory::MemoryStore;

#[test]
fn reorg_resurrects_disconnected_transactions() {
    let store = Arc::new(MemoryStore::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut chain, funded) = funded_chain(Arc::clone(&store), dir.path());
    let mut pool = Mempool::new();
    let policy = test_policy();
    let verifier = AcceptAllVerifier;

    let fork_hash = chain.tip_hash().expect("tip");
    let fork_height = chain.tip_height() as u32;

    // Branch A carries the spend in a block.
    let spend = spend_tx(vec![funded], vec![(COINBASE_VALUE - 2_000, 0xaa)]);
    let spend_txid = spend.txid();
    let a1 = build_block(
        fork_hash,
        BASE_TIME + (fork_height + 1) * 60,
        0xa1,
        vec![coinbase_tx(fork_height + 1, COINBASE_VALUE, 0xa1), spend],
    );
    let (_, update) = chain.process_block(&a1).expect("a1");
    update_for_reorg(&mut chain, &mut pool, &policy, &verifier, &update);
    assert!(!pool.contains(&spend_txid));

    // Branch B outruns it without including the spend.
    let mut prev = fork_hash;
    let mut updates = Vec::new();
    for step in 1u32..=2 {
        let height = fork_height + step;
        let block = build_block(
            prev,
            BASE_TIME + height * 60 + 9,
            0xb0 + step,
            vec![coinbase_tx(height, COINBASE_VALUE, 0xb0 + step as u8)],
        );
        prev = block.header.hash();
        let (_, update) = chain.process_block(&block).expect("branch b");
        updates.push(update);
    }
    for update in &updates {
        update_for_reorg(&mut chain, &mut pool, &policy, &verifier, update);
    }

    // The disconnected spend is back in the pool and still valid.
    assert!(pool.contains(&spend_txid));
    assert_eq!(pool.len(), 1);
}

#[test]
fn pool_transaction_mined_elsewhere_is_evicted_with_conflicts() {
    let store = Arc::new(MemoryStore::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut chain, funded) = funded_chain(Arc::clone(&store), dir.path());
    let mut pool = Mempool::new();
    let policy = test_policy();
    let verifier = AcceptAllVerifier;

    let pooled = spend_tx(vec![funded], vec![(COINBASE_VALUE - 2_000, 0xaa)]);
    let pooled_txid = pooled.txid();
    accept_to_pool(
        &mut chain,
        &mut pool,
        &policy,
        &verifier,
        pooled.clone(),
        &AcceptOptions::default(),
    )
    .expect("accept");

    // A block mines a conflicting spend of the same coin.
    let rival_spend = spend_tx(vec![funded], vec![(COINBASE_VALUE - 9_000, 0xbb)]);
    let height = chain.tip_height() as u32 + 1;
    let block = build_block(
        chain.tip_hash().expect("tip"),
        BASE_TIME + height * 60,
        0xc1,
        vec![coinbase_tx(height, COINBASE_VALUE, 0xc1), rival_spend],
    );
    let (_, update) = chain.process_block(&block).expect("block");
    update_for_reorg(&mut chain, &mut pool, &policy, &verifier, &update);

    assert!(!pool.contains(&pooled_txid));
    assert!(pool.is_empty());
}

#[test]
fn maturity_violations_are_removed_after_rewind() {
    let store = Arc::new(MemoryStore::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut chain, funded) = funded_chain(Arc::clone(&store), dir.path());
    let mut pool = Mempool::new();
    let policy = test_policy();
    let verifier = AcceptAllVerifier;

    // Spend of a coinbase that is exactly mature at the current tip.
    let spend = spend_tx(vec![funded], vec![(COINBASE_VALUE - 2_000, 0xaa)]);
    let spend_txid = spend.txid();
    accept_to_pool(
        &mut chain,
        &mut pool,
        &policy,
        &verifier,
        spend,
        &AcceptOptions::default(),
    )
    .expect("accept");
    assert!(pool.get(&spend_txid).expect("entry").spends_coinbase);

    // Rewinding one block keeps it barely mature; two pushes it under.
    let tip = chain.tip_hash().expect("tip");
    let update = chain.invalidate_block(&tip).expect("rewind one");
    update_for_reorg(&mut chain, &mut pool, &policy, &verifier, &update);
    assert!(pool.contains(&spend_txid));

    let tip = chain.tip_hash().expect("tip");
    let update = chain.invalidate_block(&tip).expect("rewind two");
    update_for_reorg(&mut chain, &mut pool, &policy, &verifier, &update);
    assert!(!pool.contains(&spend_txid));
}
