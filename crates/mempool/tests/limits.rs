mod common;

use std::sync::Arc;

use common::*;
use smartd_mempool::{accept_to_pool, AcceptOptions, Mempool, MempoolErrorKind};
use smartd_primitives::outpoint::OutPoint;
use smartd_script::AcceptAllVerifier;
use smartd_storage::memory::MemoryStore;

#[test]
fn ancestor_chain_limit_caps_unconfirmed_depth() {
    let store = Arc::new(MemoryStore::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut chain, funded) = funded_chain(Arc::clone(&store), dir.path());
    let mut pool = Mempool::new();
    let mut policy = test_policy();
    policy.limits.ancestor_count = 5;
    let verifier = AcceptAllVerifier;

    let mut prevout = funded;
    let mut value = COINBASE_VALUE;
    for depth in 0..5 {
        value -= 1_000;
        let tx = spend_tx(vec![prevout], vec![(value, 0x20 + depth)]);
        prevout = OutPoint::new(tx.txid(), 0);
        accept_to_pool(
            &mut chain,
            &mut pool,
            &policy,
            &verifier,
            tx,
            &AcceptOptions::default(),
        )
        .expect("within limit");
    }
    assert_eq!(pool.len(), 5);

    value -= 1_000;
    let too_deep = spend_tx(vec![prevout], vec![(value, 0x7f)]);
    let err = accept_to_pool(
        &mut chain,
        &mut pool,
        &policy,
        &verifier,
        too_deep,
        &AcceptOptions::default(),
    )
    .expect_err("over limit");
    assert_eq!(err.kind, MempoolErrorKind::NonStandard);
    assert!(err.message.starts_with("too-long-mempool-chain"));
}

#[test]
fn missing_inputs_are_reported_for_orphan_handling() {
    let store = Arc::new(MemoryStore::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut chain, _funded) = funded_chain(Arc::clone(&store), dir.path());
    let mut pool = Mempool::new();
    let policy = test_policy();
    let verifier = AcceptAllVerifier;

    let unknown = OutPoint::new([0xab; 32], 1);
    let orphan = spend_tx(vec![unknown], vec![(1_000_000, 0xaa)]);
    let err = accept_to_pool(
        &mut chain,
        &mut pool,
        &policy,
        &verifier,
        orphan,
        &AcceptOptions::default(),
    )
    .expect_err("orphan");
    assert_eq!(err.kind, MempoolErrorKind::MissingInputs);
    assert_eq!(err.missing_inputs, vec![unknown]);
}

#[test]
fn spent_inputs_are_distinguished_from_missing_ones() {
    let store = Arc::new(MemoryStore::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut chain, funded) = funded_chain(Arc::clone(&store), dir.path());
    let mut pool = Mempool::new();
    let policy = test_policy();
    let verifier = AcceptAllVerifier;

    // Mine a block that splits the matured coin, then spends one half: the
    // spent half has a live sibling output, so re-spending it is a hard
    // reject rather than an orphan.
    let split = spend_tx(
        vec![funded],
        vec![
            (COINBASE_VALUE / 2, 0x31),
            (COINBASE_VALUE / 2 - 1_000, 0x32),
        ],
    );
    let split_txid = split.txid();
    let burn = spend_tx(
        vec![OutPoint::new(split_txid, 0)],
        vec![(COINBASE_VALUE / 2 - 2_000, 0x33)],
    );
    mine_blocks_with(&mut chain, 1, 0x12, vec![split, burn]);

    let double_spend = spend_tx(
        vec![OutPoint::new(split_txid, 0)],
        vec![(COINBASE_VALUE / 4, 0x34)],
    );
    let err = accept_to_pool(
        &mut chain,
        &mut pool,
        &policy,
        &verifier,
        double_spend,
        &AcceptOptions::default(),
    )
    .expect_err("spent input");
    assert_eq!(err.kind, MempoolErrorKind::InvalidTransaction);
    assert_eq!(err.message, "bad-txns-inputs-spent");
}

#[test]
fn absurd_fee_guard_applies_on_request() {
    let store = Arc::new(MemoryStore::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut chain, funded) = funded_chain(Arc::clone(&store), dir.path());
    let mut pool = Mempool::new();
    let policy = test_policy();
    let verifier = AcceptAllVerifier;

    // Nearly the whole input burned as fee.
    let burny = spend_tx(vec![funded], vec![(1_000, 0xaa)]);
    let opts = AcceptOptions {
        limit_free: true,
        reject_absurd_fee: true,
    };
    let err = accept_to_pool(&mut chain, &mut pool, &policy, &verifier, burny.clone(), &opts)
        .expect_err("absurd");
    assert_eq!(err.kind, MempoolErrorKind::NonStandard);
    assert_eq!(err.message, "absurdly-high-fee");

    // Without the guard the same transaction is welcome.
    accept_to_pool(
        &mut chain,
        &mut pool,
        &policy,
        &verifier,
        burny,
        &AcceptOptions::default(),
    )
    .expect("accepted without guard");
}
