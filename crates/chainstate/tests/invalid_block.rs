mod common;

use std::sync::Arc;

use common::*;
use smartd_chainstate::state::ChainState;
use smartd_primitives::outpoint::OutPoint;
use smartd_script::{ScriptCheck, ScriptError, ScriptVerifier};
use smartd_storage::memory::MemoryStore;

/// Fails every input whose signature script starts with the poison byte.
struct PoisonVerifier;

const POISON: u8 = 0xbd;

impl ScriptVerifier for PoisonVerifier {
    fn verify(&self, check: &ScriptCheck<'_>) -> Result<(), ScriptError> {
        let script_sig = &check.tx.vin[check.input_index].script_sig;
        if script_sig.first().copied() == Some(POISON) {
            Err(ScriptError::new("mandatory-script-verify-flag-failed"))
        } else {
            Ok(())
        }
    }
}

fn open_poisoned(
    store: Arc<MemoryStore>,
    dir: &std::path::Path,
    params: smartd_consensus::ConsensusParams,
) -> ChainState<MemoryStore> {
    ChainState::open(store, dir, params, test_options(), Arc::new(PoisonVerifier))
        .expect("open chainstate")
}

#[test]
fn script_failure_marks_block_invalid_and_keeps_tip() {
    let store = Arc::new(MemoryStore::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let genesis = genesis_block();
    let params = test_params(&genesis);
    let mut chain = open_poisoned(Arc::clone(&store), dir.path(), params);

    chain.process_block(&genesis).expect("genesis");
    mine_blocks(&mut chain, 101, 0x11);
    let good_tip = chain.tip_hash().expect("tip");

    // Block at height 102 whose spend fails script verification.
    let funded_coinbase = coinbase_tx(1, COINBASE_VALUE, 0x11);
    let mut bad_spend = spend_tx(
        vec![OutPoint::new(funded_coinbase.txid(), 0)],
        vec![(COINBASE_VALUE - 1_000, 0xaa)],
    );
    bad_spend.vin[0].script_sig = vec![POISON, 0x01];
    let bad_block = build_block(
        good_tip,
        BASE_TIME + 102 * 60,
        0xb1,
        vec![coinbase_tx(102, COINBASE_VALUE, 0xb1), bad_spend],
    );
    let bad_hash = bad_block.header.hash();

    // Acceptance stores the body; activation then rejects the connect and
    // marks the entry failed without moving the tip.
    let (outcome, update) = chain.process_block(&bad_block).expect("process");
    assert!(update.connected.is_empty());
    assert_eq!(chain.tip_hash(), Some(good_tip));

    let entry = chain.index().get(outcome.id);
    assert!(entry.failed_self());
    assert!(!chain.is_candidate(outcome.id));

    // Descendants of the invalid block are refused outright.
    let child = build_block(
        bad_hash,
        BASE_TIME + 103 * 60,
        0xb2,
        vec![coinbase_tx(103, COINBASE_VALUE, 0xb2)],
    );
    let err = chain.accept_header(&child.header).expect_err("child");
    assert!(err.is_consensus());

    // The chain keeps extending over the healthy branch.
    mine_blocks(&mut chain, 1, 0x22);
    assert_eq!(chain.tip_height(), 102);
}

#[test]
fn resubmitting_an_invalid_block_stays_rejected() {
    let store = Arc::new(MemoryStore::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let genesis = genesis_block();
    let params = test_params(&genesis);
    let mut chain = open_poisoned(Arc::clone(&store), dir.path(), params);

    chain.process_block(&genesis).expect("genesis");
    mine_blocks(&mut chain, 101, 0x11);

    let funded_coinbase = coinbase_tx(1, COINBASE_VALUE, 0x11);
    let mut bad_spend = spend_tx(
        vec![OutPoint::new(funded_coinbase.txid(), 0)],
        vec![(COINBASE_VALUE - 1_000, 0xaa)],
    );
    bad_spend.vin[0].script_sig = vec![POISON];
    let bad_block = build_block(
        chain.tip_hash().expect("tip"),
        BASE_TIME + 102 * 60,
        0xb1,
        vec![coinbase_tx(102, COINBASE_VALUE, 0xb1), bad_spend],
    );
    chain.process_block(&bad_block).expect("first process");

    let err = chain.process_block(&bad_block).expect_err("cached invalid");
    assert!(err.is_consensus());
}
