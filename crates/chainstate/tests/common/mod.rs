//! Shared harness for chainstate end-to-end tests: a regtest chain driven
//! with hand-built blocks and a permissive script verifier.

#![allow(dead_code)]

use std::sync::Arc;

use smartd_chainstate::state::{ChainState, ChainStateOptions};
use smartd_chainstate::validation::merkle_root;
use smartd_consensus::money::COIN;
use smartd_consensus::params::{chain_params, ConsensusParams, Network};
use smartd_consensus::Hash256;
use smartd_primitives::block::{Block, BlockHeader};
use smartd_primitives::outpoint::OutPoint;
use smartd_primitives::transaction::{Transaction, TxIn, TxOut, SEQUENCE_FINAL};
use smartd_script::AcceptAllVerifier;
use smartd_storage::memory::MemoryStore;

pub const TEST_BITS: u32 = 0x207f_ffff;
pub const BASE_TIME: u32 = 1_600_000_000;
pub const COINBASE_VALUE: i64 = 50 * COIN;

pub fn p2pkh_script(tag: u8) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(&[tag; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

pub fn coinbase_tx(height: u32, value: i64, tag: u8) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
            sequence: SEQUENCE_FINAL,
        }],
        vout: vec![TxOut {
            value,
            script_pubkey: p2pkh_script(tag),
        }],
        lock_time: 0,
    }
}

pub fn spend_tx(prevouts: Vec<OutPoint>, outputs: Vec<(i64, u8)>) -> Transaction {
    Transaction {
        version: 1,
        vin: prevouts
            .into_iter()
            .map(|prevout| TxIn {
                prevout,
                script_sig: vec![0x01, 0x02],
                sequence: SEQUENCE_FINAL,
            })
            .collect(),
        vout: outputs
            .into_iter()
            .map(|(value, tag)| TxOut {
                value,
                script_pubkey: p2pkh_script(tag),
            })
            .collect(),
        lock_time: 0,
    }
}

pub fn build_block(prev_hash: Hash256, time: u32, nonce: u32, txs: Vec<Transaction>) -> Block {
    let txids: Vec<Hash256> = txs.iter().map(Transaction::txid).collect();
    let (root, _) = merkle_root(&txids);
    Block {
        header: BlockHeader {
            version: 4,
            prev_block: prev_hash,
            merkle_root: root,
            time,
            bits: TEST_BITS,
            nonce,
        },
        transactions: txs,
    }
}

pub fn genesis_block() -> Block {
    build_block([0u8; 32], BASE_TIME, 0, vec![coinbase_tx(0, 0, 0)])
}

pub fn test_params(genesis: &Block) -> ConsensusParams {
    let mut params = chain_params(Network::Regtest);
    params.hash_genesis_block = genesis.header.hash();
    params
}

pub fn test_options() -> ChainStateOptions {
    ChainStateOptions {
        check_pow: false,
        coins_cache_bytes: 64 * 1024,
        ..ChainStateOptions::default()
    }
}

pub fn open_chain(
    store: Arc<MemoryStore>,
    dir: &std::path::Path,
    params: ConsensusParams,
) -> ChainState<MemoryStore> {
    ChainState::open(
        store,
        dir,
        params,
        test_options(),
        Arc::new(AcceptAllVerifier),
    )
    .expect("open chainstate")
}

/// Extend the chain with `count` single-coinbase blocks; returns the block
/// hashes in order.
pub fn mine_blocks(
    chain: &mut ChainState<MemoryStore>,
    count: u32,
    tag: u8,
) -> Vec<Hash256> {
    let mut hashes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let height = (chain.tip_height() + 1) as u32;
        let prev = chain.tip_hash().expect("tip");
        let time = BASE_TIME + height * 60;
        let block = build_block(
            prev,
            time,
            height,
            vec![coinbase_tx(height, COINBASE_VALUE, tag)],
        );
        hashes.push(block.header.hash());
        chain.process_block(&block).expect("process block");
    }
    hashes
}
