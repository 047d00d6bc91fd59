//! Shared harness for mempool end-to-end tests: a regtest chain, the pool,
//! and a permissive script verifier.

#![allow(dead_code)]

use std::sync::Arc;

use smartd_chainstate::state::{ChainState, ChainStateOptions};
use smartd_chainstate::validation::merkle_root;
use smartd_consensus::money::COIN;
use smartd_consensus::params::{chain_params, ConsensusParams, Network};
use smartd_consensus::softfork::{Deployment, DeploymentSchedule};
use smartd_consensus::Hash256;
use smartd_mempool::MempoolPolicy;
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

pub fn spend_with_sequence(
    version: i32,
    prevouts: Vec<(OutPoint, u32)>,
    outputs: Vec<(i64, u8)>,
) -> Transaction {
    Transaction {
        version,
        vin: prevouts
            .into_iter()
            .map(|(prevout, sequence)| TxIn {
                prevout,
                script_sig: vec![0x01, 0x02],
                sequence,
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

pub fn spend_tx(prevouts: Vec<OutPoint>, outputs: Vec<(i64, u8)>) -> Transaction {
    spend_with_sequence(
        1,
        prevouts
            .into_iter()
            .map(|prevout| (prevout, SEQUENCE_FINAL))
            .collect(),
        outputs,
    )
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

/// Regtest parameters with relative locks active from genesis.
pub fn test_params(genesis: &Block) -> ConsensusParams {
    let mut params = chain_params(Network::Regtest);
    params.hash_genesis_block = genesis.header.hash();
    params.deployments[Deployment::Csv.as_usize()].start_time =
        DeploymentSchedule::ALWAYS_ACTIVE;
    params
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
        ChainStateOptions {
            check_pow: false,
            ..ChainStateOptions::default()
        },
        Arc::new(AcceptAllVerifier),
    )
    .expect("open chainstate")
}

pub fn test_policy() -> MempoolPolicy {
    MempoolPolicy::standard(1_000, false)
}

/// Extend the chain with single-coinbase blocks plus optional extra
/// transactions in the first mined block.
pub fn mine_blocks_with(
    chain: &mut ChainState<MemoryStore>,
    count: u32,
    tag: u8,
    mut extra: Vec<Transaction>,
) -> Vec<Hash256> {
    let mut hashes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let height = (chain.tip_height() + 1) as u32;
        let prev = chain.tip_hash().expect("tip");
        let time = BASE_TIME + height * 60;
        let mut txs = vec![coinbase_tx(height, COINBASE_VALUE, tag)];
        txs.append(&mut extra);
        let block = build_block(prev, time, height, txs);
        hashes.push(block.header.hash());
        chain.process_block(&block).expect("process block");
    }
    hashes
}

pub fn mine_blocks(
    chain: &mut ChainState<MemoryStore>,
    count: u32,
    tag: u8,
) -> Vec<Hash256> {
    mine_blocks_with(chain, count, tag, Vec::new())
}

/// Fresh chain with one matured, spendable coinbase. Returns the chain and
/// the outpoint of the matured coin.
pub fn funded_chain(
    store: Arc<MemoryStore>,
    dir: &std::path::Path,
) -> (ChainState<MemoryStore>, OutPoint) {
    let genesis = genesis_block();
    let params = test_params(&genesis);
    let mut chain = open_chain(store, dir, params);
    chain.process_block(&genesis).expect("genesis");
    mine_blocks(&mut chain, 101, 0x11);
    let funded = coinbase_tx(1, COINBASE_VALUE, 0x11);
    (chain, OutPoint::new(funded.txid(), 0))
}
