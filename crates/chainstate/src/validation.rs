//! Context-free and contextual block checks.

use std::collections::HashSet;

use rayon::prelude::*;
use smartd_consensus::constants::{
    max_block_sigops, MAX_BLOCK_SERIALIZED_SIZE, MAX_BLOCK_SIZE_INCREASE_MULTIPLE,
    OLD_MAX_BLOCK_SIZE,
};
use smartd_consensus::money::MAX_MONEY;
use smartd_consensus::params::ConsensusParams;
use smartd_consensus::Hash256;
use smartd_pow::validation::{check_proof_of_work, PowError};
use smartd_primitives::block::Block;
use smartd_primitives::hash::sha256d;
use smartd_primitives::transaction::Transaction;
use smartd_script::sigops::legacy_sigops;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidHeader(&'static str),
    InvalidBlock(&'static str),
    InvalidTransaction(&'static str),
    ValueOutOfRange,
    DuplicateInput,
    DuplicateTransaction,
    MerkleMismatch,
    BadScript(&'static str),
    Pow(PowError),
}

impl ValidationError {
    /// Misbehavior score charged to the peer that delivered the offending
    /// data.
    pub fn dos_score(&self) -> u32 {
        match self {
            ValidationError::Pow(_) => 50,
            ValidationError::InvalidHeader(_) => 50,
            ValidationError::BadScript(_) => 100,
            ValidationError::DuplicateTransaction | ValidationError::MerkleMismatch => 100,
            ValidationError::InvalidBlock(_)
            | ValidationError::InvalidTransaction(_)
            | ValidationError::ValueOutOfRange
            | ValidationError::DuplicateInput => 100,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidHeader(message) => write!(f, "{message}"),
            ValidationError::InvalidBlock(message) => write!(f, "{message}"),
            ValidationError::InvalidTransaction(message) => write!(f, "{message}"),
            ValidationError::ValueOutOfRange => write!(f, "value out of range"),
            ValidationError::DuplicateInput => write!(f, "duplicate input"),
            ValidationError::DuplicateTransaction => write!(f, "duplicate transaction"),
            ValidationError::MerkleMismatch => write!(f, "merkle root mismatch"),
            ValidationError::BadScript(message) => write!(f, "{message}"),
            ValidationError::Pow(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<PowError> for ValidationError {
    fn from(err: PowError) -> Self {
        ValidationError::Pow(err)
    }
}

/// Standalone transaction rules that need no chain context.
pub fn check_transaction(tx: &Transaction) -> Result<(), ValidationError> {
    if tx.vin.is_empty() {
        return Err(ValidationError::InvalidTransaction("bad-txns-vin-empty"));
    }
    if tx.vout.is_empty() {
        return Err(ValidationError::InvalidTransaction("bad-txns-vout-empty"));
    }
    if tx.serialized_size() > MAX_BLOCK_SERIALIZED_SIZE as usize {
        return Err(ValidationError::InvalidTransaction("bad-txns-oversize"));
    }

    let mut value_out: i64 = 0;
    for output in &tx.vout {
        if output.value < 0 {
            return Err(ValidationError::InvalidTransaction(
                "bad-txns-vout-negative",
            ));
        }
        if output.value > MAX_MONEY {
            return Err(ValidationError::InvalidTransaction(
                "bad-txns-vout-toolarge",
            ));
        }
        value_out = value_out
            .checked_add(output.value)
            .ok_or(ValidationError::ValueOutOfRange)?;
        if value_out > MAX_MONEY {
            return Err(ValidationError::ValueOutOfRange);
        }
    }

    let mut seen_inputs = HashSet::with_capacity(tx.vin.len());
    for input in &tx.vin {
        if !seen_inputs.insert(input.prevout) {
            return Err(ValidationError::DuplicateInput);
        }
    }

    if tx.is_coinbase() {
        let script_len = tx.vin[0].script_sig.len();
        if !(2..=100).contains(&script_len) {
            return Err(ValidationError::InvalidTransaction("bad-cb-length"));
        }
    } else if tx.vin.iter().any(|input| input.prevout.is_null()) {
        return Err(ValidationError::InvalidTransaction(
            "bad-txns-prevout-null",
        ));
    }

    Ok(())
}

/// Merkle root over txids, also reporting whether the tree shape is
/// malleable: duplicating the trailing pair commits to the same root for a
/// different transaction list.
pub fn merkle_root(txids: &[Hash256]) -> (Hash256, bool) {
    if txids.is_empty() {
        return ([0u8; 32], false);
    }
    let mut layer = txids.to_vec();
    let mut mutated = false;
    while layer.len() > 1 {
        let size = layer.len();
        let mut next = Vec::with_capacity(size.div_ceil(2));
        let mut i = 0usize;
        while i < size {
            let i2 = if i + 1 < size { i + 1 } else { i };
            if i2 == i + 1 && i2 + 1 == size && layer[i] == layer[i2] {
                mutated = true;
            }
            let mut data = Vec::with_capacity(64);
            data.extend_from_slice(&layer[i]);
            data.extend_from_slice(&layer[i2]);
            next.push(sha256d(&data));
            i += 2;
        }
        layer = next;
    }
    (layer[0], mutated)
}

/// Context-free block checks. Returns the txids, computed once and reused by
/// the rest of the pipeline.
pub fn check_block(
    block: &Block,
    params: &ConsensusParams,
    check_pow: bool,
) -> Result<Vec<Hash256>, ValidationError> {
    if block.transactions.is_empty() {
        return Err(ValidationError::InvalidBlock("bad-blk-length"));
    }
    if block.serialized_size() > MAX_BLOCK_SERIALIZED_SIZE as usize {
        return Err(ValidationError::InvalidBlock("bad-blk-length"));
    }

    if check_pow {
        check_proof_of_work(&block.header.hash(), block.header.bits, params)?;
    }

    let txids: Vec<Hash256> = block.transactions.iter().map(Transaction::txid).collect();
    let (root, mutated) = merkle_root(&txids);
    if mutated {
        return Err(ValidationError::DuplicateTransaction);
    }
    if root != block.header.merkle_root {
        return Err(ValidationError::MerkleMismatch);
    }

    if !block.transactions[0].is_coinbase() {
        return Err(ValidationError::InvalidBlock("bad-cb-missing"));
    }
    if block.transactions[1..].iter().any(Transaction::is_coinbase) {
        return Err(ValidationError::InvalidBlock("bad-cb-multiple"));
    }

    block
        .transactions
        .par_iter()
        .try_for_each(check_transaction)?;

    let sigops: u32 = block
        .transactions
        .iter()
        .map(|tx| {
            let inputs: u32 = tx
                .vin
                .iter()
                .map(|input| legacy_sigops(&input.script_sig))
                .sum();
            let outputs: u32 = tx
                .vout
                .iter()
                .map(|output| legacy_sigops(&output.script_pubkey))
                .sum();
            inputs.saturating_add(outputs)
        })
        .sum();
    if sigops > max_block_sigops(MAX_BLOCK_SERIALIZED_SIZE) {
        return Err(ValidationError::InvalidBlock("bad-blk-sigops"));
    }

    Ok(txids)
}

/// Effective block-size limit given the serialized sizes of the trailing
/// window, once the size fork has activated.
pub fn adaptive_max_block_size(trailing_sizes: &[u32], fork_active: bool) -> u32 {
    if !fork_active || trailing_sizes.is_empty() {
        return OLD_MAX_BLOCK_SIZE;
    }
    let mut sizes = trailing_sizes.to_vec();
    sizes.sort_unstable();
    let median = sizes[sizes.len() / 2];
    median
        .saturating_mul(MAX_BLOCK_SIZE_INCREASE_MULTIPLE)
        .clamp(OLD_MAX_BLOCK_SIZE, MAX_BLOCK_SERIALIZED_SIZE)
}

/// Contextual block rules that depend only on the parent and derived
/// limits. Finality of each transaction is checked at the next height
/// against `lock_cutoff_time` (median-time-past once that deployment is
/// active, the block's own timestamp before).
pub fn contextual_check_block(
    block: &Block,
    height: i32,
    lock_cutoff_time: i64,
    size_limit: u32,
    params: &ConsensusParams,
) -> Result<(), ValidationError> {
    if block.serialized_size() > size_limit as usize {
        return Err(ValidationError::InvalidBlock("bad-blk-length"));
    }
    for tx in &block.transactions {
        if !crate::locks::is_final_tx(tx, height, lock_cutoff_time) {
            return Err(ValidationError::InvalidTransaction("bad-txns-nonfinal"));
        }
        if !params.zerocoin_allowed(height) && tx.has_zerocoin_component() {
            return Err(ValidationError::InvalidTransaction("bad-txns-zerocoin"));
        }
    }
    Ok(())
}
