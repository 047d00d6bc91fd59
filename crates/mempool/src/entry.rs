//! Pool entry bookkeeping.

use std::collections::HashSet;

use smartd_chainstate::locks::LockPoints;
use smartd_consensus::Hash256;
use smartd_primitives::transaction::Transaction;

#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub txid: Hash256,
    pub tx: Transaction,
    pub size: usize,
    pub sigops: u32,
    pub fee: i64,
    /// Prioritisation delta folded into every fee comparison.
    pub fee_delta: i64,
    pub time: u64,
    pub entry_height: i32,
    pub spends_coinbase: bool,
    pub lock_points: LockPoints,

    /// Direct in-pool parents and children.
    pub parents: HashSet<Hash256>,
    pub children: HashSet<Hash256>,

    /// Aggregates over the in-pool ancestor closure, including this entry.
    pub ancestor_count: u64,
    pub ancestor_size: u64,
    pub ancestor_fees: i64,
    /// Aggregates over the in-pool descendant closure, including this entry.
    pub descendant_count: u64,
    pub descendant_size: u64,
    pub descendant_fees: i64,
}

impl MempoolEntry {
    pub fn modified_fee(&self) -> i64 {
        self.fee.saturating_add(self.fee_delta)
    }

    /// Fee rate in satoshi per 1000 bytes.
    pub fn fee_rate_per_kb(&self) -> i64 {
        fee_rate_per_kb(self.modified_fee(), self.size)
    }

    /// Package fee rate used for eviction: this entry together with its
    /// in-pool descendants.
    pub fn descendant_fee_rate_per_kb(&self) -> i64 {
        fee_rate_per_kb(self.descendant_fees, self.descendant_size as usize)
    }
}

pub fn fee_rate_per_kb(fee: i64, size: usize) -> i64 {
    if size == 0 {
        return 0;
    }
    let size = i64::try_from(size).unwrap_or(i64::MAX);
    fee.saturating_mul(1000) / size
}

/// Compare fee rates without dividing: `a_fee/a_size > b_fee/b_size`.
pub fn fee_rate_greater(a_fee: i64, a_size: usize, b_fee: i64, b_size: usize) -> bool {
    let left = i128::from(a_fee) * i128::from(b_size.max(1) as u64);
    let right = i128::from(b_fee) * i128::from(a_size.max(1) as u64);
    left > right
}
