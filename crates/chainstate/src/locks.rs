//! Absolute and relative lock-time evaluation.

use smartd_consensus::constants::{
    LOCKTIME_THRESHOLD, LOCKTIME_VERIFY_SEQUENCE, SEQUENCE_LOCKTIME_DISABLE_FLAG,
    SEQUENCE_LOCKTIME_GRANULARITY, SEQUENCE_LOCKTIME_MASK, SEQUENCE_LOCKTIME_TYPE_FLAG,
};
use smartd_consensus::Hash256;
use smartd_primitives::transaction::{Transaction, SEQUENCE_FINAL, TX_VERSION_2};

/// A transaction is final at `(height, time)` when its lock-time has passed
/// or every input opted out with a final sequence.
pub fn is_final_tx(tx: &Transaction, height: i32, time: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let lock_time = i64::from(tx.lock_time);
    let compare = if lock_time < LOCKTIME_THRESHOLD {
        i64::from(height)
    } else {
        time
    };
    if lock_time < compare {
        return true;
    }
    tx.vin.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// The earliest block at which a transaction's relative locks are satisfied:
/// the spend must land in a block strictly above `min_height` whose
/// past-median time is strictly above `min_time`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SequenceLocks {
    pub min_height: i32,
    pub min_time: i64,
}

impl SequenceLocks {
    pub fn unrestricted() -> Self {
        Self {
            min_height: -1,
            min_time: -1,
        }
    }
}

/// Cached admission-time lock evaluation. Valid only while the pinning block
/// stays on the active chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockPoints {
    pub height: i32,
    pub time: i64,
    /// Height of the highest input block the locks were computed from.
    pub max_input_height: i32,
    /// Hash of the chain entry at `max_input_height` at computation time.
    pub pinning_block: Option<Hash256>,
}

impl LockPoints {
    pub fn unrestricted() -> Self {
        Self {
            height: -1,
            time: -1,
            max_input_height: 0,
            pinning_block: None,
        }
    }
}

/// Compute BIP68 relative locks for `tx` spending coins created at
/// `prev_heights` (parallel to `tx.vin`). `mtp_at_height` resolves an
/// active-chain height to the median-time-past of the block *before* it.
/// Coins still in the pool must be reported at the spending block's height.
pub fn calculate_sequence_locks(
    tx: &Transaction,
    verify_flags: u32,
    prev_heights: &[i32],
    mtp_at_height: impl Fn(i32) -> i64,
) -> SequenceLocks {
    debug_assert_eq!(tx.vin.len(), prev_heights.len());
    let mut locks = SequenceLocks::unrestricted();
    let enforce = tx.version >= TX_VERSION_2 && (verify_flags & LOCKTIME_VERIFY_SEQUENCE) != 0;
    if !enforce {
        return locks;
    }

    for (input, prev_height) in tx.vin.iter().zip(prev_heights.iter()) {
        if input.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            continue;
        }
        let coin_height = *prev_height;
        let value = i64::from(input.sequence & SEQUENCE_LOCKTIME_MASK);
        if input.sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
            // Time units of 512s, anchored at the median-time-past of the
            // block preceding the coin's block.
            let coin_time = mtp_at_height(coin_height);
            locks.min_time = locks
                .min_time
                .max(coin_time + (value << SEQUENCE_LOCKTIME_GRANULARITY));
        } else {
            locks.min_height = locks.min_height.max(coin_height + value as i32);
        }
    }
    locks
}

/// Whether locks computed by [`calculate_sequence_locks`] admit a spend in
/// the block at `spend_height` whose predecessor has median-time-past `mtp`.
pub fn evaluate_sequence_locks(spend_height: i32, mtp: i64, locks: &SequenceLocks) -> bool {
    locks.min_height < spend_height && locks.min_time < mtp
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartd_primitives::outpoint::OutPoint;
    use smartd_primitives::transaction::{TxIn, TxOut};

    fn tx_with_sequence(version: i32, sequence: u32) -> Transaction {
        Transaction {
            version,
            vin: vec![TxIn {
                prevout: OutPoint::new([1u8; 32], 0),
                script_sig: Vec::new(),
                sequence,
            }],
            vout: vec![TxOut {
                value: 1,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn final_when_locktime_zero() {
        let tx = tx_with_sequence(1, 0);
        assert!(is_final_tx(&tx, 0, 0));
    }

    #[test]
    fn height_locktime_compares_against_height() {
        let mut tx = tx_with_sequence(1, 0);
        tx.lock_time = 100;
        assert!(!is_final_tx(&tx, 100, 0));
        assert!(is_final_tx(&tx, 101, 0));
        // Final sequences override the lock.
        tx.vin[0].sequence = SEQUENCE_FINAL;
        assert!(is_final_tx(&tx, 50, 0));
    }

    #[test]
    fn time_locktime_compares_against_time() {
        let mut tx = tx_with_sequence(1, 0);
        tx.lock_time = 1_600_000_000;
        assert!(!is_final_tx(&tx, 0, 1_600_000_000));
        assert!(is_final_tx(&tx, 0, 1_600_000_001));
    }

    #[test]
    fn height_mode_relative_lock() {
        // A coin born at height 10 with sequence 5 needs five confirmations
        // on top before a block may spend it.
        let tx = tx_with_sequence(2, 5);
        let locks =
            calculate_sequence_locks(&tx, LOCKTIME_VERIFY_SEQUENCE, &[10], |_| 0);
        assert_eq!(locks.min_height, 15);
        assert!(!evaluate_sequence_locks(15, i64::MAX, &locks));
        assert!(evaluate_sequence_locks(16, i64::MAX, &locks));
    }

    #[test]
    fn time_mode_relative_lock() {
        let sequence = SEQUENCE_LOCKTIME_TYPE_FLAG | 2; // 2 * 512 seconds
        let tx = tx_with_sequence(2, sequence);
        let coin_mtp = 1_000_000i64;
        let locks = calculate_sequence_locks(
            &tx,
            LOCKTIME_VERIFY_SEQUENCE,
            &[7],
            |height| {
                assert_eq!(height, 7);
                coin_mtp
            },
        );
        assert_eq!(locks.min_time, coin_mtp + 2 * 512);
        assert!(!evaluate_sequence_locks(20, coin_mtp + 1_024, &locks));
        assert!(evaluate_sequence_locks(20, coin_mtp + 1_025, &locks));
    }

    #[test]
    fn version_one_and_disable_bit_opt_out() {
        let v1 = tx_with_sequence(1, 5);
        let locks = calculate_sequence_locks(&v1, LOCKTIME_VERIFY_SEQUENCE, &[10], |_| 0);
        assert_eq!(locks, SequenceLocks::unrestricted());

        let disabled = tx_with_sequence(2, SEQUENCE_LOCKTIME_DISABLE_FLAG | 5);
        let locks =
            calculate_sequence_locks(&disabled, LOCKTIME_VERIFY_SEQUENCE, &[10], |_| 0);
        assert_eq!(locks, SequenceLocks::unrestricted());

        // Without the verify flag nothing is enforced either.
        let v2 = tx_with_sequence(2, 5);
        let locks = calculate_sequence_locks(&v2, 0, &[10], |_| 0);
        assert_eq!(locks, SequenceLocks::unrestricted());
    }
}
