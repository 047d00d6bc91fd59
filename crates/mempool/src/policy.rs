//! Local admission policy knobs and the free-relay limiter.

use smartd_consensus::constants::{MAX_BLOCK_SIGOPS_COST, MAX_STANDARD_TX_SIGOPS};

/// Transitive package bounds enforced at admission.
#[derive(Clone, Copy, Debug)]
pub struct MempoolLimits {
    pub ancestor_count: u64,
    pub ancestor_size: u64,
    pub descendant_count: u64,
    pub descendant_size: u64,
}

impl Default for MempoolLimits {
    fn default() -> Self {
        Self {
            ancestor_count: 25,
            ancestor_size: 101_000,
            descendant_count: 25,
            descendant_size: 101_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MempoolPolicy {
    pub require_standard: bool,
    /// Fee rate in satoshi/KB.
    pub min_relay_fee_per_kb: i64,
    /// Thousands of bytes per minute admitted below the relay rate.
    pub limit_free_relay_kb_per_minute: u64,
    pub max_pool_bytes: usize,
    /// Entries older than this are expired on size pressure.
    pub expiry_secs: u64,
    pub limits: MempoolLimits,
    /// `reject_absurd_fee` trips when the fee exceeds this multiple of the
    /// relay fee for the size.
    pub absurd_fee_multiplier: i64,
    /// Bound on direct conflicts plus their descendants a replacement may
    /// evict.
    pub max_replacement_set: usize,
    pub max_scriptsig_size: usize,
    pub max_op_return_bytes: usize,
    pub max_standard_tx_sigops: u32,
}

impl MempoolPolicy {
    pub fn standard(min_relay_fee_per_kb: i64, require_standard: bool) -> Self {
        Self {
            require_standard,
            min_relay_fee_per_kb: min_relay_fee_per_kb.max(0),
            limit_free_relay_kb_per_minute: 15,
            max_pool_bytes: 300 * 1024 * 1024,
            expiry_secs: 14 * 24 * 60 * 60,
            limits: MempoolLimits::default(),
            absurd_fee_multiplier: 10_000,
            max_replacement_set: 100,
            max_scriptsig_size: 1_650,
            max_op_return_bytes: 80,
            max_standard_tx_sigops: MAX_STANDARD_TX_SIGOPS.min(MAX_BLOCK_SIGOPS_COST),
        }
    }

    pub fn min_relay_fee_for_size(&self, size: usize) -> i64 {
        min_fee_for_size(self.min_relay_fee_per_kb, size)
    }
}

pub fn min_fee_for_size(fee_per_kb: i64, size: usize) -> i64 {
    if fee_per_kb <= 0 {
        return 0;
    }
    let size = i64::try_from(size).unwrap_or(i64::MAX);
    let mut fee = fee_per_kb.saturating_mul(size) / 1000;
    if fee == 0 {
        fee = fee_per_kb;
    }
    fee
}

/// Exponentially decayed budget for below-fee transactions: the counter
/// leaks with a ten-minute time constant and admission stops at ten minutes'
/// worth of the configured rate.
#[derive(Debug, Default)]
pub struct FreeRelayLimiter {
    count: f64,
    last_time: u64,
}

impl FreeRelayLimiter {
    pub fn try_consume(&mut self, limit_kb_per_minute: u64, size: usize, now: u64) -> bool {
        let threshold = (limit_kb_per_minute as f64) * 10.0 * 1000.0;
        let delta = now.saturating_sub(self.last_time);
        self.count *= (1.0_f64 - 1.0_f64 / 600.0_f64).powf(delta as f64);
        self.last_time = now;
        if self.count >= threshold {
            return false;
        }
        self.count += size as f64;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_fee_rounds_up_from_zero() {
        assert_eq!(min_fee_for_size(1_000, 2_000), 2_000);
        assert_eq!(min_fee_for_size(1_000, 1), 1_000);
        assert_eq!(min_fee_for_size(0, 500), 0);
    }

    #[test]
    fn limiter_blocks_after_budget_and_decays() {
        let mut limiter = FreeRelayLimiter::default();
        // 1 kB/minute => 10_000 byte budget.
        let mut admitted = 0usize;
        while limiter.try_consume(1, 1_000, 0) {
            admitted += 1;
            assert!(admitted < 100, "limiter never tripped");
        }
        assert_eq!(admitted, 10);
        // After a long quiet period the budget recovers.
        assert!(limiter.try_consume(1, 1_000, 24 * 60 * 60));
    }
}
