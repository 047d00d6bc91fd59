//! Difficulty and compact target utilities.

use std::cmp::Ordering;

use primitive_types::U256;
use smartd_consensus::{ConsensusParams, Hash256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;
    let negative = (bits & 0x0080_0000) != 0;

    if negative {
        return Err(CompactError::Negative);
    }

    let value = if size <= 3 {
        let shift = 8 * (3 - size);
        word >>= shift;
        U256::from(word)
    } else {
        let shift = 8 * (size - 3);
        U256::from(word) << shift
    };

    if word != 0 {
        let overflow = size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
        if overflow {
            return Err(CompactError::Overflow);
        }
    }

    Ok(value)
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact: u32;

    if size <= 3 {
        compact = value.low_u32() << (8 * (3 - size));
    } else {
        let shift = 8 * (size - 3);
        compact = (value >> shift).low_u32();
    }

    if (compact & 0x0080_0000) != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

pub fn compact_to_target(bits: u32) -> Result<Hash256, CompactError> {
    let value = compact_to_u256(bits)?;
    Ok(value.to_little_endian())
}

pub fn target_to_compact(target: &Hash256) -> u32 {
    u256_to_compact(U256::from_little_endian(target))
}

pub fn hash_meets_target(hash: &Hash256, target: &Hash256) -> bool {
    let hash_value = U256::from_little_endian(hash);
    let target_value = U256::from_little_endian(target);
    hash_value <= target_value
}

/// Expected work contributed by a block at this difficulty:
/// `~target / (target + 1) + 1`.
pub fn block_proof(bits: u32) -> Result<U256, CompactError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Ok(U256::zero());
    }
    let one = U256::from(1u64);
    Ok((!target / (target + one)) + one)
}

pub fn cmp_work(a: &U256, b: &U256) -> Ordering {
    a.cmp(b)
}

/// Bits required for the block following `last`, given the first block time
/// of the closing retarget window.
///
/// The schedule retargets every `difficulty_adjustment_interval` blocks by
/// the ratio of actual to target timespan, clamped to a factor of four, and
/// never below the chain's proof-of-work limit. Between adjustments the bits
/// carry over, except on min-difficulty chains where a block arriving more
/// than twice the target spacing late may use the limit.
pub fn next_work_required(
    last_height: i32,
    last_bits: u32,
    last_time: u32,
    first_block_time: u32,
    next_block_time: Option<i64>,
    params: &ConsensusParams,
) -> Result<u32, CompactError> {
    let pow_limit = U256::from_little_endian(&params.pow_limit);
    let limit_bits = u256_to_compact(pow_limit);
    if params.pow_no_retargeting {
        return Ok(last_bits);
    }

    let interval = params.difficulty_adjustment_interval();
    if (i64::from(last_height) + 1) % interval != 0 {
        if params.pow_allow_min_difficulty_blocks {
            if let Some(next_time) = next_block_time {
                if next_time > i64::from(last_time) + params.pow_target_spacing * 2 {
                    return Ok(limit_bits);
                }
            }
        }
        return Ok(last_bits);
    }

    let mut actual_timespan = i64::from(last_time).saturating_sub(i64::from(first_block_time));
    if actual_timespan < params.pow_target_timespan / 4 {
        actual_timespan = params.pow_target_timespan / 4;
    }
    if actual_timespan > params.pow_target_timespan * 4 {
        actual_timespan = params.pow_target_timespan * 4;
    }

    let mut target = compact_to_u256(last_bits)?;
    target = target.saturating_mul(U256::from(actual_timespan as u64));
    target /= U256::from(params.pow_target_timespan as u64);
    if target > pow_limit {
        target = pow_limit;
    }
    Ok(u256_to_compact(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartd_consensus::params::{chain_params, Network};

    #[test]
    fn block_proof_of_easy_target_is_small() {
        let params = chain_params(Network::Regtest);
        let bits = target_to_compact(&params.pow_limit);
        let proof = block_proof(bits).expect("proof");
        assert_eq!(proof, U256::from(2u64));
    }

    #[test]
    fn retarget_is_clamped() {
        let mut params = chain_params(Network::Mainnet);
        params.pow_no_retargeting = false;
        params.pow_allow_min_difficulty_blocks = false;
        let interval = params.difficulty_adjustment_interval() as i32;
        let bits = 0x1d00_ffff;

        // Instant window: difficulty rises by at most 4x.
        let fast = next_work_required(interval - 1, bits, 1_000_000, 1_000_000, None, &params)
            .expect("bits");
        let fast_target = compact_to_u256(fast).expect("target");
        let base_target = compact_to_u256(bits).expect("target");
        assert_eq!(fast_target, base_target / 4);

        // Stalled window: difficulty drops by at most 4x.
        let slow_span = (params.pow_target_timespan * 100) as u32;
        let slow = next_work_required(interval - 1, bits, slow_span, 0, None, &params)
            .expect("bits");
        let slow_target = compact_to_u256(slow).expect("target");
        assert_eq!(slow_target, base_target * 4);
    }

    #[test]
    fn no_adjustment_off_boundary() {
        let mut params = chain_params(Network::Mainnet);
        params.pow_allow_min_difficulty_blocks = false;
        let bits = 0x1c12_3456;
        let kept = next_work_required(100, bits, 5_000, 0, None, &params).expect("bits");
        assert_eq!(kept, bits);
    }
}
