use primitive_types::U256;
use smartd_consensus::{ConsensusParams, Hash256};
use smartd_primitives::block::BlockHeader;

use crate::difficulty::{compact_to_u256, CompactError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowError {
    InvalidTarget,
    TargetAboveLimit,
    HighHash,
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::InvalidTarget => write!(f, "invalid difficulty target"),
            PowError::TargetAboveLimit => write!(f, "difficulty target above limit"),
            PowError::HighHash => write!(f, "hash does not meet target"),
        }
    }
}

impl std::error::Error for PowError {}

impl From<CompactError> for PowError {
    fn from(_: CompactError) -> Self {
        PowError::InvalidTarget
    }
}

/// Contextless proof-of-work check: the header hash must be at or below the
/// target its bits encode, and the target must be within the chain limit.
pub fn check_proof_of_work(
    hash: &Hash256,
    bits: u32,
    params: &ConsensusParams,
) -> Result<(), PowError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Err(PowError::InvalidTarget);
    }
    if target > U256::from_little_endian(&params.pow_limit) {
        return Err(PowError::TargetAboveLimit);
    }
    if U256::from_little_endian(hash) > target {
        return Err(PowError::HighHash);
    }
    Ok(())
}

pub fn check_header_pow(header: &BlockHeader, params: &ConsensusParams) -> Result<(), PowError> {
    check_proof_of_work(&header.hash(), header.bits, params)
}
