//! Consensus-wide constants shared across validation.

/// The maximum allowed size for a serialized block, in bytes (buffer bound;
/// the effective network rule is the adaptive limit below it).
pub const MAX_BLOCK_SERIALIZED_SIZE: u32 = 2_000_000;
/// The block size limit before the adaptive-size fork.
pub const OLD_MAX_BLOCK_SIZE: u32 = 1_000_000;
/// The maximum multiple applied to the median block size once adaptive sizing
/// is in force.
pub const MAX_BLOCK_SIZE_INCREASE_MULTIPLE: u32 = 2;
/// Number of trailing blocks considered when computing the median block size.
pub const NUM_BLOCKS_FOR_MEDIAN_BLOCK: usize = 2016;

/// The maximum allowed number of signature check operations in a block
/// (network rule).
pub const MAX_BLOCK_SIGOPS_COST: u32 = 160_000;
/// The maximum number of sigops in a standard transaction (policy).
pub const MAX_STANDARD_TX_SIGOPS: u32 = 4_000;
/// The maximum size of a standard transaction (policy).
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;
/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Per-block sigop budget derived from the active block-size limit.
pub const fn max_block_sigops(max_block_size: u32) -> u32 {
    max_block_size / 50
}

/// Coinbase transaction outputs can only be spent after this number of new
/// blocks (network rule).
pub const COINBASE_MATURITY: i32 = 100;

/// Accept headers at most this far into the future.
pub const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;
/// Number of ancestor timestamps used for median-time-past.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Lock-time values below this are block heights, otherwise Unix timestamps.
pub const LOCKTIME_THRESHOLD: i64 = 500_000_000;

/// Flags for nSequence and nLockTime locks.
///
/// Interpret sequence numbers as relative lock-time constraints.
pub const LOCKTIME_VERIFY_SEQUENCE: u32 = 1 << 0;
/// Use median-time-past instead of the block time for the end point.
pub const LOCKTIME_MEDIAN_TIME_PAST: u32 = 1 << 1;
/// Standard locktime verify flags used by non-consensus code.
pub const STANDARD_LOCKTIME_VERIFY_FLAGS: u32 =
    LOCKTIME_VERIFY_SEQUENCE | LOCKTIME_MEDIAN_TIME_PAST;

/// If this bit is set in a sequence field, the field carries no relative
/// lock-time constraint.
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
/// If set, the relative lock is time-based, otherwise height-based.
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
/// Mask extracting the lock value from a sequence field.
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;
/// Time-based relative locks count in units of `1 << GRANULARITY` seconds.
pub const SEQUENCE_LOCKTIME_GRANULARITY: u32 = 9;

/// Height marker used for coins created by pool transactions.
pub const MEMPOOL_HEIGHT: u32 = 0x7fff_ffff;
