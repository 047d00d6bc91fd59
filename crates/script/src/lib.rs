//! Script verification flags, sigop accounting, and the verifier seam.
//!
//! Script execution itself is delegated to a [`ScriptVerifier`]
//! implementation supplied by the embedder; validation treats it as an
//! opaque predicate and only distinguishes mandatory from optional flags.

use std::fmt;

use smartd_primitives::transaction::Transaction;

pub mod sigops;
pub mod standard;

pub use sigops::{legacy_sigops, p2sh_sigops};
pub use standard::{classify_script_pubkey, ScriptType};

/// Script verification flag bits.
pub const VERIFY_NONE: u32 = 0;
pub const VERIFY_P2SH: u32 = 1 << 0;
pub const VERIFY_STRICTENC: u32 = 1 << 1;
pub const VERIFY_DERSIG: u32 = 1 << 2;
pub const VERIFY_LOW_S: u32 = 1 << 3;
pub const VERIFY_NULLDUMMY: u32 = 1 << 4;
pub const VERIFY_SIGPUSHONLY: u32 = 1 << 5;
pub const VERIFY_MINIMALDATA: u32 = 1 << 6;
pub const VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 7;
pub const VERIFY_CLEANSTACK: u32 = 1 << 8;
pub const VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;
pub const VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 10;

/// Failing these renders a block invalid, not merely non-standard.
pub const MANDATORY_SCRIPT_VERIFY_FLAGS: u32 = VERIFY_P2SH;

/// Local relay policy applies these on top of the mandatory set.
pub const STANDARD_SCRIPT_VERIFY_FLAGS: u32 = MANDATORY_SCRIPT_VERIFY_FLAGS
    | VERIFY_DERSIG
    | VERIFY_STRICTENC
    | VERIFY_MINIMALDATA
    | VERIFY_NULLDUMMY
    | VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | VERIFY_CLEANSTACK
    | VERIFY_CHECKLOCKTIMEVERIFY
    | VERIFY_CHECKSEQUENCEVERIFY;

pub const STANDARD_NOT_MANDATORY_VERIFY_FLAGS: u32 =
    STANDARD_SCRIPT_VERIFY_FLAGS & !MANDATORY_SCRIPT_VERIFY_FLAGS;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptError {
    pub reason: &'static str,
}

impl ScriptError {
    pub fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for ScriptError {}

/// One spend to verify: the signature script of `tx.vin[input_index]`
/// against `script_pubkey` guarding `amount`, under `flags`.
pub struct ScriptCheck<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub script_pubkey: &'a [u8],
    pub amount: i64,
    pub flags: u32,
}

pub trait ScriptVerifier: Send + Sync {
    fn verify(&self, check: &ScriptCheck<'_>) -> Result<(), ScriptError>;
}

/// Verifier that accepts every spend. Used where signature data is known
/// valid (reindex) and throughout the test suites.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllVerifier;

impl ScriptVerifier for AcceptAllVerifier {
    fn verify(&self, _check: &ScriptCheck<'_>) -> Result<(), ScriptError> {
        Ok(())
    }
}
