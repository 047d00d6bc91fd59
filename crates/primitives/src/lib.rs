//! Consensus primitive types and their wire encoding.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use block::{Block, BlockHeader};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
