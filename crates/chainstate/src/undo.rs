//! Per-block spend journal.

use smartd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use smartd_primitives::outpoint::OutPoint;

use crate::coins::Coin;

const BLOCK_UNDO_VERSION: u8 = 1;

/// One spent input: the outpoint and the exact coin it consumed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpentCoin {
    pub outpoint: OutPoint,
    pub coin: Coin,
}

/// Spent coins of a block in input order, one per non-coinbase input of each
/// non-coinbase transaction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockUndo {
    pub spent: Vec<SpentCoin>,
}

impl BlockUndo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_UNDO_VERSION);
        encoder.write_u32_le(self.spent.len() as u32);
        for spent in &self.spent {
            spent.outpoint.consensus_encode(&mut encoder);
            encoder.write_var_bytes(&spent.coin.encode());
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u8()?;
        if version != BLOCK_UNDO_VERSION {
            return Err(DecodeError::InvalidData("unsupported block undo version"));
        }
        let spent_len = decoder.read_u32_le()? as usize;
        let mut spent = Vec::with_capacity(spent_len.min(1 << 16));
        for _ in 0..spent_len {
            let outpoint = OutPoint::consensus_decode(&mut decoder)?;
            let coin_bytes = decoder.read_var_bytes()?;
            let coin = Coin::decode(&coin_bytes)
                .map_err(|_| DecodeError::InvalidData("invalid coin in undo"))?;
            spent.push(SpentCoin { outpoint, coin });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { spent })
    }
}
