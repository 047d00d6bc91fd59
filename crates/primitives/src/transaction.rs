//! Transaction types and serialization.

use smartd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

/// Transaction versions in use on this chain. Version 2 transactions opt in
/// to relative lock-time semantics for their input sequence fields.
pub const TX_VERSION_1: i32 = 1;
pub const TX_VERSION_2: i32 = 2;

/// Script opcodes of the retired zerocoin transaction form. Outputs minting
/// into the accumulator start with `OP_ZEROCOINMINT`; spends out of it carry
/// `OP_ZEROCOINSPEND` as the first scriptSig byte.
pub const OP_ZEROCOINMINT: u8 = 0xc1;
pub const OP_ZEROCOINSPEND: u8 = 0xc2;

/// Final sequence value: the input does not constrain lock times.
pub const SEQUENCE_FINAL: u32 = u32::MAX;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    /// An input signals replaceability when its sequence leaves room to be
    /// re-signed with a higher one (BIP125).
    pub fn signals_replaceability(&self) -> bool {
        self.sequence < SEQUENCE_FINAL - 1
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn is_zerocoin_mint(&self) -> bool {
        self.script_pubkey.first().copied() == Some(OP_ZEROCOINMINT)
    }
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(self.serialized_size_hint());
        Encodable::consensus_encode(self, &mut encoder);
        encoder.into_inner()
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn serialized_size(&self) -> usize {
        self.consensus_encode().len()
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn is_zerocoin_spend(&self) -> bool {
        self.vin
            .iter()
            .any(|input| input.script_sig.first().copied() == Some(OP_ZEROCOINSPEND))
    }

    pub fn has_zerocoin_component(&self) -> bool {
        self.is_zerocoin_spend() || self.vout.iter().any(TxOut::is_zerocoin_mint)
    }

    fn serialized_size_hint(&self) -> usize {
        let inputs: usize = self
            .vin
            .iter()
            .map(|input| 41 + input.script_sig.len())
            .sum();
        let outputs: usize = self
            .vout
            .iter()
            .map(|output| 9 + output.script_pubkey.len())
            .sum();
        10 + inputs + outputs
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            output.consensus_encode(encoder);
        }
        encoder.write_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let input_count = decoder.read_varint()?;
        let input_count = usize::try_from(input_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut vin = Vec::with_capacity(input_count.min(1 << 16));
        for _ in 0..input_count {
            vin.push(TxIn::consensus_decode(decoder)?);
        }
        let output_count = decoder.read_varint()?;
        let output_count = usize::try_from(output_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut vout = Vec::with_capacity(output_count.min(1 << 16));
        for _ in 0..output_count {
            vout.push(TxOut::consensus_decode(decoder)?);
        }
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    fn sample_tx() -> Transaction {
        Transaction {
            version: TX_VERSION_1,
            vin: vec![TxIn {
                prevout: OutPoint::new([7u8; 32], 1),
                script_sig: vec![0x01, 0x02],
                sequence: SEQUENCE_FINAL,
            }],
            vout: vec![TxOut {
                value: 5_000,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn round_trip() {
        let tx = sample_tx();
        let bytes = encode(&tx);
        let back: Transaction = decode(&bytes).expect("decode");
        assert_eq!(back, tx);
        assert_eq!(back.txid(), tx.txid());
    }

    #[test]
    fn coinbase_detection() {
        let mut tx = sample_tx();
        assert!(!tx.is_coinbase());
        tx.vin[0].prevout = OutPoint::null();
        assert!(tx.is_coinbase());
    }

    #[test]
    fn zerocoin_markers() {
        let mut tx = sample_tx();
        assert!(!tx.has_zerocoin_component());
        tx.vout[0].script_pubkey = vec![OP_ZEROCOINMINT, 0x00];
        assert!(tx.has_zerocoin_component());

        let mut tx = sample_tx();
        tx.vin[0].script_sig = vec![OP_ZEROCOINSPEND];
        assert!(tx.is_zerocoin_spend());
    }

    #[test]
    fn rbf_signaling() {
        let mut tx = sample_tx();
        assert!(!tx.vin[0].signals_replaceability());
        tx.vin[0].sequence = SEQUENCE_FINAL - 2;
        assert!(tx.vin[0].signals_replaceability());
    }
}
