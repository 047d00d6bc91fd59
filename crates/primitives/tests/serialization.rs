use smartd_primitives::block::{Block, BlockHeader};
use smartd_primitives::encoding::{decode, encode, DecodeError};
use smartd_primitives::outpoint::OutPoint;
use smartd_primitives::transaction::{Transaction, TxIn, TxOut, SEQUENCE_FINAL};

fn tx(tag: u8, inputs: usize, outputs: usize) -> Transaction {
    Transaction {
        version: 1,
        vin: (0..inputs)
            .map(|i| TxIn {
                prevout: OutPoint::new([tag; 32], i as u32),
                script_sig: vec![tag; 3 + i],
                sequence: SEQUENCE_FINAL,
            })
            .collect(),
        vout: (0..outputs)
            .map(|i| TxOut {
                value: (i as i64 + 1) * 1_000,
                script_pubkey: vec![0x76, 0xa9, tag],
            })
            .collect(),
        lock_time: 0,
    }
}

#[test]
fn block_round_trip_is_identity() {
    let header = BlockHeader {
        version: 4,
        prev_block: [9u8; 32],
        merkle_root: [8u8; 32],
        time: 1_520_000_000,
        bits: 0x1e0f_ffff,
        nonce: 7_777,
    };
    let block = Block {
        header,
        transactions: vec![tx(1, 1, 2), tx(2, 3, 1), tx(3, 2, 2)],
    };
    let bytes = block.consensus_encode();
    let back = Block::consensus_decode(&bytes).expect("decode");
    assert_eq!(back.header, block.header);
    assert_eq!(back.transactions, block.transactions);
    assert_eq!(back.consensus_encode(), bytes);
}

#[test]
fn block_rejects_trailing_bytes() {
    let block = Block {
        header: BlockHeader {
            version: 1,
            prev_block: [0u8; 32],
            merkle_root: [0u8; 32],
            time: 0,
            bits: 0x207f_ffff,
            nonce: 0,
        },
        transactions: vec![tx(5, 1, 1)],
    };
    let mut bytes = block.consensus_encode();
    bytes.push(0);
    assert!(matches!(
        Block::consensus_decode(&bytes),
        Err(DecodeError::TrailingBytes)
    ));
}

#[test]
fn truncated_transaction_reports_eof() {
    let sample = tx(4, 2, 2);
    let bytes = encode(&sample);
    let result: Result<Transaction, _> = decode(&bytes[..bytes.len() - 3]);
    assert!(matches!(result, Err(DecodeError::UnexpectedEof)));
}

#[test]
fn txid_changes_with_content() {
    let a = tx(1, 1, 1);
    let mut b = a.clone();
    b.vout[0].value += 1;
    assert_ne!(a.txid(), b.txid());
}
