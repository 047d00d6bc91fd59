//! Persisted unspent-output map and best-block pointer.

use std::sync::Arc;

use smartd_consensus::Hash256;
use smartd_primitives::outpoint::OutPoint;
use smartd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::coins::{Coin, CoinsView};

pub const OUTPOINT_KEY_LEN: usize = 36;

const META_BEST_BLOCK_KEY: &[u8] = b"best_block";

pub fn outpoint_key(outpoint: &OutPoint) -> [u8; OUTPOINT_KEY_LEN] {
    let mut bytes = [0u8; OUTPOINT_KEY_LEN];
    bytes[..32].copy_from_slice(&outpoint.txid);
    bytes[32..].copy_from_slice(&outpoint.vout.to_le_bytes());
    bytes
}

pub fn parse_outpoint_key(key: &[u8]) -> Option<OutPoint> {
    if key.len() != OUTPOINT_KEY_LEN {
        return None;
    }
    let mut txid = [0u8; 32];
    txid.copy_from_slice(&key[..32]);
    let vout = u32::from_le_bytes(key[32..].try_into().ok()?);
    Some(OutPoint::new(txid, vout))
}

pub struct UtxoStore<S> {
    store: Arc<S>,
}

impl<S: KeyValueStore> UtxoStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        match self.store.get(Column::Utxo, &outpoint_key(outpoint))? {
            Some(bytes) => Coin::decode(&bytes)
                .map(Some)
                .map_err(|err| StoreError::Backend(err.to_string())),
            None => Ok(None),
        }
    }

    pub fn put(&self, batch: &mut WriteBatch, outpoint: &OutPoint, coin: &Coin) {
        batch.put(Column::Utxo, outpoint_key(outpoint), coin.encode());
    }

    pub fn delete(&self, batch: &mut WriteBatch, outpoint: &OutPoint) {
        batch.delete(Column::Utxo, outpoint_key(outpoint));
    }

    pub fn set_best_block(&self, batch: &mut WriteBatch, hash: &Hash256) {
        batch.put(Column::Meta, META_BEST_BLOCK_KEY, *hash);
    }

    pub fn read_best_block(&self) -> Result<Option<Hash256>, StoreError> {
        match self.store.get(Column::Meta, META_BEST_BLOCK_KEY)? {
            Some(bytes) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(hash))
            }
            Some(_) => Err(StoreError::Backend("invalid best block record".to_string())),
            None => Ok(None),
        }
    }

    /// Visit every stored coin. Used by startup consistency checks and the
    /// UTXO statistics surface.
    pub fn for_each_coin(
        &self,
        mut visitor: impl FnMut(OutPoint, Coin) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.store
            .for_each_prefix(Column::Utxo, &[], &mut |key, value| {
                let outpoint = parse_outpoint_key(key)
                    .ok_or_else(|| StoreError::Backend("invalid utxo key".to_string()))?;
                let coin = Coin::decode(value)
                    .map_err(|err| StoreError::Backend(err.to_string()))?;
                visitor(outpoint, coin)
            })
    }
}

impl<S: KeyValueStore> CoinsView for UtxoStore<S> {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        self.get(outpoint)
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        self.read_best_block()
    }
}
