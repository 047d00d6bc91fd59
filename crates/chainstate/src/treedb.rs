//! Persisted block-tree metadata: index entries, file info, named flags.

use std::sync::Arc;

use smartd_consensus::Hash256;
use smartd_primitives::encoding::{Decoder, Encoder};
use smartd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::blobstore::FileLocation;
use crate::blockindex::{BlockIndexEntry, BlockValidity};
use crate::filemeta::{file_info_key, parse_file_info_key, BlockFileInfo};

const META_LAST_BLOCK_FILE_KEY: &[u8] = b"last_block_file";
const META_REINDEXING_KEY: &[u8] = b"reindexing";

pub const FLAG_PRUNED_BLOCK_FILES: &str = "prunedblockfiles";
pub const FLAG_TX_INDEX: &str = "txindex";

/// On-disk form of a block index entry. The arena links are rebuilt from
/// `prev_hash` at load.
#[derive(Clone, Debug, PartialEq)]
pub struct DiskBlockEntry {
    pub prev_hash: Hash256,
    pub height: i32,
    pub status: u32,
    pub validity: u8,
    pub tx_count: u32,
    pub chain_tx: u64,
    pub data_pos: Option<FileLocation>,
    pub undo_pos: Option<FileLocation>,
    pub version: i32,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl DiskBlockEntry {
    pub fn from_entry(entry: &BlockIndexEntry, prev_hash: Hash256) -> Self {
        Self {
            prev_hash,
            height: entry.height,
            status: entry.status,
            validity: entry.validity as u8,
            tx_count: entry.tx_count,
            chain_tx: entry.chain_tx,
            data_pos: entry.data_pos,
            undo_pos: entry.undo_pos,
            version: entry.version,
            merkle_root: entry.merkle_root,
            time: entry.time,
            bits: entry.bits,
            nonce: entry.nonce,
        }
    }

    pub fn validity(&self) -> BlockValidity {
        BlockValidity::from_u8(self.validity).unwrap_or(BlockValidity::Tree)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(128);
        encoder.write_hash_le(&self.prev_hash);
        encoder.write_i32_le(self.height);
        encoder.write_u32_le(self.status);
        encoder.write_u8(self.validity);
        encoder.write_u32_le(self.tx_count);
        encoder.write_u64_le(self.chain_tx);
        encode_location(&mut encoder, &self.data_pos);
        encode_location(&mut encoder, &self.undo_pos);
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let mut decoder = Decoder::new(bytes);
        let prev_hash = decoder.read_hash_le().map_err(|err| err.to_string())?;
        let height = decoder.read_i32_le().map_err(|err| err.to_string())?;
        let status = decoder.read_u32_le().map_err(|err| err.to_string())?;
        let validity = decoder.read_u8().map_err(|err| err.to_string())?;
        let tx_count = decoder.read_u32_le().map_err(|err| err.to_string())?;
        let chain_tx = decoder.read_u64_le().map_err(|err| err.to_string())?;
        let data_pos = decode_location(&mut decoder)?;
        let undo_pos = decode_location(&mut decoder)?;
        let version = decoder.read_i32_le().map_err(|err| err.to_string())?;
        let merkle_root = decoder.read_hash_le().map_err(|err| err.to_string())?;
        let time = decoder.read_u32_le().map_err(|err| err.to_string())?;
        let bits = decoder.read_u32_le().map_err(|err| err.to_string())?;
        let nonce = decoder.read_u32_le().map_err(|err| err.to_string())?;
        if !decoder.is_empty() {
            return Err("trailing bytes in block index entry".to_string());
        }
        Ok(Self {
            prev_hash,
            height,
            status,
            validity,
            tx_count,
            chain_tx,
            data_pos,
            undo_pos,
            version,
            merkle_root,
            time,
            bits,
            nonce,
        })
    }
}

fn encode_location(encoder: &mut Encoder, location: &Option<FileLocation>) {
    match location {
        Some(location) => {
            encoder.write_u8(1);
            encoder.write_bytes(&location.encode());
        }
        None => encoder.write_u8(0),
    }
}

fn decode_location(decoder: &mut Decoder) -> Result<Option<FileLocation>, String> {
    let present = decoder.read_u8().map_err(|err| err.to_string())?;
    if present == 0 {
        return Ok(None);
    }
    let raw = decoder
        .read_fixed::<16>()
        .map_err(|err| err.to_string())?;
    FileLocation::decode(&raw).ok_or_else(|| "invalid file location".to_string()).map(Some)
}

pub struct BlockTreeDB<S> {
    store: Arc<S>,
}

impl<S: KeyValueStore> BlockTreeDB<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn put_entry(&self, batch: &mut WriteBatch, hash: &Hash256, entry: &DiskBlockEntry) {
        batch.put(Column::BlockIndex, *hash, entry.encode());
    }

    pub fn read_entry(&self, hash: &Hash256) -> Result<Option<DiskBlockEntry>, StoreError> {
        match self.store.get(Column::BlockIndex, hash)? {
            Some(bytes) => DiskBlockEntry::decode(&bytes)
                .map(Some)
                .map_err(StoreError::Backend),
            None => Ok(None),
        }
    }

    pub fn read_all_entries(&self) -> Result<Vec<(Hash256, DiskBlockEntry)>, StoreError> {
        let raw = self.store.scan_prefix(Column::BlockIndex, &[])?;
        let mut out = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            if key.len() != 32 {
                return Err(StoreError::Backend(
                    "invalid block index key length".to_string(),
                ));
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&key);
            let entry = DiskBlockEntry::decode(&value).map_err(StoreError::Backend)?;
            out.push((hash, entry));
        }
        Ok(out)
    }

    pub fn put_file_info(&self, batch: &mut WriteBatch, file_id: u32, info: &BlockFileInfo) {
        batch.put(Column::FileInfo, file_info_key(file_id), info.encode());
    }

    pub fn read_file_infos(&self) -> Result<Vec<(u32, BlockFileInfo)>, StoreError> {
        let raw = self.store.scan_prefix(Column::FileInfo, &[])?;
        let mut out = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let file_id = parse_file_info_key(&key)
                .ok_or_else(|| StoreError::Backend("invalid file info key".to_string()))?;
            let info = BlockFileInfo::decode(&value)
                .ok_or_else(|| StoreError::Backend("invalid file info record".to_string()))?;
            out.push((file_id, info));
        }
        out.sort_by_key(|(file_id, _)| *file_id);
        Ok(out)
    }

    pub fn set_last_block_file(&self, batch: &mut WriteBatch, file_id: u32) {
        batch.put(Column::Meta, META_LAST_BLOCK_FILE_KEY, file_id.to_le_bytes());
    }

    pub fn last_block_file(&self) -> Result<Option<u32>, StoreError> {
        match self.store.get(Column::Meta, META_LAST_BLOCK_FILE_KEY)? {
            Some(bytes) if bytes.len() == 4 => {
                Ok(Some(u32::from_le_bytes(bytes.try_into().expect("len 4"))))
            }
            Some(_) => Err(StoreError::Backend(
                "invalid last block file record".to_string(),
            )),
            None => Ok(None),
        }
    }

    pub fn set_reindexing(&self, batch: &mut WriteBatch, reindexing: bool) {
        if reindexing {
            batch.put(Column::Meta, META_REINDEXING_KEY, [1u8]);
        } else {
            batch.delete(Column::Meta, META_REINDEXING_KEY);
        }
    }

    pub fn reindexing(&self) -> Result<bool, StoreError> {
        Ok(self.store.get(Column::Meta, META_REINDEXING_KEY)?.is_some())
    }

    pub fn set_flag(&self, batch: &mut WriteBatch, name: &str, value: bool) {
        batch.put(
            Column::Flags,
            name.as_bytes(),
            [if value { 1u8 } else { 0u8 }],
        );
    }

    pub fn flag(&self, name: &str) -> Result<bool, StoreError> {
        Ok(matches!(
            self.store.get(Column::Flags, name.as_bytes())?.as_deref(),
            Some([1])
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartd_storage::memory::MemoryStore;

    fn sample_entry() -> DiskBlockEntry {
        DiskBlockEntry {
            prev_hash: [1u8; 32],
            height: 42,
            status: 0b11,
            validity: BlockValidity::Scripts as u8,
            tx_count: 7,
            chain_tx: 310,
            data_pos: Some(FileLocation {
                file_id: 2,
                offset: 4_096,
                len: 1_024,
            }),
            undo_pos: None,
            version: 4,
            merkle_root: [9u8; 32],
            time: 1_600_000_000,
            bits: 0x1d00_ffff,
            nonce: 12_345,
        }
    }

    #[test]
    fn entry_round_trip() {
        let entry = sample_entry();
        let back = DiskBlockEntry::decode(&entry.encode()).expect("decode");
        assert_eq!(back, entry);
        assert_eq!(back.validity(), BlockValidity::Scripts);
    }

    #[test]
    fn store_and_scan() {
        let store = Arc::new(MemoryStore::new());
        let db = BlockTreeDB::new(Arc::clone(&store));
        let mut batch = WriteBatch::new();
        db.put_entry(&mut batch, &[5u8; 32], &sample_entry());
        db.put_file_info(
            &mut batch,
            3,
            &BlockFileInfo {
                blocks: 1,
                size: 100,
                undo_size: 10,
                height_first: 42,
                height_last: 42,
                time_first: 1,
                time_last: 2,
            },
        );
        db.set_last_block_file(&mut batch, 3);
        db.set_flag(&mut batch, FLAG_PRUNED_BLOCK_FILES, true);
        store.write_batch(&batch).expect("commit");

        assert_eq!(db.read_entry(&[5u8; 32]).expect("read"), Some(sample_entry()));
        assert_eq!(db.read_all_entries().expect("scan").len(), 1);
        assert_eq!(db.read_file_infos().expect("scan").len(), 1);
        assert_eq!(db.last_block_file().expect("read"), Some(3));
        assert!(db.flag(FLAG_PRUNED_BLOCK_FILES).expect("read"));
        assert!(!db.flag(FLAG_TX_INDEX).expect("read"));
        assert!(!db.reindexing().expect("read"));
    }
}
