//! Append-only framed blob files for block and undo data.
//!
//! Records are laid out as `magic | size:u32-le | payload`, with undo records
//! followed by a 32-byte checksum over `parent_hash || payload`. Files grow
//! in preallocated chunks and are deleted whole when pruned.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use smartd_consensus::Hash256;
use smartd_primitives::hash::sha256d;

/// Network magic prefixing every stored record.
pub const RECORD_MAGIC: [u8; 4] = [0x5c, 0xa1, 0xab, 0x1e];

pub const BLOCK_FILE_PREFIX: &str = "blk";
pub const UNDO_FILE_PREFIX: &str = "rev";

pub const MAX_BLOCKFILE_SIZE: u64 = 128 * 1024 * 1024;
pub const BLOCKFILE_CHUNK_SIZE: u64 = 16 * 1024 * 1024;
pub const UNDOFILE_CHUNK_SIZE: u64 = 1024 * 1024;

const CHECKSUM_LEN: usize = 32;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FileLocation {
    pub file_id: u32,
    pub offset: u64,
    pub len: u32,
}

impl FileLocation {
    pub fn encode(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.file_id.to_le_bytes());
        out[4..12].copy_from_slice(&self.offset.to_le_bytes());
        out[12..16].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 16 {
            return None;
        }
        let file_id = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let offset = u64::from_le_bytes(bytes[4..12].try_into().ok()?);
        let len = u32::from_le_bytes(bytes[12..16].try_into().ok()?);
        Some(Self {
            file_id,
            offset,
            len,
        })
    }
}

#[derive(Debug)]
pub enum BlobError {
    Io(std::io::Error),
    Truncated,
    BadMagic,
    ChecksumMismatch,
    InvalidLocation,
}

impl std::fmt::Display for BlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobError::Io(err) => write!(f, "{err}"),
            BlobError::Truncated => write!(f, "blob record truncated"),
            BlobError::BadMagic => write!(f, "blob record has wrong magic"),
            BlobError::ChecksumMismatch => write!(f, "undo record checksum mismatch"),
            BlobError::InvalidLocation => write!(f, "invalid blob location"),
        }
    }
}

impl std::error::Error for BlobError {}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::UnexpectedEof => BlobError::Truncated,
            _ => BlobError::Io(err),
        }
    }
}

#[derive(Debug)]
struct BlobState {
    current_file: u32,
    current_len: u64,
}

pub struct BlobStore {
    dir: PathBuf,
    prefix: &'static str,
    max_file_size: u64,
    chunk_size: u64,
    state: Mutex<BlobState>,
}

impl BlobStore {
    pub fn open(
        dir: impl Into<PathBuf>,
        prefix: &'static str,
        max_file_size: u64,
        chunk_size: u64,
    ) -> Result<Self, BlobError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            prefix,
            max_file_size,
            chunk_size,
            state: Mutex::new(BlobState {
                current_file: 0,
                current_len: 0,
            }),
        })
    }

    /// Position the append cursor; physical file sizes include preallocated
    /// slack, so the logical length is restored from the file-info records.
    pub fn resume(&self, file_id: u32, logical_len: u64) {
        let mut state = self.state.lock().expect("blob store lock");
        state.current_file = file_id;
        state.current_len = logical_len;
    }

    pub fn current_position(&self) -> (u32, u64) {
        let state = self.state.lock().expect("blob store lock");
        (state.current_file, state.current_len)
    }

    pub fn append(&self, payload: &[u8]) -> Result<FileLocation, BlobError> {
        self.append_record(payload, None)
    }

    /// Append an undo payload with a trailing `sha256d(key || payload)`
    /// checksum. The returned location covers the payload only.
    pub fn append_checked(&self, payload: &[u8], key: &Hash256) -> Result<FileLocation, BlobError> {
        self.append_record(payload, Some(key))
    }

    fn append_record(
        &self,
        payload: &[u8],
        checksum_key: Option<&Hash256>,
    ) -> Result<FileLocation, BlobError> {
        let mut state = self.state.lock().expect("blob store lock");
        let trailer = if checksum_key.is_some() {
            CHECKSUM_LEN as u64
        } else {
            0
        };
        let needed = 8 + payload.len() as u64 + trailer;
        if state.current_len + needed > self.max_file_size && state.current_len > 0 {
            state.current_file += 1;
            state.current_len = 0;
        }
        let offset = state.current_len;
        let path = self.file_path(state.current_file);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(&path)?;
        self.preallocate(&file, offset + needed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&RECORD_MAGIC)?;
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(payload)?;
        if let Some(key) = checksum_key {
            file.write_all(&record_checksum(key, payload))?;
        }
        file.flush()?;
        state.current_len += needed;
        Ok(FileLocation {
            file_id: state.current_file,
            offset,
            len: payload.len() as u32,
        })
    }

    /// Append an undo record at an explicit position, pairing it with the
    /// block file of the data it reverts. The caller tracks per-file logical
    /// lengths through the file-info records.
    pub fn append_checked_at(
        &self,
        file_id: u32,
        offset: u64,
        payload: &[u8],
        key: &Hash256,
    ) -> Result<FileLocation, BlobError> {
        let path = self.file_path(file_id);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(&path)?;
        let needed = offset + 8 + payload.len() as u64 + CHECKSUM_LEN as u64;
        self.preallocate(&file, needed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&RECORD_MAGIC)?;
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(payload)?;
        file.write_all(&record_checksum(key, payload))?;
        file.flush()?;
        Ok(FileLocation {
            file_id,
            offset,
            len: payload.len() as u32,
        })
    }

    pub fn read(&self, location: FileLocation) -> Result<Vec<u8>, BlobError> {
        let (payload, _) = self.read_record(location, false)?;
        Ok(payload)
    }

    pub fn read_checked(
        &self,
        location: FileLocation,
        key: &Hash256,
    ) -> Result<Vec<u8>, BlobError> {
        let (payload, checksum) = self.read_record(location, true)?;
        let checksum = checksum.ok_or(BlobError::Truncated)?;
        if checksum != record_checksum(key, &payload) {
            return Err(BlobError::ChecksumMismatch);
        }
        Ok(payload)
    }

    fn read_record(
        &self,
        location: FileLocation,
        with_checksum: bool,
    ) -> Result<(Vec<u8>, Option<[u8; CHECKSUM_LEN]>), BlobError> {
        if location.len == 0 {
            return Err(BlobError::InvalidLocation);
        }
        let path = self.file_path(location.file_id);
        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(location.offset))?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if magic != RECORD_MAGIC {
            return Err(BlobError::BadMagic);
        }
        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        let stored_len = u32::from_le_bytes(len_bytes);
        if stored_len != location.len {
            return Err(BlobError::Truncated);
        }
        let mut payload = vec![0u8; stored_len as usize];
        file.read_exact(&mut payload)?;
        let checksum = if with_checksum {
            let mut checksum = [0u8; CHECKSUM_LEN];
            file.read_exact(&mut checksum)?;
            Some(checksum)
        } else {
            None
        };
        Ok((payload, checksum))
    }

    pub fn delete_file(&self, file_id: u32) -> Result<(), BlobError> {
        let path = self.file_path(file_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    pub fn file_exists(&self, file_id: u32) -> bool {
        self.file_path(file_id).exists()
    }

    fn preallocate(&self, file: &File, needed: u64) -> Result<(), BlobError> {
        if self.chunk_size == 0 {
            return Ok(());
        }
        let allocated = file.metadata()?.len();
        if allocated >= needed {
            return Ok(());
        }
        let chunks = needed.div_ceil(self.chunk_size);
        let target = (chunks * self.chunk_size).min(self.max_file_size.max(needed));
        file.set_len(target.max(needed))?;
        Ok(())
    }

    fn file_path(&self, file_id: u32) -> PathBuf {
        file_name(&self.dir, self.prefix, file_id)
    }
}

pub fn file_name(dir: &Path, prefix: &str, file_id: u32) -> PathBuf {
    dir.join(format!("{prefix}{file_id:05}.dat"))
}

fn record_checksum(key: &Hash256, payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut data = Vec::with_capacity(32 + payload.len());
    data.extend_from_slice(key);
    data.extend_from_slice(payload);
    sha256d(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BlobStore::open(dir.path(), BLOCK_FILE_PREFIX, 1 << 20, 4096).expect("open");
        let a = store.append(b"first").expect("append");
        let b = store.append(b"second record").expect("append");
        assert_eq!(store.read(a).expect("read"), b"first");
        assert_eq!(store.read(b).expect("read"), b"second record");
        assert_eq!(a.file_id, b.file_id);
        assert!(b.offset > a.offset);
    }

    #[test]
    fn rolls_to_next_file_when_full() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BlobStore::open(dir.path(), BLOCK_FILE_PREFIX, 64, 0).expect("open");
        let a = store.append(&[1u8; 30]).expect("append");
        let b = store.append(&[2u8; 30]).expect("append");
        assert_eq!(a.file_id, 0);
        assert_eq!(b.file_id, 1);
        assert_eq!(store.read(b).expect("read"), vec![2u8; 30]);
    }

    #[test]
    fn bad_magic_is_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BlobStore::open(dir.path(), BLOCK_FILE_PREFIX, 1 << 20, 0).expect("open");
        let loc = store.append(b"payload").expect("append");

        let path = file_name(dir.path(), BLOCK_FILE_PREFIX, 0);
        let mut file = OpenOptions::new().write(true).open(path).expect("open raw");
        file.seek(SeekFrom::Start(loc.offset)).expect("seek");
        file.write_all(&[0u8; 4]).expect("clobber magic");
        drop(file);

        assert!(matches!(store.read(loc), Err(BlobError::BadMagic)));
    }

    #[test]
    fn checksum_detects_flip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BlobStore::open(dir.path(), UNDO_FILE_PREFIX, 1 << 20, 0).expect("open");
        let key = [3u8; 32];
        let loc = store.append_checked(b"undo bytes", &key).expect("append");
        assert_eq!(store.read_checked(loc, &key).expect("read"), b"undo bytes");

        // Flip one payload byte on disk.
        let path = file_name(dir.path(), UNDO_FILE_PREFIX, 0);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .expect("open raw");
        file.seek(SeekFrom::Start(loc.offset + 8)).expect("seek");
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).expect("read byte");
        file.seek(SeekFrom::Start(loc.offset + 8)).expect("seek");
        file.write_all(&[byte[0] ^ 0xff]).expect("write byte");
        drop(file);

        assert!(matches!(
            store.read_checked(loc, &key),
            Err(BlobError::ChecksumMismatch)
        ));
        // The wrong key also fails.
        let relocated = store.append_checked(b"undo bytes", &key).expect("append");
        assert!(matches!(
            store.read_checked(relocated, &[4u8; 32]),
            Err(BlobError::ChecksumMismatch)
        ));
    }

    #[test]
    fn resume_continues_at_logical_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = BlobStore::open(dir.path(), BLOCK_FILE_PREFIX, 1 << 20, 4096).expect("open");
        let a = first.append(b"one").expect("append");
        let (file_id, len) = first.current_position();
        drop(first);

        let second = BlobStore::open(dir.path(), BLOCK_FILE_PREFIX, 1 << 20, 4096).expect("open");
        second.resume(file_id, len);
        let b = second.append(b"two").expect("append");
        assert_eq!(second.read(a).expect("read"), b"one");
        assert_eq!(second.read(b).expect("read"), b"two");
        assert_eq!(b.offset, a.offset + 8 + 3);
    }
}
