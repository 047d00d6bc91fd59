//! Layered write-back coin cache with spend journaling support.
//!
//! Cache entries carry two flags. `DIRTY` marks divergence from the backing
//! store; `FRESH` marks a coin the backing store has never seen, which lets
//! a later spend drop the entry instead of writing a tombstone.

use std::collections::HashMap;

use smartd_consensus::Hash256;
use smartd_primitives::encoding::{DecodeError, Decoder, Encoder};
use smartd_primitives::outpoint::OutPoint;
use smartd_primitives::transaction::Transaction;
use smartd_storage::StoreError;

/// Probe bound when reconstructing coin metadata from a sibling output.
const MAX_OUTPUTS_PER_TX: u32 = 16_384;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Coin {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    pub height: u32,
    pub is_coinbase: bool,
}

impl Coin {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(16 + self.script_pubkey.len());
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.write_u32_le(self.height);
        encoder.write_u8(if self.is_coinbase { 1 } else { 0 });
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        let height = decoder.read_u32_le()?;
        let is_coinbase = decoder.read_u8()? != 0;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            value,
            script_pubkey,
            height,
            is_coinbase,
        })
    }

    fn memory_usage(&self) -> usize {
        32 + self.script_pubkey.len()
    }
}

/// Read access to a coin database layer.
pub trait CoinsView {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError>;
    fn best_block(&self) -> Result<Option<Hash256>, StoreError>;
}

const FLAG_FRESH: u8 = 1 << 0;
const FLAG_DIRTY: u8 = 1 << 1;

#[derive(Clone, Debug)]
struct CacheEntry {
    /// `None` is a spent slot; unflagged it is a negative cache entry.
    coin: Option<Coin>,
    flags: u8,
}

impl CacheEntry {
    fn fresh(&self) -> bool {
        (self.flags & FLAG_FRESH) != 0
    }

    fn dirty(&self) -> bool {
        (self.flags & FLAG_DIRTY) != 0
    }
}

#[derive(Debug)]
pub enum CoinsError {
    Overwrite,
    Store(StoreError),
}

impl std::fmt::Display for CoinsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoinsError::Overwrite => write!(f, "attempted overwrite of unspent coin"),
            CoinsError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CoinsError {}

impl From<StoreError> for CoinsError {
    fn from(err: StoreError) -> Self {
        CoinsError::Store(err)
    }
}

#[derive(Default)]
pub struct CoinsCache {
    entries: HashMap<OutPoint, CacheEntry>,
    best_block: Option<Hash256>,
    cached_bytes: usize,
}

impl CoinsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.cached_bytes + self.entries.len() * 64
    }

    pub fn best_block_hint(&self) -> Option<Hash256> {
        self.best_block
    }

    pub fn set_best_block(&mut self, hash: Hash256) {
        self.best_block = Some(hash);
    }

    /// Fetch a coin, filling the cache from `base` on a miss. A backing-store
    /// miss is cached as spent.
    pub fn access(
        &mut self,
        base: &dyn CoinsView,
        outpoint: &OutPoint,
    ) -> Result<Option<&Coin>, StoreError> {
        if !self.entries.contains_key(outpoint) {
            let coin = base.coin(outpoint)?;
            if let Some(coin) = &coin {
                self.cached_bytes += coin.memory_usage();
            }
            self.entries
                .insert(*outpoint, CacheEntry { coin, flags: 0 });
        }
        Ok(self
            .entries
            .get(outpoint)
            .and_then(|entry| entry.coin.as_ref()))
    }

    pub fn have_coin(
        &mut self,
        base: &dyn CoinsView,
        outpoint: &OutPoint,
    ) -> Result<bool, StoreError> {
        Ok(self.access(base, outpoint)?.is_some())
    }

    /// Look up any still-unspent output of `txid`, probing output indexes in
    /// order. Used to restore spent-coin metadata during disconnect.
    pub fn access_by_txid(
        &mut self,
        base: &dyn CoinsView,
        txid: &Hash256,
    ) -> Result<Option<Coin>, StoreError> {
        for vout in 0..MAX_OUTPUTS_PER_TX {
            let outpoint = OutPoint::new(*txid, vout);
            if let Some(coin) = self.access(base, &outpoint)? {
                return Ok(Some(coin.clone()));
            }
        }
        Ok(None)
    }

    pub fn add_coin(
        &mut self,
        outpoint: OutPoint,
        coin: Coin,
        possible_overwrite: bool,
    ) -> Result<(), CoinsError> {
        let mut fresh = false;
        let entry = self
            .entries
            .entry(outpoint)
            .or_insert(CacheEntry { coin: None, flags: 0 });
        if let Some(existing) = &entry.coin {
            if !possible_overwrite {
                return Err(CoinsError::Overwrite);
            }
            self.cached_bytes = self.cached_bytes.saturating_sub(existing.memory_usage());
        } else if !possible_overwrite {
            // A spent or absent slot that is not dirty has no on-disk
            // instance, so the new coin never needs a delete on spend.
            fresh = !entry.dirty();
        }
        self.cached_bytes += coin.memory_usage();
        entry.coin = Some(coin);
        entry.flags |= FLAG_DIRTY | if fresh { FLAG_FRESH } else { 0 };
        Ok(())
    }

    /// Add every output of `tx` as a new coin.
    pub fn add_tx_outputs(
        &mut self,
        tx: &Transaction,
        txid: &Hash256,
        height: u32,
        possible_overwrite: bool,
    ) -> Result<(), CoinsError> {
        let is_coinbase = tx.is_coinbase();
        for (vout, output) in tx.vout.iter().enumerate() {
            self.add_coin(
                OutPoint::new(*txid, vout as u32),
                Coin {
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                    height,
                    is_coinbase,
                },
                possible_overwrite,
            )?;
        }
        Ok(())
    }

    /// Spend a coin and return it. `Ok(None)` when the slot is already spent
    /// or unknown.
    pub fn spend_coin(
        &mut self,
        base: &dyn CoinsView,
        outpoint: &OutPoint,
    ) -> Result<Option<Coin>, StoreError> {
        self.access(base, outpoint)?;
        let Some(entry) = self.entries.get_mut(outpoint) else {
            return Ok(None);
        };
        let Some(coin) = entry.coin.take() else {
            return Ok(None);
        };
        self.cached_bytes = self.cached_bytes.saturating_sub(coin.memory_usage());
        if entry.fresh() {
            self.entries.remove(outpoint);
        } else {
            entry.flags |= FLAG_DIRTY;
        }
        Ok(Some(coin))
    }

    /// Merge this (child) cache into `parent`, preserving flag semantics.
    /// The child is drained.
    pub fn flush_into(&mut self, parent: &mut CoinsCache) -> Result<(), CoinsError> {
        for (outpoint, entry) in self.entries.drain() {
            if !entry.dirty() {
                continue;
            }
            match parent.entries.get_mut(&outpoint) {
                None => {
                    if entry.fresh() && entry.coin.is_none() {
                        continue;
                    }
                    if let Some(coin) = &entry.coin {
                        parent.cached_bytes += coin.memory_usage();
                    }
                    parent.entries.insert(outpoint, entry);
                }
                Some(existing) => {
                    if entry.fresh() && existing.coin.is_some() {
                        return Err(CoinsError::Overwrite);
                    }
                    if let Some(old) = &existing.coin {
                        parent.cached_bytes =
                            parent.cached_bytes.saturating_sub(old.memory_usage());
                    }
                    if existing.fresh() && entry.coin.is_none() {
                        parent.entries.remove(&outpoint);
                        continue;
                    }
                    if let Some(coin) = &entry.coin {
                        parent.cached_bytes += coin.memory_usage();
                    }
                    existing.coin = entry.coin;
                    existing.flags |= FLAG_DIRTY;
                }
            }
        }
        if let Some(best) = self.best_block.take() {
            parent.best_block = Some(best);
        }
        self.cached_bytes = 0;
        Ok(())
    }

    /// Drain dirty entries into the writer callback (`None` coin means a
    /// delete) and clear the cache. The returned best-block pointer must ride
    /// in the same batch as the coin writes.
    pub fn drain_dirty(
        &mut self,
        mut apply: impl FnMut(&OutPoint, Option<&Coin>),
    ) -> Option<Hash256> {
        for (outpoint, entry) in self.entries.drain() {
            if !entry.dirty() {
                continue;
            }
            match &entry.coin {
                Some(coin) => apply(&outpoint, Some(coin)),
                None => {
                    if !entry.fresh() {
                        apply(&outpoint, None);
                    }
                }
            }
        }
        self.cached_bytes = 0;
        self.best_block
    }

    /// Drop clean entries to relieve memory pressure; dirty ones stay.
    pub fn trim(&mut self) {
        let mut freed = 0usize;
        self.entries.retain(|_, entry| {
            if entry.dirty() {
                true
            } else {
                if let Some(coin) = &entry.coin {
                    freed += coin.memory_usage();
                }
                false
            }
        });
        self.cached_bytes = self.cached_bytes.saturating_sub(freed);
    }

    pub fn has_dirty_entries(&self) -> bool {
        self.entries.values().any(CacheEntry::dirty)
    }
}

/// Read-through view pairing a backing view with an overlay cache, used to
/// give per-block child caches and the mempool a consistent picture.
pub struct LayeredView<'a> {
    pub base: &'a dyn CoinsView,
    pub overlay: &'a CoinsCache,
}

impl CoinsView for LayeredView<'_> {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        if let Some(entry) = self.overlay.entries.get(outpoint) {
            return Ok(entry.coin.clone());
        }
        self.base.coin(outpoint)
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        if self.overlay.best_block.is_some() {
            return Ok(self.overlay.best_block);
        }
        self.base.best_block()
    }
}

/// A view over nothing, for tests and freshly created databases.
pub struct EmptyView;

impl CoinsView for EmptyView {
    fn coin(&self, _outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        Ok(None)
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        Ok(None)
    }
}
