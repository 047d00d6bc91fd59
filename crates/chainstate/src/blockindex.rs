//! In-memory header DAG with skip pointers and best-chain bookkeeping.

use std::collections::HashMap;

use primitive_types::U256;
use smartd_consensus::constants::MEDIAN_TIME_SPAN;
use smartd_consensus::Hash256;
use smartd_primitives::block::BlockHeader;

use crate::blobstore::FileLocation;

pub type EntryId = usize;

pub const STATUS_HAVE_DATA: u32 = 1 << 0;
pub const STATUS_HAVE_UNDO: u32 = 1 << 1;
pub const STATUS_FAILED_VALID: u32 = 1 << 5;
pub const STATUS_FAILED_CHILD: u32 = 1 << 6;
pub const STATUS_FAILED_MASK: u32 = STATUS_FAILED_VALID | STATUS_FAILED_CHILD;

/// Monotone validity level of an index entry. Raised as a block moves
/// through the pipeline, never lowered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum BlockValidity {
    Tree = 1,
    Transactions = 2,
    Chain = 3,
    Scripts = 4,
}

impl BlockValidity {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Tree),
            2 => Some(Self::Transactions),
            3 => Some(Self::Chain),
            4 => Some(Self::Scripts),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BlockIndexEntry {
    pub hash: Hash256,
    pub prev: Option<EntryId>,
    pub skip: Option<EntryId>,
    pub height: i32,
    pub version: i32,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub chain_work: U256,
    pub tx_count: u32,
    /// Cumulative transaction count up to and including this block; zero
    /// while any ancestor body is missing.
    pub chain_tx: u64,
    pub validity: BlockValidity,
    pub status: u32,
    pub data_pos: Option<FileLocation>,
    pub undo_pos: Option<FileLocation>,
    /// Body arrival order, used to break chain-work ties. Zero for entries
    /// loaded from disk.
    pub sequence_id: u64,
}

impl BlockIndexEntry {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            version: self.version,
            prev_block: [0u8; 32],
            merkle_root: self.merkle_root,
            time: self.time,
            bits: self.bits,
            nonce: self.nonce,
        }
    }

    pub fn have_data(&self) -> bool {
        (self.status & STATUS_HAVE_DATA) != 0
    }

    pub fn have_undo(&self) -> bool {
        (self.status & STATUS_HAVE_UNDO) != 0
    }

    pub fn failed(&self) -> bool {
        (self.status & STATUS_FAILED_MASK) != 0
    }

    pub fn failed_self(&self) -> bool {
        (self.status & STATUS_FAILED_VALID) != 0
    }

    pub fn is_valid_at(&self, level: BlockValidity) -> bool {
        !self.failed() && self.validity >= level
    }

    /// Raise the validity level; returns whether it changed.
    pub fn raise_validity(&mut self, level: BlockValidity) -> bool {
        if self.validity < level {
            self.validity = level;
            true
        } else {
            false
        }
    }

    /// Serialized size of the stored block body, when known.
    pub fn block_size(&self) -> Option<u32> {
        self.data_pos.map(|pos| pos.len)
    }
}

fn invert_lowest_one(value: i32) -> i32 {
    value & value.saturating_sub(1)
}

/// Height of the skip-pointer target for an entry at `height`; chosen so
/// ancestor walks take O(log n) hops.
pub fn get_skip_height(height: i32) -> i32 {
    if height < 2 {
        0
    } else if (height & 1) != 0 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

/// Candidate ordering key: highest chain work first, then earliest body
/// arrival, then arena id as the final total-order tiebreak.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CandidateKey {
    pub work: U256,
    pub sequence_id: u64,
    pub id: EntryId,
}

impl Ord for CandidateKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .work
            .cmp(&self.work)
            .then_with(|| self.sequence_id.cmp(&other.sequence_id))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for CandidateKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Arena-allocated header DAG. Entries are created on header acceptance and
/// never removed for the lifetime of the process.
#[derive(Default)]
pub struct BlockIndex {
    entries: Vec<BlockIndexEntry>,
    by_hash: HashMap<Hash256, EntryId>,
    next_sequence_id: u64,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_hash: HashMap::new(),
            next_sequence_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: EntryId) -> &BlockIndexEntry {
        &self.entries[id]
    }

    pub fn get_mut(&mut self, id: EntryId) -> &mut BlockIndexEntry {
        &mut self.entries[id]
    }

    pub fn lookup(&self, hash: &Hash256) -> Option<EntryId> {
        self.by_hash.get(hash).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntryId> {
        0..self.entries.len()
    }

    pub fn next_sequence_id(&mut self) -> u64 {
        let id = self.next_sequence_id;
        self.next_sequence_id += 1;
        id
    }

    /// Insert an already-validated header. The caller supplies the work of
    /// this single block; cumulative work and skip pointers are derived.
    pub fn insert(&mut self, header: &BlockHeader, prev: Option<EntryId>, work: U256) -> EntryId {
        let hash = header.hash();
        debug_assert!(!self.by_hash.contains_key(&hash));
        let (height, chain_work) = match prev {
            Some(prev_id) => {
                let prev_entry = &self.entries[prev_id];
                (prev_entry.height + 1, prev_entry.chain_work + work)
            }
            None => (0, work),
        };
        let skip = prev.and_then(|prev_id| self.ancestor(prev_id, get_skip_height(height)));
        let id = self.entries.len();
        self.entries.push(BlockIndexEntry {
            hash,
            prev,
            skip,
            height,
            version: header.version,
            merkle_root: header.merkle_root,
            time: header.time,
            bits: header.bits,
            nonce: header.nonce,
            chain_work,
            tx_count: 0,
            chain_tx: 0,
            validity: BlockValidity::Tree,
            status: 0,
            data_pos: None,
            undo_pos: None,
            sequence_id: 0,
        });
        self.by_hash.insert(hash, id);
        id
    }

    /// Re-attach an entry loaded from disk. Entries must arrive sorted by
    /// height so parents resolve.
    pub fn restore(&mut self, entry: BlockIndexEntry) -> EntryId {
        let id = self.entries.len();
        self.by_hash.insert(entry.hash, id);
        self.entries.push(entry);
        id
    }

    /// Ancestor of `id` at `height`, following skip pointers.
    pub fn ancestor(&self, id: EntryId, height: i32) -> Option<EntryId> {
        let mut current = id;
        let mut current_height = self.entries[current].height;
        if height > current_height || height < 0 {
            return None;
        }
        while current_height > height {
            let entry = &self.entries[current];
            let skip_height = get_skip_height(current_height);
            current = match entry.skip {
                Some(skip) if skip_height >= height => skip,
                _ => entry.prev?,
            };
            current_height = self.entries[current].height;
        }
        Some(current)
    }

    /// Highest common ancestor of two entries.
    pub fn find_fork(&self, a: EntryId, b: EntryId) -> Option<EntryId> {
        let height = self.entries[a].height.min(self.entries[b].height);
        let mut a = self.ancestor(a, height)?;
        let mut b = self.ancestor(b, height)?;
        while a != b {
            a = self.entries[a].prev?;
            b = self.entries[b].prev?;
        }
        Some(a)
    }

    /// Whether `ancestor` lies on the path from `id` to genesis.
    pub fn is_ancestor_of(&self, ancestor: EntryId, id: EntryId) -> bool {
        self.ancestor(id, self.entries[ancestor].height) == Some(ancestor)
    }

    /// Median of the last eleven block times ending at `id`.
    pub fn median_time_past(&self, id: EntryId) -> i64 {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut current = Some(id);
        while let Some(entry_id) = current {
            if times.len() == MEDIAN_TIME_SPAN {
                break;
            }
            let entry = &self.entries[entry_id];
            times.push(i64::from(entry.time));
            current = entry.prev;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }
}

/// The active chain: a dense array of entry ids indexed by height.
#[derive(Default)]
pub struct Chain {
    entries: Vec<EntryId>,
}

impl Chain {
    pub fn tip(&self) -> Option<EntryId> {
        self.entries.last().copied()
    }

    pub fn height(&self) -> i32 {
        self.entries.len() as i32 - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn at(&self, height: i32) -> Option<EntryId> {
        if height < 0 {
            return None;
        }
        self.entries.get(height as usize).copied()
    }

    pub fn contains(&self, index: &BlockIndex, id: EntryId) -> bool {
        self.at(index.get(id).height) == Some(id)
    }

    /// Point the chain at a new tip, rewriting the divergent suffix.
    pub fn set_tip(&mut self, index: &BlockIndex, tip: Option<EntryId>) {
        let Some(tip) = tip else {
            self.entries.clear();
            return;
        };
        let height = index.get(tip).height;
        self.entries.resize(height as usize + 1, tip);
        let mut current = Some(tip);
        while let Some(id) = current {
            let entry = index.get(id);
            if self.entries[entry.height as usize] == id && entry.height < height {
                break;
            }
            self.entries[entry.height as usize] = id;
            current = entry.prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header(prev: Hash256, nonce: u32) -> BlockHeader {
        BlockHeader {
            version: 4,
            prev_block: prev,
            merkle_root: [0u8; 32],
            time: 1_000 + nonce,
            bits: 0x207f_ffff,
            nonce,
        }
    }

    fn build_chain(index: &mut BlockIndex, length: u32) -> Vec<EntryId> {
        let mut ids = Vec::new();
        let mut prev_hash = [0u8; 32];
        let mut prev_id = None;
        for nonce in 0..length {
            let header = build_header(prev_hash, nonce);
            prev_hash = header.hash();
            let id = index.insert(&header, prev_id, U256::from(2u64));
            prev_id = Some(id);
            ids.push(id);
        }
        ids
    }

    #[test]
    fn skip_heights_stay_below() {
        for height in 2..10_000 {
            let skip = get_skip_height(height);
            assert!(skip < height);
            assert!(skip >= 0);
        }
        assert_eq!(get_skip_height(0), 0);
        assert_eq!(get_skip_height(1), 0);
    }

    #[test]
    fn ancestor_walks_match_linear_walk() {
        let mut index = BlockIndex::new();
        let ids = build_chain(&mut index, 300);
        for (height, id) in ids.iter().enumerate() {
            assert_eq!(index.get(*id).height, height as i32);
        }
        assert_eq!(index.ancestor(ids[299], 0), Some(ids[0]));
        assert_eq!(index.ancestor(ids[299], 157), Some(ids[157]));
        assert_eq!(index.ancestor(ids[37], 37), Some(ids[37]));
        assert_eq!(index.ancestor(ids[10], 11), None);
    }

    #[test]
    fn fork_point_of_branches() {
        let mut index = BlockIndex::new();
        let trunk = build_chain(&mut index, 50);

        // Branch off at height 30.
        let mut prev_id = trunk[30];
        let mut prev_hash = index.get(prev_id).hash;
        let mut branch = Vec::new();
        for nonce in 1000..1010 {
            let header = build_header(prev_hash, nonce);
            prev_hash = header.hash();
            prev_id = index.insert(&header, Some(prev_id), U256::from(2u64));
            branch.push(prev_id);
        }

        let fork = index.find_fork(trunk[49], branch[9]).expect("fork");
        assert_eq!(fork, trunk[30]);
        // Fork of two on-chain entries is the lower one.
        assert_eq!(index.find_fork(trunk[10], trunk[45]), Some(trunk[10]));
        assert!(index.is_ancestor_of(trunk[30], branch[9]));
        assert!(!index.is_ancestor_of(trunk[31], branch[9]));
    }

    #[test]
    fn chain_work_accumulates() {
        let mut index = BlockIndex::new();
        let ids = build_chain(&mut index, 10);
        for (height, id) in ids.iter().enumerate() {
            assert_eq!(
                index.get(*id).chain_work,
                U256::from(2u64) * U256::from(height as u64 + 1)
            );
        }
    }

    #[test]
    fn median_time_past_is_median_of_eleven() {
        let mut index = BlockIndex::new();
        let ids = build_chain(&mut index, 30);
        // Times are 1000..1029; window for tip is 1019..=1029, median 1024.
        assert_eq!(index.median_time_past(ids[29]), 1_024);
        // Short chain uses what exists: times 1000..=1002, median 1001.
        assert_eq!(index.median_time_past(ids[2]), 1_001);
    }

    #[test]
    fn chain_set_tip_switches_branches() {
        let mut index = BlockIndex::new();
        let trunk = build_chain(&mut index, 20);
        let mut chain = Chain::default();
        chain.set_tip(&index, Some(trunk[19]));
        assert_eq!(chain.height(), 19);
        assert_eq!(chain.at(7), Some(trunk[7]));

        let mut prev_id = trunk[10];
        let mut prev_hash = index.get(prev_id).hash;
        let mut branch = Vec::new();
        for nonce in 500..515 {
            let header = build_header(prev_hash, nonce);
            prev_hash = header.hash();
            prev_id = index.insert(&header, Some(prev_id), U256::from(2u64));
            branch.push(prev_id);
        }
        chain.set_tip(&index, Some(branch[14]));
        assert_eq!(chain.height(), 25);
        assert_eq!(chain.at(10), Some(trunk[10]));
        assert_eq!(chain.at(11), Some(branch[0]));
        assert!(!chain.contains(&index, trunk[11]));
    }

    #[test]
    fn candidate_ordering_prefers_work_then_arrival() {
        let most_work = CandidateKey {
            work: U256::from(10u64),
            sequence_id: 9,
            id: 3,
        };
        let earlier = CandidateKey {
            work: U256::from(5u64),
            sequence_id: 1,
            id: 4,
        };
        let later = CandidateKey {
            work: U256::from(5u64),
            sequence_id: 2,
            id: 1,
        };
        let mut set = std::collections::BTreeSet::new();
        set.insert(later);
        set.insert(earlier);
        set.insert(most_work);
        let order: Vec<EntryId> = set.iter().map(|key| key.id).collect();
        assert_eq!(order, vec![3, 4, 1]);
    }
}
