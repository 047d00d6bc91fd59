//! The validation engine: header/block acceptance, connect/disconnect, and
//! best-chain activation over the in-memory index and the coin cache.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use primitive_types::U256;
use smartd_consensus::constants::{
    max_block_sigops, COINBASE_MATURITY, LOCKTIME_MEDIAN_TIME_PAST, LOCKTIME_VERIFY_SEQUENCE,
    MAX_FUTURE_BLOCK_TIME, NUM_BLOCKS_FOR_MEDIAN_BLOCK,
};
use smartd_consensus::money::MAX_MONEY;
use smartd_consensus::params::ConsensusParams;
use smartd_consensus::rewards::block_subsidy;
use smartd_consensus::softfork::Deployment;
use smartd_consensus::Hash256;
use smartd_pow::difficulty::{block_proof, next_work_required};
use smartd_pow::validation::check_proof_of_work;
use smartd_primitives::block::{Block, BlockHeader};
use smartd_primitives::outpoint::OutPoint;
use smartd_primitives::transaction::Transaction;
use smartd_script::sigops::{legacy_sigops, p2sh_sigops};
use smartd_script::{
    ScriptCheck, ScriptVerifier, MANDATORY_SCRIPT_VERIFY_FLAGS, VERIFY_CHECKLOCKTIMEVERIFY,
    VERIFY_CHECKSEQUENCEVERIFY, VERIFY_DERSIG, VERIFY_P2SH,
};
use smartd_storage::{KeyValueStore, StoreError, WriteBatch};

use crate::blobstore::{
    BlobError, BlobStore, BLOCKFILE_CHUNK_SIZE, BLOCK_FILE_PREFIX, MAX_BLOCKFILE_SIZE,
    UNDOFILE_CHUNK_SIZE, UNDO_FILE_PREFIX,
};
use crate::blockindex::{
    BlockIndex, BlockValidity, CandidateKey, Chain, EntryId, STATUS_FAILED_CHILD,
    STATUS_FAILED_VALID, STATUS_HAVE_DATA, STATUS_HAVE_UNDO,
};
use crate::coins::{CoinsCache, CoinsError, LayeredView};
use crate::events::{ChainEvent, EventHub};
use crate::filemeta::BlockFileInfo;
use crate::locks::{calculate_sequence_locks, evaluate_sequence_locks};
use crate::treedb::{BlockTreeDB, DiskBlockEntry, FLAG_PRUNED_BLOCK_FILES};
use crate::undo::{BlockUndo, SpentCoin};
use crate::utxodb::UtxoStore;
use crate::validation::{
    adaptive_max_block_size, check_block, contextual_check_block, ValidationError,
};
use crate::versionbits::{deployment_active, is_super_majority, VersionBitsCache};

/// Fork-proximity thresholds for the large-work fork warning.
const FORK_WARNING_DEPTH: i32 = 72;
const FORK_WARNING_PROOFS: u64 = 7;

/// Blocks connected per activation step before the best leaf is re-selected.
const CONNECT_BATCH: usize = 32;

#[derive(Debug)]
pub enum ChainError {
    Consensus(ValidationError),
    Policy(&'static str),
    MissingParent,
    Corruption(&'static str),
    Store(StoreError),
    Blob(BlobError),
    Interrupted,
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Consensus(err) => write!(f, "{err}"),
            ChainError::Policy(message) => write!(f, "{message}"),
            ChainError::MissingParent => write!(f, "missing parent"),
            ChainError::Corruption(message) => write!(f, "corruption: {message}"),
            ChainError::Store(err) => write!(f, "{err}"),
            ChainError::Blob(err) => write!(f, "{err}"),
            ChainError::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<ValidationError> for ChainError {
    fn from(err: ValidationError) -> Self {
        ChainError::Consensus(err)
    }
}

impl From<StoreError> for ChainError {
    fn from(err: StoreError) -> Self {
        ChainError::Store(err)
    }
}

impl From<BlobError> for ChainError {
    fn from(err: BlobError) -> Self {
        ChainError::Blob(err)
    }
}

impl From<CoinsError> for ChainError {
    fn from(err: CoinsError) -> Self {
        match err {
            CoinsError::Overwrite => ChainError::Corruption("unexpected coin overwrite"),
            CoinsError::Store(err) => ChainError::Store(err),
        }
    }
}

impl ChainError {
    pub fn is_consensus(&self) -> bool {
        matches!(self, ChainError::Consensus(_))
    }
}

/// Validation hook for domain-specific coinbase payees (smartnode shares,
/// hive addresses). The default accepts everything.
pub trait PayoutHooks: Send + Sync {
    fn check_block_rewards(
        &self,
        block: &Block,
        height: i32,
        fees: i64,
    ) -> Result<(), &'static str>;
}

struct AcceptAllPayouts;

impl PayoutHooks for AcceptAllPayouts {
    fn check_block_rewards(
        &self,
        _block: &Block,
        _height: i32,
        _fees: i64,
    ) -> Result<(), &'static str> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ChainStateOptions {
    pub max_block_file_size: u64,
    pub block_file_chunk: u64,
    pub undo_file_chunk: u64,
    /// Coin-cache memory threshold that forces a flush.
    pub coins_cache_bytes: usize,
    /// Script pool width; zero selects cores minus one.
    pub script_workers: usize,
    /// Recent-block window that pruning always keeps on disk.
    pub prune_keep_recent: i32,
    pub prune: bool,
    pub check_pow: bool,
}

impl Default for ChainStateOptions {
    fn default() -> Self {
        Self {
            max_block_file_size: MAX_BLOCKFILE_SIZE,
            block_file_chunk: BLOCKFILE_CHUNK_SIZE,
            undo_file_chunk: UNDOFILE_CHUNK_SIZE,
            coins_cache_bytes: 256 * 1024 * 1024,
            script_workers: 0,
            prune_keep_recent: 288,
            prune: false,
            check_pow: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderOutcome {
    pub id: EntryId,
    pub already_known: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockOutcome {
    pub id: EntryId,
    pub already_had_data: bool,
}

/// Result of a best-chain activation round, handed to the mempool layer for
/// reconciliation.
#[derive(Default, Debug)]
pub struct ChainUpdate {
    pub connected: Vec<Block>,
    pub disconnected: Vec<Transaction>,
    pub interrupted: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DisconnectStatus {
    Clean,
    Unclean,
}

pub struct ChainState<S> {
    params: ConsensusParams,
    options: ChainStateOptions,
    store: Arc<S>,
    tree: BlockTreeDB<S>,
    utxo: UtxoStore<S>,
    coins: CoinsCache,
    blocks: BlobStore,
    undo_files: BlobStore,
    index: BlockIndex,
    chain: Chain,
    candidates: BTreeSet<CandidateKey>,
    /// Children whose bodies arrived before an ancestor body.
    unlinked: HashMap<EntryId, Vec<EntryId>>,
    dirty_entries: HashSet<EntryId>,
    file_info: Vec<BlockFileInfo>,
    last_block_file: u32,
    best_header: Option<EntryId>,
    versionbits: VersionBitsCache,
    verifier: Arc<dyn ScriptVerifier>,
    payout_hooks: Arc<dyn PayoutHooks>,
    events: EventHub,
    shutdown: Arc<AtomicBool>,
    fork_warning: Option<String>,
}

pub fn current_time_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

impl<S: KeyValueStore> ChainState<S> {
    pub fn open(
        store: Arc<S>,
        blocks_dir: &Path,
        params: ConsensusParams,
        options: ChainStateOptions,
        verifier: Arc<dyn ScriptVerifier>,
    ) -> Result<Self, ChainError> {
        let blocks = BlobStore::open(
            blocks_dir,
            BLOCK_FILE_PREFIX,
            options.max_block_file_size,
            options.block_file_chunk,
        )?;
        let undo_files = BlobStore::open(
            blocks_dir,
            UNDO_FILE_PREFIX,
            options.max_block_file_size,
            options.undo_file_chunk,
        )?;
        let mut state = Self {
            tree: BlockTreeDB::new(Arc::clone(&store)),
            utxo: UtxoStore::new(Arc::clone(&store)),
            store,
            params,
            options,
            coins: CoinsCache::new(),
            blocks,
            undo_files,
            index: BlockIndex::new(),
            chain: Chain::default(),
            candidates: BTreeSet::new(),
            unlinked: HashMap::new(),
            dirty_entries: HashSet::new(),
            file_info: Vec::new(),
            last_block_file: 0,
            best_header: None,
            versionbits: VersionBitsCache::new(),
            verifier,
            payout_hooks: Arc::new(AcceptAllPayouts),
            events: EventHub::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            fork_warning: None,
        };
        state.load()?;
        Ok(state)
    }

    pub fn set_payout_hooks(&mut self, hooks: Arc<dyn PayoutHooks>) {
        self.payout_hooks = hooks;
    }

    pub fn subscribe_events(&mut self) -> crossbeam_channel::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn tip(&self) -> Option<EntryId> {
        self.chain.tip()
    }

    pub fn tip_hash(&self) -> Option<Hash256> {
        self.chain.tip().map(|id| self.index.get(id).hash)
    }

    pub fn tip_height(&self) -> i32 {
        self.chain.height()
    }

    /// Median-time-past of the current tip; zero on an empty chain.
    pub fn tip_mtp(&self) -> i64 {
        self.chain
            .tip()
            .map(|id| self.index.median_time_past(id))
            .unwrap_or(0)
    }

    pub fn fork_warning(&self) -> Option<&str> {
        self.fork_warning.as_deref()
    }

    pub fn is_candidate(&self, id: EntryId) -> bool {
        self.candidates.iter().any(|key| key.id == id)
    }

    pub fn chain_contains_hash(&self, hash: &Hash256) -> bool {
        self.index
            .lookup(hash)
            .map(|id| self.chain.contains(&self.index, id))
            .unwrap_or(false)
    }

    /// Read-through coin view over the persistent store and the engine cache.
    pub fn coins_view(&self) -> LayeredView<'_> {
        LayeredView {
            base: &self.utxo,
            overlay: &self.coins,
        }
    }

    /// Median-time-past of the active-chain block *before* `height`, used as
    /// the anchor for time-based relative locks.
    pub fn prior_mtp(&self, height: i32) -> i64 {
        let anchor = height.saturating_sub(1).max(0);
        self.chain
            .at(anchor)
            .map(|id| self.index.median_time_past(id))
            .unwrap_or(0)
    }

    /// Script-verification flags for a block built on the current tip.
    pub fn next_block_script_flags(&mut self) -> u32 {
        let prev = self.chain.tip();
        let next_time = current_time_secs().max(self.tip_mtp()) as u32;
        let next_version = self
            .best_header
            .map(|id| self.index.get(id).version)
            .unwrap_or(4);
        self.script_flags(prev, next_version, next_time)
    }

    pub fn csv_active_next_block(&mut self) -> bool {
        let prev = self.chain.tip();
        deployment_active(
            &self.index,
            &mut self.versionbits,
            prev,
            &self.params,
            Deployment::Csv,
        )
    }

    /// Lock-evaluation cutoff for a block following the tip.
    pub fn next_block_lock_time_cutoff(&mut self) -> i64 {
        if self.csv_active_next_block() {
            self.tip_mtp()
        } else {
            current_time_secs()
        }
    }

    // ------------------------------------------------------------------
    // Header pipeline
    // ------------------------------------------------------------------

    pub fn accept_header(&mut self, header: &BlockHeader) -> Result<HeaderOutcome, ChainError> {
        let hash = header.hash();
        if let Some(id) = self.index.lookup(&hash) {
            if self.index.get(id).failed() {
                return Err(ChainError::Consensus(ValidationError::InvalidHeader(
                    "duplicate-invalid",
                )));
            }
            return Ok(HeaderOutcome {
                id,
                already_known: true,
            });
        }

        if self.options.check_pow {
            check_proof_of_work(&hash, header.bits, &self.params).map_err(ValidationError::from)?;
        }

        let is_genesis = header.prev_block == [0u8; 32];
        let prev = if is_genesis {
            if hash != self.params.hash_genesis_block {
                return Err(ChainError::Consensus(ValidationError::InvalidHeader(
                    "bad-genesis-block",
                )));
            }
            None
        } else {
            let prev = self
                .index
                .lookup(&header.prev_block)
                .ok_or(ChainError::MissingParent)?;
            if self.index.get(prev).failed() {
                return Err(ChainError::Consensus(ValidationError::InvalidHeader(
                    "bad-prevblk",
                )));
            }
            Some(prev)
        };

        if let Some(prev_id) = prev {
            self.contextual_check_header(header, prev_id)?;
        }

        let work = block_proof(header.bits)
            .map_err(|_| ValidationError::InvalidHeader("bad-diffbits"))?;
        let id = self.index.insert(header, prev, work);
        self.dirty_entries.insert(id);

        let is_best = match self.best_header {
            Some(best) => self.index.get(id).chain_work > self.index.get(best).chain_work,
            None => true,
        };
        if is_best {
            self.best_header = Some(id);
        }

        let height = self.index.get(id).height;
        self.events.emit(ChainEvent::HeaderAccepted { hash, height });
        Ok(HeaderOutcome {
            id,
            already_known: false,
        })
    }

    fn contextual_check_header(
        &mut self,
        header: &BlockHeader,
        prev: EntryId,
    ) -> Result<(), ChainError> {
        let height = self.index.get(prev).height + 1;

        if let Some(checkpoint) = self
            .params
            .checkpoints
            .iter()
            .find(|checkpoint| checkpoint.height == height)
        {
            if checkpoint.hash != header.hash() {
                return Err(ChainError::Consensus(ValidationError::InvalidHeader(
                    "checkpoint-mismatch",
                )));
            }
        }

        let expected = self.expected_bits(prev, i64::from(header.time))?;
        if header.bits != expected {
            smartd_log::log_warn!(
                "unexpected difficulty bits at height {}: expected {:#x}, got {:#x}",
                height,
                expected,
                header.bits
            );
            return Err(ChainError::Consensus(ValidationError::InvalidHeader(
                "bad-diffbits",
            )));
        }

        let mtp = self.index.median_time_past(prev);
        if i64::from(header.time) <= mtp {
            return Err(ChainError::Consensus(ValidationError::InvalidHeader(
                "time-too-old",
            )));
        }
        if i64::from(header.time) > current_time_secs() + MAX_FUTURE_BLOCK_TIME {
            return Err(ChainError::Consensus(ValidationError::InvalidHeader(
                "time-too-new",
            )));
        }

        // Reject versions a super-majority of the network has moved past.
        for gate in [2i32, 3, 4] {
            if header.version < gate
                && is_super_majority(
                    gate,
                    &self.index,
                    Some(prev),
                    self.params.majority_reject_block_outdated,
                    self.params.majority_window,
                )
            {
                return Err(ChainError::Consensus(ValidationError::InvalidHeader(
                    "bad-version",
                )));
            }
        }

        Ok(())
    }

    /// Bits required for a block extending `prev`.
    pub fn expected_bits(&self, prev: EntryId, next_time: i64) -> Result<u32, ChainError> {
        let prev_entry = self.index.get(prev);
        let interval = self.params.difficulty_adjustment_interval() as i32;
        let first_time = if (prev_entry.height + 1) % interval == 0 {
            let first_height = (prev_entry.height - (interval - 1)).max(0);
            let first = self
                .index
                .ancestor(prev, first_height)
                .ok_or(ChainError::Corruption("retarget window below genesis"))?;
            self.index.get(first).time
        } else {
            prev_entry.time
        };
        next_work_required(
            prev_entry.height,
            prev_entry.bits,
            prev_entry.time,
            first_time,
            Some(next_time),
            &self.params,
        )
        .map_err(|_| ChainError::Consensus(ValidationError::InvalidHeader("bad-diffbits")))
    }

    // ------------------------------------------------------------------
    // Block pipeline
    // ------------------------------------------------------------------

    pub fn accept_block(&mut self, block: &Block) -> Result<BlockOutcome, ChainError> {
        let header_outcome = self.accept_header(&block.header)?;
        let id = header_outcome.id;
        if self.index.get(id).have_data() {
            return Ok(BlockOutcome {
                id,
                already_had_data: true,
            });
        }

        if let Err(err) = check_block(block, &self.params, self.options.check_pow) {
            self.mark_failed(id);
            return Err(err.into());
        }

        let (height, prev) = {
            let entry = self.index.get(id);
            (entry.height, entry.prev)
        };
        let lock_cutoff = match prev {
            Some(prev_id) => {
                let csv_active = deployment_active(
                    &self.index,
                    &mut self.versionbits,
                    Some(prev_id),
                    &self.params,
                    Deployment::Csv,
                );
                if csv_active {
                    self.index.median_time_past(prev_id)
                } else {
                    i64::from(block.header.time)
                }
            }
            None => i64::from(block.header.time),
        };
        let size_limit = self.active_size_limit(prev);
        if let Err(err) =
            contextual_check_block(block, height, lock_cutoff, size_limit, &self.params)
        {
            self.mark_failed(id);
            return Err(err.into());
        }

        let encoded = block.consensus_encode();
        let location = self.blocks.append(&encoded)?;
        let file_id = location.file_id as usize;
        if self.file_info.len() <= file_id {
            self.file_info.resize(file_id + 1, BlockFileInfo::default());
        }
        let info = &mut self.file_info[file_id];
        info.add_block(height, block.header.time);
        info.size = location.offset + 8 + u64::from(location.len);
        self.last_block_file = location.file_id;

        let sequence_id = self.index.next_sequence_id();
        {
            let entry = self.index.get_mut(id);
            entry.data_pos = Some(location);
            entry.tx_count = block.transactions.len() as u32;
            entry.sequence_id = sequence_id;
            entry.status |= STATUS_HAVE_DATA;
            entry.raise_validity(BlockValidity::Transactions);
        }
        self.dirty_entries.insert(id);
        self.receive_block_transactions(id);

        Ok(BlockOutcome {
            id,
            already_had_data: false,
        })
    }

    /// Accept a block and immediately try to activate the best chain.
    pub fn process_block(
        &mut self,
        block: &Block,
    ) -> Result<(BlockOutcome, ChainUpdate), ChainError> {
        let outcome = self.accept_block(block)?;
        let update = self.activate_best_chain()?;
        Ok((outcome, update))
    }

    /// Propagate cumulative transaction counts now that this body exists,
    /// unblocking any descendants that arrived first.
    fn receive_block_transactions(&mut self, id: EntryId) {
        let prev = self.index.get(id).prev;
        let prev_ready = match prev {
            Some(prev_id) => self.index.get(prev_id).chain_tx > 0,
            None => true,
        };
        if !prev_ready {
            self.unlinked
                .entry(prev.expect("non-genesis"))
                .or_default()
                .push(id);
            return;
        }

        let mut queue = vec![id];
        while let Some(current) = queue.pop() {
            let prev_chain_tx = match self.index.get(current).prev {
                Some(prev_id) => self.index.get(prev_id).chain_tx,
                None => 0,
            };
            {
                let entry = self.index.get_mut(current);
                entry.chain_tx = prev_chain_tx + u64::from(entry.tx_count);
            }
            self.dirty_entries.insert(current);
            self.insert_candidate(current);
            if let Some(children) = self.unlinked.remove(&current) {
                queue.extend(children);
            }
        }
    }

    fn insert_candidate(&mut self, id: EntryId) {
        let entry = self.index.get(id);
        if entry.failed() || entry.chain_tx == 0 || !entry.have_data() {
            return;
        }
        if entry.validity < BlockValidity::Transactions {
            return;
        }
        self.candidates.insert(CandidateKey {
            work: entry.chain_work,
            sequence_id: entry.sequence_id,
            id,
        });
    }

    fn remove_candidate(&mut self, id: EntryId) {
        let entry = self.index.get(id);
        self.candidates.remove(&CandidateKey {
            work: entry.chain_work,
            sequence_id: entry.sequence_id,
            id,
        });
    }

    /// Active block-size limit for a block extending `prev`.
    fn active_size_limit(&self, prev: Option<EntryId>) -> u32 {
        let fork_active = is_super_majority(
            self.params.size_fork_version,
            &self.index,
            prev,
            self.params.majority_enforce_block_upgrade,
            self.params.majority_window,
        );
        if !fork_active {
            return adaptive_max_block_size(&[], false);
        }
        let mut sizes = Vec::with_capacity(NUM_BLOCKS_FOR_MEDIAN_BLOCK);
        let mut current = prev;
        while let Some(id) = current {
            if sizes.len() == NUM_BLOCKS_FOR_MEDIAN_BLOCK {
                break;
            }
            let entry = self.index.get(id);
            if let Some(size) = entry.block_size() {
                sizes.push(size);
            }
            current = entry.prev;
        }
        adaptive_max_block_size(&sizes, true)
    }

    fn script_flags(&mut self, prev: Option<EntryId>, block_version: i32, block_time: u32) -> u32 {
        let mut flags = 0u32;
        if block_time >= self.params.p2sh_activation_time {
            flags |= VERIFY_P2SH;
        }
        if block_version >= 3
            && is_super_majority(
                3,
                &self.index,
                prev,
                self.params.majority_enforce_block_upgrade,
                self.params.majority_window,
            )
        {
            flags |= VERIFY_DERSIG;
        }
        if block_version >= 4
            && is_super_majority(
                4,
                &self.index,
                prev,
                self.params.majority_enforce_block_upgrade,
                self.params.majority_window,
            )
        {
            flags |= VERIFY_CHECKLOCKTIMEVERIFY;
        }
        if deployment_active(
            &self.index,
            &mut self.versionbits,
            prev,
            &self.params,
            Deployment::Csv,
        ) {
            flags |= VERIFY_CHECKSEQUENCEVERIFY;
        }
        flags
    }

    fn lock_time_flags(&mut self, prev: Option<EntryId>) -> u32 {
        if deployment_active(
            &self.index,
            &mut self.versionbits,
            prev,
            &self.params,
            Deployment::Csv,
        ) {
            LOCKTIME_VERIFY_SEQUENCE | LOCKTIME_MEDIAN_TIME_PAST
        } else {
            0
        }
    }

    /// Apply a block to a fresh view layered over the engine cache. On
    /// success returns the view (to be flushed into the engine cache), the
    /// undo journal, and the collected fees.
    fn connect_block(
        &mut self,
        block: &Block,
        id: EntryId,
        txids: &[Hash256],
    ) -> Result<(CoinsCache, BlockUndo, i64), ChainError> {
        // Defense in depth: contextless rules are cheap next to scripts.
        check_block(block, &self.params, self.options.check_pow)?;

        let (height, hash, prev) = {
            let entry = self.index.get(id);
            (entry.height, entry.hash, entry.prev)
        };
        let script_flags = self.script_flags(prev, block.header.version, block.header.time);
        let lock_flags = self.lock_time_flags(prev);
        let prev_mtp = prev
            .map(|prev_id| self.index.median_time_past(prev_id))
            .unwrap_or(0);
        let size_limit = self.active_size_limit(prev);
        let sigop_limit = max_block_sigops(size_limit);

        // No-overwrite rule (BIP30), with the two inherited historical
        // exceptions.
        let exempt = self
            .params
            .bip30_exceptions
            .iter()
            .any(|exception| exception.height == height && exception.hash == hash);

        let index = &self.index;
        let base = LayeredView {
            base: &self.utxo,
            overlay: &self.coins,
        };
        let mut view = CoinsCache::new();

        if !exempt {
            for (tx, txid) in block.transactions.iter().zip(txids.iter()) {
                for vout in 0..tx.vout.len() as u32 {
                    if view
                        .access(&base, &OutPoint::new(*txid, vout))
                        .map_err(ChainError::Store)?
                        .is_some()
                    {
                        return Err(ChainError::Consensus(ValidationError::InvalidTransaction(
                            "bad-txns-BIP30",
                        )));
                    }
                }
            }
        }

        struct QueuedCheck {
            tx_index: usize,
            input_index: usize,
            spent_index: usize,
            amount: i64,
        }

        let mut undo = BlockUndo::default();
        let mut queued_checks: Vec<QueuedCheck> = Vec::new();
        let mut total_fees: i64 = 0;
        let mut sigops: u32 = 0;

        for (tx_index, (tx, txid)) in block.transactions.iter().zip(txids.iter()).enumerate() {
            let is_coinbase = tx_index == 0;

            for input in &tx.vin {
                sigops = sigops.saturating_add(legacy_sigops(&input.script_sig));
            }
            for output in &tx.vout {
                sigops = sigops.saturating_add(legacy_sigops(&output.script_pubkey));
            }

            if !is_coinbase {
                let mut value_in: i64 = 0;
                let mut prev_heights = Vec::with_capacity(tx.vin.len());
                for (input_index, input) in tx.vin.iter().enumerate() {
                    let coin = view
                        .spend_coin(&base, &input.prevout)
                        .map_err(ChainError::Store)?
                        .ok_or(ChainError::Consensus(ValidationError::InvalidTransaction(
                            "bad-txns-inputs-missingorspent",
                        )))?;

                    if coin.is_coinbase {
                        let depth = i64::from(height) - i64::from(coin.height);
                        if depth < i64::from(COINBASE_MATURITY) {
                            return Err(ChainError::Consensus(
                                ValidationError::InvalidTransaction(
                                    "bad-txns-premature-spend-of-coinbase",
                                ),
                            ));
                        }
                    }

                    value_in = value_in
                        .checked_add(coin.value)
                        .ok_or(ChainError::Consensus(ValidationError::ValueOutOfRange))?;
                    if coin.value < 0 || coin.value > MAX_MONEY || value_in > MAX_MONEY {
                        return Err(ChainError::Consensus(ValidationError::ValueOutOfRange));
                    }

                    if (script_flags & VERIFY_P2SH) != 0 {
                        sigops = sigops
                            .saturating_add(p2sh_sigops(&coin.script_pubkey, &input.script_sig));
                    }

                    prev_heights.push(coin.height as i32);
                    queued_checks.push(QueuedCheck {
                        tx_index,
                        input_index,
                        spent_index: undo.spent.len(),
                        amount: coin.value,
                    });
                    undo.spent.push(SpentCoin {
                        outpoint: input.prevout,
                        coin,
                    });
                }

                let locks = calculate_sequence_locks(tx, lock_flags, &prev_heights, |coin_height| {
                    let anchor = (coin_height - 1).max(0);
                    index
                        .ancestor(id, anchor)
                        .map(|ancestor_id| index.median_time_past(ancestor_id))
                        .unwrap_or(0)
                });
                if !evaluate_sequence_locks(height, prev_mtp, &locks) {
                    return Err(ChainError::Consensus(ValidationError::InvalidTransaction(
                        "bad-txns-nonfinal",
                    )));
                }

                let value_out: i64 = tx.vout.iter().map(|output| output.value).sum();
                if value_in < value_out {
                    return Err(ChainError::Consensus(ValidationError::InvalidTransaction(
                        "bad-txns-in-belowout",
                    )));
                }
                let fee = value_in - value_out;
                total_fees = total_fees
                    .checked_add(fee)
                    .ok_or(ChainError::Consensus(ValidationError::ValueOutOfRange))?;
            }

            if sigops > sigop_limit {
                return Err(ChainError::Consensus(ValidationError::InvalidBlock(
                    "bad-blk-sigops",
                )));
            }

            view.add_tx_outputs(tx, txid, height as u32, is_coinbase && exempt)?;
        }

        // All per-input checks for the block are queued, then verified on the
        // worker pool; the first failure aborts the batch.
        let workers = if self.options.script_workers == 0 {
            crate::checkqueue::default_worker_count()
        } else {
            self.options.script_workers
        };
        let verifier = Arc::clone(&self.verifier);
        if let Some(failed_at) = crate::checkqueue::run_checks(&queued_checks, workers, |check| {
            let tx = &block.transactions[check.tx_index];
            let spent = &undo.spent[check.spent_index];
            verifier
                .verify(&ScriptCheck {
                    tx,
                    input_index: check.input_index,
                    script_pubkey: &spent.coin.script_pubkey,
                    amount: check.amount,
                    flags: script_flags,
                })
                .is_ok()
        }) {
            // Distinguish a mandatory failure from one caused by the
            // optional flag set alone.
            let check = &queued_checks[failed_at];
            let tx = &block.transactions[check.tx_index];
            let spent = &undo.spent[check.spent_index];
            let mandatory_only = self.verifier.verify(&ScriptCheck {
                tx,
                input_index: check.input_index,
                script_pubkey: &spent.coin.script_pubkey,
                amount: check.amount,
                flags: script_flags & MANDATORY_SCRIPT_VERIFY_FLAGS,
            });
            let reason = if mandatory_only.is_ok() {
                "non-mandatory-script-verify-flag"
            } else {
                "mandatory-script-verify-flag-failed"
            };
            return Err(ChainError::Consensus(ValidationError::BadScript(reason)));
        }

        let reward = block_subsidy(height, &self.params)
            .checked_add(total_fees)
            .ok_or(ChainError::Consensus(ValidationError::ValueOutOfRange))?;
        let coinbase_out: i64 = block.transactions[0]
            .vout
            .iter()
            .map(|output| output.value)
            .sum();
        if coinbase_out > reward {
            return Err(ChainError::Consensus(ValidationError::InvalidBlock(
                "bad-cb-amount",
            )));
        }

        if self.params.smartnode_payments_active(height) {
            self.payout_hooks
                .check_block_rewards(block, height, total_fees)
                .map_err(|reason| {
                    ChainError::Consensus(ValidationError::InvalidBlock(reason))
                })?;
        }

        Ok((view, undo, total_fees))
    }

    /// Connect the block at `id` on top of the current tip.
    fn connect_tip(&mut self, id: EntryId) -> Result<Block, ChainError> {
        debug_assert_eq!(self.index.get(id).prev, self.chain.tip());

        let location = self
            .index
            .get(id)
            .data_pos
            .ok_or(ChainError::Corruption("connect of block without data"))?;
        let bytes = self.blocks.read(location)?;
        let block = Block::consensus_decode(&bytes)
            .map_err(|_| ChainError::Corruption("stored block does not decode"))?;
        if block.header.hash() != self.index.get(id).hash {
            return Err(ChainError::Corruption("stored block hash mismatch"));
        }
        let txids: Vec<Hash256> = block.transactions.iter().map(Transaction::txid).collect();

        let (mut view, undo, _fees) = self.connect_block(&block, id, &txids)?;

        let (hash, height, prev_hash) = {
            let entry = self.index.get(id);
            let prev_hash = entry
                .prev
                .map(|prev_id| self.index.get(prev_id).hash)
                .unwrap_or([0u8; 32]);
            (entry.hash, entry.height, prev_hash)
        };

        if !self.index.get(id).have_undo() {
            let undo_bytes = undo.encode();
            let file_id = location.file_id as usize;
            let offset = self.file_info[file_id].undo_size;
            let undo_location =
                self.undo_files
                    .append_checked_at(location.file_id, offset, &undo_bytes, &prev_hash)?;
            self.file_info[file_id].undo_size =
                offset + 8 + u64::from(undo_location.len) + 32;
            let entry = self.index.get_mut(id);
            entry.undo_pos = Some(undo_location);
            entry.status |= STATUS_HAVE_UNDO;
        }

        view.set_best_block(hash);
        view.flush_into(&mut self.coins)?;

        {
            let entry = self.index.get_mut(id);
            entry.raise_validity(BlockValidity::Scripts);
        }
        self.dirty_entries.insert(id);
        self.chain.set_tip(&self.index, Some(id));
        self.events.emit(ChainEvent::BlockConnected { hash, height });
        Ok(block)
    }

    /// Undo the current tip. Returns its transactions for pool resurrection
    /// and whether the undo data matched the stored block exactly.
    fn disconnect_tip(&mut self) -> Result<(Vec<Transaction>, DisconnectStatus), ChainError> {
        let id = self
            .chain
            .tip()
            .ok_or(ChainError::Corruption("disconnect on empty chain"))?;
        let (location, undo_location, hash, height, prev, prev_hash) = {
            let entry = self.index.get(id);
            let prev_hash = entry
                .prev
                .map(|prev_id| self.index.get(prev_id).hash)
                .unwrap_or([0u8; 32]);
            (
                entry
                    .data_pos
                    .ok_or(ChainError::Corruption("disconnect of pruned block"))?,
                entry
                    .undo_pos
                    .ok_or(ChainError::Corruption("disconnect without undo data"))?,
                entry.hash,
                entry.height,
                entry.prev,
                prev_hash,
            )
        };

        let block_bytes = self.blocks.read(location)?;
        let block = Block::consensus_decode(&block_bytes)
            .map_err(|_| ChainError::Corruption("stored block does not decode"))?;
        let undo_bytes = self.undo_files.read_checked(undo_location, &prev_hash)?;
        let mut undo = BlockUndo::decode(&undo_bytes)
            .map_err(|_| ChainError::Corruption("stored undo does not decode"))?;

        let expected_spends: usize = block
            .transactions
            .iter()
            .skip(1)
            .map(|tx| tx.vin.len())
            .sum();
        if undo.spent.len() != expected_spends {
            return Err(ChainError::Corruption("undo input count mismatch"));
        }

        let base = LayeredView {
            base: &self.utxo,
            overlay: &self.coins,
        };
        let mut view = CoinsCache::new();
        let mut status = DisconnectStatus::Clean;

        for (tx_index, tx) in block.transactions.iter().enumerate().rev() {
            let txid = tx.txid();

            // Remove the outputs this block created.
            for vout in (0..tx.vout.len() as u32).rev() {
                let outpoint = OutPoint::new(txid, vout);
                let removed = view
                    .spend_coin(&base, &outpoint)
                    .map_err(ChainError::Store)?;
                if removed.is_none() {
                    status = DisconnectStatus::Unclean;
                }
            }

            if tx_index == 0 {
                continue;
            }
            for input in tx.vin.iter().rev() {
                let spent = undo
                    .spent
                    .pop()
                    .ok_or(ChainError::Corruption("undo journal underrun"))?;
                if spent.outpoint != input.prevout {
                    return Err(ChainError::Corruption("undo outpoint mismatch"));
                }
                let mut coin = spent.coin;
                if coin.height == 0 {
                    // Legacy undo data lost the metadata of a transaction's
                    // last spent output; recover it from any sibling.
                    let alternate = view
                        .access_by_txid(&base, &spent.outpoint.txid)
                        .map_err(ChainError::Store)?
                        .ok_or(ChainError::Corruption(
                            "undo metadata unrecoverable",
                        ))?;
                    coin.height = alternate.height;
                    coin.is_coinbase = alternate.is_coinbase;
                }
                view.add_coin(spent.outpoint, coin, true)?;
            }
        }

        view.set_best_block(prev_hash);
        view.flush_into(&mut self.coins)?;
        self.chain.set_tip(&self.index, prev);
        self.events
            .emit(ChainEvent::BlockDisconnected { hash, height });
        if status == DisconnectStatus::Unclean {
            smartd_log::log_warn!(
                "unclean disconnect of block {} at height {}",
                hex_prefix(&hash),
                height
            );
        }
        Ok((block.transactions, status))
    }

    // ------------------------------------------------------------------
    // Chain selection
    // ------------------------------------------------------------------

    fn find_best_candidate(&self) -> Option<EntryId> {
        self.candidates.iter().next().map(|key| key.id)
    }

    /// Drive the active chain to the best available leaf, disconnecting and
    /// connecting as needed. Invalid candidates are marked and selection
    /// restarts until the chain is quiescent.
    pub fn activate_best_chain(&mut self) -> Result<ChainUpdate, ChainError> {
        let mut update = ChainUpdate::default();

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                update.interrupted = true;
                break;
            }

            let tip = self.chain.tip();
            let Some(best) = self.find_best_candidate() else {
                break;
            };
            if Some(best) == tip {
                break;
            }
            if let Some(tip_id) = tip {
                if self.index.get(best).chain_work <= self.index.get(tip_id).chain_work {
                    break;
                }
            }

            let fork = tip.and_then(|tip_id| self.index.find_fork(tip_id, best));

            // Rewind to the fork point.
            let mut rewind_failed = false;
            while self.chain.tip() != fork {
                let (transactions, _) = self.disconnect_tip()?;
                update
                    .disconnected
                    .extend(transactions.into_iter().filter(|tx| !tx.is_coinbase()));
                if self.chain.tip().is_none() {
                    if fork.is_some() {
                        rewind_failed = true;
                    }
                    break;
                }
            }
            if rewind_failed {
                return Err(ChainError::Corruption("rewind passed the fork point"));
            }

            // Walk the path fork -> best and connect in bounded batches so
            // the embedding lock can breathe between rounds.
            let mut path = Vec::new();
            let mut walk = Some(best);
            while let Some(current) = walk {
                if Some(current) == fork {
                    break;
                }
                path.push(current);
                walk = self.index.get(current).prev;
            }
            path.reverse();

            for id in path.into_iter().take(CONNECT_BATCH) {
                match self.connect_tip(id) {
                    Ok(block) => update.connected.push(block),
                    Err(err) if err.is_consensus() => {
                        let hash = self.index.get(id).hash;
                        smartd_log::log_warn!(
                            "invalid block {} while connecting: {}",
                            hex_prefix(&hash),
                            err
                        );
                        self.mark_failed(id);
                        break;
                    }
                    Err(err) => return Err(err),
                }
                if self.shutdown.load(Ordering::Relaxed) {
                    update.interrupted = true;
                    break;
                }
            }
            if update.interrupted {
                break;
            }
        }

        self.prune_candidates();
        self.update_fork_warning();
        if let Some(tip) = self.chain.tip() {
            let entry = self.index.get(tip);
            self.events.emit(ChainEvent::TipUpdated {
                hash: entry.hash,
                height: entry.height,
                work: entry.chain_work,
            });
        }
        self.flush_if_needed()?;
        Ok(update)
    }

    /// Reject a block by hash: rewind past it if it is on the active chain,
    /// mark it invalid, and reactivate the best remaining branch.
    pub fn invalidate_block(&mut self, hash: &Hash256) -> Result<ChainUpdate, ChainError> {
        let id = self.index.lookup(hash).ok_or(ChainError::MissingParent)?;
        let mut update = ChainUpdate::default();
        while self.chain.contains(&self.index, id) {
            let (transactions, _) = self.disconnect_tip()?;
            update
                .disconnected
                .extend(transactions.into_iter().filter(|tx| !tx.is_coinbase()));
        }
        self.mark_failed(id);
        let reactivation = self.activate_best_chain()?;
        update.connected.extend(reactivation.connected);
        update.disconnected.extend(reactivation.disconnected);
        update.interrupted = reactivation.interrupted;
        Ok(update)
    }

    /// Drop candidates that can no longer become the best chain, keeping the
    /// tip itself.
    fn prune_candidates(&mut self) {
        let Some(tip) = self.chain.tip() else {
            return;
        };
        let tip_work = self.index.get(tip).chain_work;
        let tip_key = CandidateKey {
            work: tip_work,
            sequence_id: self.index.get(tip).sequence_id,
            id: tip,
        };
        let index = &self.index;
        self.candidates.retain(|key| {
            *key == tip_key || index.get(key.id).chain_work > tip_work
        });
        self.candidates.insert(tip_key);
    }

    /// Mark an entry invalid and cascade the failure to its descendants.
    pub fn mark_failed(&mut self, id: EntryId) {
        self.remove_candidate(id);
        {
            let entry = self.index.get_mut(id);
            entry.status |= STATUS_FAILED_VALID;
        }
        self.dirty_entries.insert(id);

        let descendants: Vec<EntryId> = self
            .index
            .ids()
            .filter(|other| *other != id && self.index.is_ancestor_of(id, *other))
            .collect();
        for descendant in descendants {
            self.remove_candidate(descendant);
            let entry = self.index.get_mut(descendant);
            entry.status |= STATUS_FAILED_CHILD;
            self.dirty_entries.insert(descendant);
        }

        // The best header may have been invalidated.
        self.best_header = self
            .index
            .ids()
            .filter(|entry_id| !self.index.get(*entry_id).failed())
            .max_by_key(|entry_id| {
                let entry = self.index.get(*entry_id);
                (entry.chain_work, std::cmp::Reverse(entry.sequence_id))
            });
    }

    /// Raise the fork warning when a competing branch near the tip carries
    /// dangerously more work.
    fn update_fork_warning(&mut self) {
        let Some(tip) = self.chain.tip() else {
            self.fork_warning = None;
            return;
        };
        let tip_entry = self.index.get(tip);
        let Ok(one_proof) = block_proof(tip_entry.bits) else {
            return;
        };
        let danger_margin = one_proof * U256::from(FORK_WARNING_PROOFS);

        let mut worst: Option<(Hash256, i32)> = None;
        let mut inspect = |index: &BlockIndex, id: EntryId| {
            if id == tip {
                return;
            }
            let entry = index.get(id);
            if self.chain.contains(index, id) || entry.failed() {
                return;
            }
            let Some(fork) = index.find_fork(tip, id) else {
                return;
            };
            let fork_depth = tip_entry.height - index.get(fork).height;
            if fork_depth >= FORK_WARNING_DEPTH {
                return;
            }
            if entry.chain_work > tip_entry.chain_work + danger_margin {
                worst = Some((entry.hash, entry.height));
            }
        };
        for key in &self.candidates {
            inspect(&self.index, key.id);
        }
        if let Some(best_header) = self.best_header {
            inspect(&self.index, best_header);
        }

        match worst {
            Some((hash, height)) => {
                let message = format!(
                    "Warning: large valid fork detected, forking the chain at height {} ({})",
                    height,
                    hex_prefix(&hash)
                );
                if self.fork_warning.as_deref() != Some(&message) {
                    smartd_log::log_warn!("{message}");
                    self.events.emit(ChainEvent::ForkWarning {
                        message: message.clone(),
                    });
                }
                self.fork_warning = Some(message);
            }
            None => {
                self.fork_warning = None;
            }
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write dirty index entries, file metadata, and the coin cache in one
    /// atomic batch. The UTXO best-block pointer rides with the coins so a
    /// recovered database is always internally consistent.
    pub fn flush(&mut self) -> Result<(), ChainError> {
        let mut batch = WriteBatch::new();

        for id in self.dirty_entries.iter().copied() {
            let entry = self.index.get(id);
            let prev_hash = entry
                .prev
                .map(|prev_id| self.index.get(prev_id).hash)
                .unwrap_or([0u8; 32]);
            let disk = DiskBlockEntry::from_entry(entry, prev_hash);
            self.tree.put_entry(&mut batch, &entry.hash, &disk);
        }

        for (file_id, info) in self.file_info.iter().enumerate() {
            self.tree.put_file_info(&mut batch, file_id as u32, info);
        }
        self.tree.set_last_block_file(&mut batch, self.last_block_file);

        let utxo = &self.utxo;
        let best = self.coins.drain_dirty(|outpoint, coin| match coin {
            Some(coin) => utxo.put(&mut batch, outpoint, coin),
            None => utxo.delete(&mut batch, outpoint),
        });
        if let Some(best) = best {
            self.utxo.set_best_block(&mut batch, &best);
        }

        self.store.write_batch(&batch)?;
        self.dirty_entries.clear();
        Ok(())
    }

    fn flush_if_needed(&mut self) -> Result<(), ChainError> {
        if self.coins.memory_usage() > self.options.coins_cache_bytes {
            self.flush()?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), ChainError> {
        let mut disk_entries = self.tree.read_all_entries()?;
        disk_entries.sort_by_key(|(_, entry)| entry.height);

        for (hash, disk) in disk_entries {
            let prev = if disk.prev_hash == [0u8; 32] {
                None
            } else {
                Some(self.index.lookup(&disk.prev_hash).ok_or(
                    ChainError::Corruption("block index parent missing"),
                )?)
            };
            let work = block_proof(disk.bits)
                .map_err(|_| ChainError::Corruption("block index entry with invalid bits"))?;
            let (height, chain_work) = match prev {
                Some(prev_id) => {
                    let prev_entry = self.index.get(prev_id);
                    (prev_entry.height + 1, prev_entry.chain_work + work)
                }
                None => (0, work),
            };
            if height != disk.height {
                return Err(ChainError::Corruption("block index height mismatch"));
            }
            let skip = prev.and_then(|prev_id| {
                self.index
                    .ancestor(prev_id, crate::blockindex::get_skip_height(height))
            });
            let entry = crate::blockindex::BlockIndexEntry {
                hash,
                prev,
                skip,
                height,
                version: disk.version,
                merkle_root: disk.merkle_root,
                time: disk.time,
                bits: disk.bits,
                nonce: disk.nonce,
                chain_work,
                tx_count: disk.tx_count,
                chain_tx: disk.chain_tx,
                validity: disk.validity(),
                status: disk.status,
                data_pos: disk.data_pos,
                undo_pos: disk.undo_pos,
                sequence_id: 0,
            };
            self.index.restore(entry);
        }

        for (file_id, info) in self.tree.read_file_infos()? {
            let file_id = file_id as usize;
            if self.file_info.len() <= file_id {
                self.file_info.resize(file_id + 1, BlockFileInfo::default());
            }
            self.file_info[file_id] = info;
        }
        if let Some(last) = self.tree.last_block_file()? {
            self.last_block_file = last;
            if let Some(info) = self.file_info.get(last as usize) {
                self.blocks.resume(last, info.size);
            }
        }

        if let Some(best_block) = self.utxo.read_best_block()? {
            let tip = self
                .index
                .lookup(&best_block)
                .ok_or(ChainError::Corruption("utxo best block not in index"))?;
            self.chain.set_tip(&self.index, Some(tip));
        }

        for id in self.index.ids() {
            self.insert_candidate(id);
            let entry = self.index.get(id);
            if entry.have_data() && entry.chain_tx == 0 {
                if let Some(prev) = entry.prev {
                    self.unlinked.entry(prev).or_default().push(id);
                }
            }
        }
        if let Some(tip) = self.chain.tip() {
            let entry = self.index.get(tip);
            self.candidates.insert(CandidateKey {
                work: entry.chain_work,
                sequence_id: entry.sequence_id,
                id: tip,
            });
        }
        self.best_header = self
            .index
            .ids()
            .filter(|id| !self.index.get(*id).failed())
            .max_by_key(|id| self.index.get(*id).chain_work);

        Ok(())
    }

    // ------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------

    /// Delete whole block/undo file pairs whose blocks all sit deeper than
    /// the keep-window. Entries lose their data bits but stay in the index.
    pub fn prune_block_files(&mut self) -> Result<u32, ChainError> {
        if !self.options.prune {
            return Ok(0);
        }
        let tip_height = self.chain.height();
        let prune_below = tip_height - self.options.prune_keep_recent;
        if prune_below <= 0 {
            return Ok(0);
        }

        let mut pruned = 0u32;
        for file_id in 0..self.file_info.len() as u32 {
            if file_id >= self.last_block_file {
                break;
            }
            let info = self.file_info[file_id as usize];
            if info.blocks == 0 || info.height_last >= prune_below {
                continue;
            }
            self.blocks.delete_file(file_id)?;
            self.undo_files.delete_file(file_id)?;
            self.file_info[file_id as usize] = BlockFileInfo::default();
            pruned += 1;

            let affected: Vec<EntryId> = self
                .index
                .ids()
                .filter(|id| {
                    self.index
                        .get(*id)
                        .data_pos
                        .is_some_and(|pos| pos.file_id == file_id)
                })
                .collect();
            for id in affected {
                let on_chain = self.chain.contains(&self.index, id);
                if !on_chain {
                    self.remove_candidate(id);
                }
                let entry = self.index.get_mut(id);
                entry.status &= !(STATUS_HAVE_DATA | STATUS_HAVE_UNDO);
                entry.data_pos = None;
                entry.undo_pos = None;
                self.dirty_entries.insert(id);
            }
        }

        if pruned > 0 {
            let mut batch = WriteBatch::new();
            self.tree
                .set_flag(&mut batch, FLAG_PRUNED_BLOCK_FILES, true);
            self.store.write_batch(&batch)?;
            self.flush()?;
            smartd_log::log_info!("pruned {pruned} block file pair(s)");
        }
        Ok(pruned)
    }
}

fn hex_prefix(hash: &Hash256) -> String {
    let mut out = String::with_capacity(16);
    for byte in hash.iter().rev().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
