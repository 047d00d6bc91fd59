//! The admission pipeline and reorg reconciliation.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use smartd_chainstate::coins::CoinsView;
use smartd_chainstate::locks::{
    calculate_sequence_locks, evaluate_sequence_locks, is_final_tx, LockPoints, SequenceLocks,
};
use smartd_chainstate::state::{ChainState, ChainUpdate};
use smartd_chainstate::validation::check_transaction;
use smartd_consensus::constants::{
    COINBASE_MATURITY, MAX_STANDARD_TX_SIZE, STANDARD_LOCKTIME_VERIFY_FLAGS,
};
use smartd_consensus::money::MAX_MONEY;
use smartd_consensus::Hash256;
use smartd_primitives::outpoint::OutPoint;
use smartd_primitives::transaction::{Transaction, TX_VERSION_1, TX_VERSION_2};
use smartd_script::sigops::{is_push_only, legacy_sigops, p2sh_sigops};
use smartd_script::standard::{classify_script_pubkey, is_standard_op_return, ScriptType};
use smartd_script::{ScriptCheck, ScriptVerifier, STANDARD_SCRIPT_VERIFY_FLAGS};
use smartd_storage::KeyValueStore;

use crate::entry::{fee_rate_greater, MempoolEntry};
use crate::policy::{min_fee_for_size, MempoolPolicy};
use crate::pool::{Mempool, MempoolError, MempoolErrorKind};

#[derive(Clone, Copy, Debug)]
pub struct AcceptOptions {
    /// Admit below-relay-fee transactions through the rate limiter.
    pub limit_free: bool,
    pub reject_absurd_fee: bool,
}

impl Default for AcceptOptions {
    fn default() -> Self {
        Self {
            limit_free: true,
            reject_absurd_fee: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Acceptance {
    pub txid: Hash256,
    pub fee: i64,
    pub size: usize,
    pub replaced: Vec<Hash256>,
}

struct PrevInfo {
    value: i64,
    script_pubkey: Vec<u8>,
    height: i32,
    is_coinbase: bool,
    in_pool: bool,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn invalid(err: smartd_chainstate::validation::ValidationError) -> MempoolError {
    MempoolError::new(MempoolErrorKind::InvalidTransaction, err.to_string())
}

/// Run a standalone transaction through the full admission pipeline.
pub fn accept_to_pool<S: KeyValueStore>(
    chain: &mut ChainState<S>,
    pool: &mut Mempool,
    policy: &MempoolPolicy,
    verifier: &dyn ScriptVerifier,
    tx: Transaction,
    opts: &AcceptOptions,
) -> Result<Acceptance, MempoolError> {
    let txid = tx.txid();
    let size = tx.serialized_size();
    let now = now_secs();

    check_transaction(&tx).map_err(invalid)?;
    if tx.is_coinbase() {
        return Err(MempoolError::new(
            MempoolErrorKind::InvalidTransaction,
            "coinbase",
        ));
    }
    if pool.contains(&txid) {
        return Err(MempoolError::new(
            MempoolErrorKind::AlreadyInPool,
            "txn-already-in-mempool",
        ));
    }

    // Chain context. The version-bits queries need the mutable cache, so
    // they come before any read-only view is taken out.
    let next_height = chain.tip_height() + 1;
    let tip_mtp = chain.tip_mtp();
    let csv_active = chain.csv_active_next_block();
    let lock_cutoff = chain.next_block_lock_time_cutoff();
    let consensus_flags = chain.next_block_script_flags();

    if !chain.params().zerocoin_allowed(next_height) && tx.has_zerocoin_component() {
        return Err(MempoolError::new(
            MempoolErrorKind::InvalidTransaction,
            "bad-txns-zerocoin",
        ));
    }
    if tx.version >= TX_VERSION_2 && !csv_active {
        return Err(MempoolError::new(
            MempoolErrorKind::NonStandard,
            "premature-version2-tx",
        ));
    }
    if policy.require_standard {
        check_standard(&tx, size, policy)?;
    }

    if !is_final_tx(&tx, next_height, lock_cutoff) {
        return Err(MempoolError::new(
            MempoolErrorKind::InvalidTransaction,
            "non-final",
        ));
    }

    // Conflicts with pool transactions trigger the replacement policy.
    let mut direct_conflicts: HashSet<Hash256> = HashSet::new();
    for input in &tx.vin {
        if let Some(spender) = pool.spender(&input.prevout) {
            direct_conflicts.insert(spender);
        }
    }
    let mut conflict_closure: HashSet<Hash256> = direct_conflicts.clone();
    if !direct_conflicts.is_empty() {
        for conflict in &direct_conflicts {
            let entry = pool
                .get(conflict)
                .ok_or_else(|| MempoolError::new(MempoolErrorKind::Internal, "conflict vanished"))?;
            if !entry.tx.vin.iter().any(|input| input.signals_replaceability()) {
                return Err(MempoolError::new(
                    MempoolErrorKind::Conflict,
                    "txn-mempool-conflict",
                ));
            }
            conflict_closure.extend(pool.descendants_of(conflict));
        }
        if conflict_closure.len() > policy.max_replacement_set {
            return Err(MempoolError::new(
                MempoolErrorKind::Conflict,
                "too many potential replacements",
            ));
        }
    }

    // Resolve inputs against the chain view joined with pool outputs.
    let view = chain.coins_view();
    let mut prev_infos: Vec<PrevInfo> = Vec::with_capacity(tx.vin.len());
    let mut parents: HashSet<Hash256> = HashSet::new();
    let mut missing: Vec<OutPoint> = Vec::new();
    for input in &tx.vin {
        let confirmed = view
            .coin(&input.prevout)
            .map_err(|err| MempoolError::new(MempoolErrorKind::Internal, err.to_string()))?;
        if let Some(coin) = confirmed {
            prev_infos.push(PrevInfo {
                value: coin.value,
                script_pubkey: coin.script_pubkey,
                height: coin.height as i32,
                is_coinbase: coin.is_coinbase,
                in_pool: false,
            });
            continue;
        }
        if let Some((_, value, script_pubkey)) = pool.pool_output(&input.prevout) {
            prev_infos.push(PrevInfo {
                value,
                script_pubkey: script_pubkey.to_vec(),
                height: next_height,
                is_coinbase: false,
                in_pool: true,
            });
            parents.insert(input.prevout.txid);
            continue;
        }
        missing.push(input.prevout);
    }
    if !missing.is_empty() {
        // A sibling output still unspent means the input was consumed, which
        // is a hard reject rather than an orphaning condition.
        for outpoint in &missing {
            for vout in 0..16u32 {
                if vout == outpoint.vout {
                    continue;
                }
                let probe = OutPoint::new(outpoint.txid, vout);
                if view
                    .coin(&probe)
                    .map_err(|err| {
                        MempoolError::new(MempoolErrorKind::Internal, err.to_string())
                    })?
                    .is_some()
                {
                    return Err(MempoolError::new(
                        MempoolErrorKind::InvalidTransaction,
                        "bad-txns-inputs-spent",
                    ));
                }
            }
        }
        missing.sort();
        return Err(MempoolError::missing_inputs(missing));
    }

    let mut spends_coinbase = false;
    for info in &prev_infos {
        if info.is_coinbase {
            spends_coinbase = true;
            let depth = i64::from(next_height) - i64::from(info.height);
            if depth < i64::from(COINBASE_MATURITY) {
                return Err(MempoolError::new(
                    MempoolErrorKind::InvalidTransaction,
                    "bad-txns-premature-spend-of-coinbase",
                ));
            }
        }
    }

    // Relative lock evaluation, cached as lock points pinned to the chain.
    let lock_flags = if csv_active {
        STANDARD_LOCKTIME_VERIFY_FLAGS
    } else {
        0
    };
    let prev_heights: Vec<i32> = prev_infos.iter().map(|info| info.height).collect();
    let locks = calculate_sequence_locks(&tx, lock_flags, &prev_heights, |height| {
        chain.prior_mtp(height)
    });
    if !evaluate_sequence_locks(next_height, tip_mtp, &locks) {
        return Err(MempoolError::new(
            MempoolErrorKind::InvalidTransaction,
            "non-BIP68-final",
        ));
    }
    let max_input_height = prev_infos
        .iter()
        .filter(|info| !info.in_pool)
        .map(|info| info.height)
        .max()
        .unwrap_or(0);
    let lock_points = LockPoints {
        height: locks.min_height,
        time: locks.min_time,
        max_input_height,
        pinning_block: chain
            .chain()
            .at(max_input_height)
            .map(|id| chain.index().get(id).hash),
    };

    let mut sigops: u32 = 0;
    for (input, info) in tx.vin.iter().zip(prev_infos.iter()) {
        sigops = sigops.saturating_add(legacy_sigops(&input.script_sig));
        sigops = sigops.saturating_add(p2sh_sigops(&info.script_pubkey, &input.script_sig));
    }
    for output in &tx.vout {
        sigops = sigops.saturating_add(legacy_sigops(&output.script_pubkey));
    }
    if sigops > policy.max_standard_tx_sigops {
        return Err(MempoolError::new(
            MempoolErrorKind::NonStandard,
            "bad-txns-too-many-sigops",
        ));
    }

    let mut value_in: i64 = 0;
    for info in &prev_infos {
        value_in = value_in.checked_add(info.value).ok_or_else(|| {
            MempoolError::new(MempoolErrorKind::InvalidTransaction, "value out of range")
        })?;
        if value_in > MAX_MONEY {
            return Err(MempoolError::new(
                MempoolErrorKind::InvalidTransaction,
                "value out of range",
            ));
        }
    }
    let value_out: i64 = tx.vout.iter().map(|output| output.value).sum();
    if value_in < value_out {
        return Err(MempoolError::new(
            MempoolErrorKind::InvalidTransaction,
            "bad-txns-in-belowout",
        ));
    }
    let fee = value_in - value_out;
    let modified_fee = fee.saturating_add(pool.fee_delta(&txid));
    let min_relay_fee = policy.min_relay_fee_for_size(size);

    if !direct_conflicts.is_empty() {
        // The replacement must beat every direct conflict on rate and pay
        // for the bandwidth of both itself and everything it evicts.
        let mut conflict_fees: i64 = 0;
        for conflict in &conflict_closure {
            if let Some(entry) = pool.get(conflict) {
                conflict_fees = conflict_fees.saturating_add(entry.modified_fee());
            }
        }
        for conflict in &direct_conflicts {
            let entry = pool
                .get(conflict)
                .ok_or_else(|| MempoolError::new(MempoolErrorKind::Internal, "conflict vanished"))?;
            if !fee_rate_greater(modified_fee, size, entry.modified_fee(), entry.size) {
                return Err(MempoolError::new(
                    MempoolErrorKind::InsufficientFee,
                    "insufficient fee: replacement rate too low",
                ));
            }
        }
        if modified_fee < conflict_fees.saturating_add(min_relay_fee) {
            return Err(MempoolError::new(
                MempoolErrorKind::InsufficientFee,
                "insufficient fee: does not cover replaced fees and relay",
            ));
        }
        // No unconfirmed inputs the evicted set did not already depend on.
        let mut conflict_parents: HashSet<Hash256> = HashSet::new();
        for conflict in &direct_conflicts {
            if let Some(entry) = pool.get(conflict) {
                conflict_parents.extend(entry.tx.vin.iter().map(|input| input.prevout.txid));
            }
        }
        for (input, info) in tx.vin.iter().zip(prev_infos.iter()) {
            if info.in_pool && !conflict_parents.contains(&input.prevout.txid) {
                return Err(MempoolError::new(
                    MempoolErrorKind::Conflict,
                    "replacement-adds-unconfirmed",
                ));
            }
        }
    }

    // Minimum fees: the dynamic pool floor, then the relay rate with the
    // decaying free-transaction budget.
    let dynamic_min = pool.dynamic_min_fee_per_kb(now);
    if modified_fee < min_fee_for_size(dynamic_min, size) {
        return Err(MempoolError::new(
            MempoolErrorKind::InsufficientFee,
            "mempool min fee not met",
        ));
    }
    if modified_fee < min_relay_fee {
        if !opts.limit_free {
            return Err(MempoolError::new(
                MempoolErrorKind::InsufficientFee,
                "min relay fee not met",
            ));
        }
        if !pool
            .free_limiter
            .try_consume(policy.limit_free_relay_kb_per_minute, size, now)
        {
            return Err(MempoolError::new(
                MempoolErrorKind::InsufficientFee,
                "rate limited free transaction",
            ));
        }
    }

    // Package limits, checked against the pre-replacement pool.
    pool.calculate_ancestors(&parents, size, &policy.limits)?;

    if opts.reject_absurd_fee
        && fee > min_relay_fee
            .max(policy.min_relay_fee_per_kb)
            .saturating_mul(policy.absurd_fee_multiplier)
    {
        return Err(MempoolError::new(
            MempoolErrorKind::NonStandard,
            "absurdly-high-fee",
        ));
    }

    // Script checks under the standard flags, then cross-checked under the
    // consensus flags: a pass/fail split there is a bug worth flagging.
    let standard_flags = if policy.require_standard {
        STANDARD_SCRIPT_VERIFY_FLAGS | consensus_flags
    } else {
        consensus_flags
    };
    for (input_index, info) in prev_infos.iter().enumerate() {
        verifier
            .verify(&ScriptCheck {
                tx: &tx,
                input_index,
                script_pubkey: &info.script_pubkey,
                amount: info.value,
                flags: standard_flags,
            })
            .map_err(|err| MempoolError::new(MempoolErrorKind::InvalidScript, err.to_string()))?;
        verifier
            .verify(&ScriptCheck {
                tx: &tx,
                input_index,
                script_pubkey: &info.script_pubkey,
                amount: info.value,
                flags: consensus_flags,
            })
            .map_err(|err| {
                MempoolError::new(
                    MempoolErrorKind::InvalidScript,
                    format!(
                        "BUG: failed against consensus flags but passed standard flags: {err}"
                    ),
                )
            })?;
    }

    // Point of no return: evict the replaced set, then insert.
    let mut replaced = Vec::new();
    for conflict in &direct_conflicts {
        replaced.extend(pool.remove_recursive(conflict));
    }
    let ancestors = pool
        .calculate_ancestors(&parents, size, &policy.limits)
        .map_err(|err| MempoolError::new(MempoolErrorKind::Internal, err.message))?;
    let entry = MempoolEntry {
        txid,
        tx,
        size,
        sigops,
        fee,
        fee_delta: 0,
        time: now,
        entry_height: next_height - 1,
        spends_coinbase,
        lock_points,
        parents,
        children: HashSet::new(),
        ancestor_count: 0,
        ancestor_size: 0,
        ancestor_fees: 0,
        descendant_count: 0,
        descendant_size: 0,
        descendant_fees: 0,
    };
    pool.insert(entry, &ancestors)?;

    // Size pressure: age out stale entries, then trim by package rate.
    pool.expire(now.saturating_sub(policy.expiry_secs));
    pool.trim_to_size(policy.max_pool_bytes, now);
    if !pool.contains(&txid) {
        return Err(MempoolError::new(MempoolErrorKind::PoolFull, "mempool full"));
    }

    Ok(Acceptance {
        txid,
        fee,
        size,
        replaced,
    })
}

fn check_standard(
    tx: &Transaction,
    size: usize,
    policy: &MempoolPolicy,
) -> Result<(), MempoolError> {
    if tx.version < TX_VERSION_1 || tx.version > TX_VERSION_2 {
        return Err(MempoolError::new(MempoolErrorKind::NonStandard, "version"));
    }
    if size > MAX_STANDARD_TX_SIZE {
        return Err(MempoolError::new(MempoolErrorKind::NonStandard, "tx-size"));
    }
    for input in &tx.vin {
        if input.script_sig.len() > policy.max_scriptsig_size {
            return Err(MempoolError::new(
                MempoolErrorKind::NonStandard,
                "scriptsig-size",
            ));
        }
        if !is_push_only(&input.script_sig) {
            return Err(MempoolError::new(
                MempoolErrorKind::NonStandard,
                "scriptsig-not-pushonly",
            ));
        }
    }
    let mut op_return_count = 0usize;
    for output in &tx.vout {
        if is_standard_op_return(&output.script_pubkey, policy.max_op_return_bytes) {
            op_return_count += 1;
            continue;
        }
        match classify_script_pubkey(&output.script_pubkey) {
            ScriptType::P2Pk | ScriptType::P2Pkh | ScriptType::P2Sh => {}
            ScriptType::OpReturn | ScriptType::Unknown => {
                return Err(MempoolError::new(
                    MempoolErrorKind::NonStandard,
                    "scriptpubkey",
                ));
            }
        }
        if is_dust(output.value, &output.script_pubkey, policy.min_relay_fee_per_kb) {
            return Err(MempoolError::new(MempoolErrorKind::NonStandard, "dust"));
        }
    }
    if op_return_count > 1 {
        return Err(MempoolError::new(
            MempoolErrorKind::NonStandard,
            "multi-op-return",
        ));
    }
    Ok(())
}

fn is_dust(value: i64, script_pubkey: &[u8], min_fee_per_kb: i64) -> bool {
    if min_fee_per_kb <= 0 {
        return false;
    }
    if value < 0 {
        return true;
    }
    let out_size = 8 + compact_size_len(script_pubkey.len()) + script_pubkey.len();
    let spend_size = out_size + 148;
    let dust_threshold = min_fee_for_size(min_fee_per_kb, spend_size).saturating_mul(3);
    value < dust_threshold
}

fn compact_size_len(value: usize) -> usize {
    if value < 0xfd {
        1
    } else if value <= 0xffff {
        3
    } else if value <= 0xffff_ffff {
        5
    } else {
        9
    }
}

/// Reconcile the pool with the outcome of a best-chain activation: evict
/// what was mined, resurrect what was disconnected, then drop entries the
/// new tip makes invalid.
pub fn update_for_reorg<S: KeyValueStore>(
    chain: &mut ChainState<S>,
    pool: &mut Mempool,
    policy: &MempoolPolicy,
    verifier: &dyn ScriptVerifier,
    update: &ChainUpdate,
) {
    for block in &update.connected {
        pool.remove_for_block(&block.transactions);
    }

    let resurrect_opts = AcceptOptions {
        limit_free: false,
        reject_absurd_fee: false,
    };
    for tx in &update.disconnected {
        if let Err(err) = accept_to_pool(
            chain,
            pool,
            policy,
            verifier,
            tx.clone(),
            &resurrect_opts,
        ) {
            smartd_log::log_debug!("disconnected tx not resurrected: {}", err.message);
        }
    }

    remove_for_reorg(chain, pool);
}

/// Re-evaluate cached lock points and coinbase maturity against the current
/// tip, removing entries that can no longer make the next block.
pub fn remove_for_reorg<S: KeyValueStore>(chain: &mut ChainState<S>, pool: &mut Mempool) {
    let next_height = chain.tip_height() + 1;
    let tip_mtp = chain.tip_mtp();
    let csv_active = chain.csv_active_next_block();
    let lock_cutoff = chain.next_block_lock_time_cutoff();
    let lock_flags = if csv_active {
        STANDARD_LOCKTIME_VERIFY_FLAGS
    } else {
        0
    };

    let chain_ref = &*chain;
    let view = chain_ref.coins_view();
    pool.remove_where(|entry| {
        if !is_final_tx(&entry.tx, next_height, lock_cutoff) {
            return true;
        }

        let pinning_valid = entry
            .lock_points
            .pinning_block
            .map(|hash| chain_ref.chain_contains_hash(&hash))
            .unwrap_or(entry.lock_points.max_input_height == 0);
        let locks_ok = if pinning_valid {
            evaluate_sequence_locks(
                next_height,
                tip_mtp,
                &SequenceLocks {
                    min_height: entry.lock_points.height,
                    min_time: entry.lock_points.time,
                },
            )
        } else {
            let mut prev_heights = Vec::with_capacity(entry.tx.vin.len());
            let mut resolvable = true;
            for input in &entry.tx.vin {
                match view.coin(&input.prevout) {
                    Ok(Some(coin)) => prev_heights.push(coin.height as i32),
                    _ => {
                        // Parent still in the pool anchors at the spending
                        // height; anything else is unresolvable.
                        if entry.parents.contains(&input.prevout.txid) {
                            prev_heights.push(next_height);
                        } else {
                            resolvable = false;
                            break;
                        }
                    }
                }
            }
            resolvable && {
                let locks =
                    calculate_sequence_locks(&entry.tx, lock_flags, &prev_heights, |height| {
                        chain_ref.prior_mtp(height)
                    });
                evaluate_sequence_locks(next_height, tip_mtp, &locks)
            }
        };
        if !locks_ok {
            return true;
        }

        if entry.spends_coinbase {
            for input in &entry.tx.vin {
                if let Ok(Some(coin)) = view.coin(&input.prevout) {
                    if coin.is_coinbase
                        && i64::from(next_height) - i64::from(coin.height)
                            < i64::from(COINBASE_MATURITY)
                    {
                        return true;
                    }
                }
            }
        }
        false
    });
}
