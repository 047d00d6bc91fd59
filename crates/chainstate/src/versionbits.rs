//! Soft-fork activation state: the version-bits threshold machine and the
//! legacy super-majority version gates.

use std::collections::HashMap;

use smartd_consensus::params::ConsensusParams;
use smartd_consensus::softfork::{signals_bit, Deployment, DeploymentSchedule, ThresholdState};
use smartd_consensus::Hash256;

use crate::blockindex::{BlockIndex, EntryId};

/// Threshold states memoized per (deployment, window-start hash). State is a
/// pure function of that pair, so entries never invalidate.
#[derive(Default)]
pub struct VersionBitsCache {
    states: HashMap<(Deployment, Hash256), ThresholdState>,
}

impl VersionBitsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// State of `deployment` for a block whose parent is `prev`.
pub fn deployment_state(
    index: &BlockIndex,
    cache: &mut VersionBitsCache,
    prev: Option<EntryId>,
    params: &ConsensusParams,
    deployment: Deployment,
) -> ThresholdState {
    let schedule = params.deployment(deployment);
    if schedule.start_time == DeploymentSchedule::ALWAYS_ACTIVE {
        return ThresholdState::Active;
    }

    let period = params.miner_confirmation_window as i32;
    let threshold = params.rule_change_activation_threshold;

    // Walk back to window boundaries until a cached state or the start of
    // the chain, then replay forward.
    let mut boundary = prev.and_then(|prev_id| {
        let height = index.get(prev_id).height;
        let target = height - ((height + 1) % period);
        index.ancestor(prev_id, target)
    });

    let mut to_compute: Vec<EntryId> = Vec::new();
    let mut state = ThresholdState::Defined;
    while let Some(id) = boundary {
        let entry = index.get(id);
        if let Some(cached) = cache.states.get(&(deployment, entry.hash)) {
            state = *cached;
            break;
        }
        if index.median_time_past(id) < schedule.start_time {
            // Optimization: everything before the start time is Defined.
            cache.states.insert((deployment, entry.hash), ThresholdState::Defined);
            break;
        }
        to_compute.push(id);
        boundary = index.ancestor(id, entry.height - period);
    }

    for id in to_compute.into_iter().rev() {
        let entry = index.get(id);
        let mtp = index.median_time_past(id);
        state = match state {
            ThresholdState::Defined => {
                if mtp >= schedule.timeout {
                    ThresholdState::Failed
                } else if mtp >= schedule.start_time {
                    ThresholdState::Started
                } else {
                    ThresholdState::Defined
                }
            }
            ThresholdState::Started => {
                if mtp >= schedule.timeout {
                    ThresholdState::Failed
                } else {
                    let signalling = count_signalling(index, id, schedule.bit, period);
                    if signalling >= threshold {
                        ThresholdState::LockedIn
                    } else {
                        ThresholdState::Started
                    }
                }
            }
            ThresholdState::LockedIn => ThresholdState::Active,
            terminal @ (ThresholdState::Active | ThresholdState::Failed) => terminal,
        };
        cache.states.insert((deployment, entry.hash), state);
    }

    state
}

pub fn deployment_active(
    index: &BlockIndex,
    cache: &mut VersionBitsCache,
    prev: Option<EntryId>,
    params: &ConsensusParams,
    deployment: Deployment,
) -> bool {
    deployment_state(index, cache, prev, params, deployment) == ThresholdState::Active
}

fn count_signalling(index: &BlockIndex, window_end: EntryId, bit: u8, period: i32) -> u32 {
    let mut count = 0u32;
    let mut current = Some(window_end);
    for _ in 0..period {
        let Some(id) = current else {
            break;
        };
        let entry = index.get(id);
        if signals_bit(entry.version, bit) {
            count += 1;
        }
        current = entry.prev;
    }
    count
}

/// Whether at least `required` of the `window` blocks ending at `start`
/// carry a version of at least `min_version`.
pub fn is_super_majority(
    min_version: i32,
    index: &BlockIndex,
    start: Option<EntryId>,
    required: u32,
    window: usize,
) -> bool {
    let mut found = 0u32;
    let mut current = start;
    for _ in 0..window {
        if found >= required {
            return true;
        }
        let Some(id) = current else {
            break;
        };
        let entry = index.get(id);
        if entry.version >= min_version {
            found += 1;
        }
        current = entry.prev;
    }
    found >= required
}
