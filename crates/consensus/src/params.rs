//! Consensus parameter definitions.

use crate::money::Amount;
use crate::softfork::{Deployment, DeploymentSchedule, MAX_DEPLOYMENTS};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: i32,
    pub hash: Hash256,
}

/// Historical blocks exempt from the duplicate-coinbase rule, inherited from
/// the ancestor chain. Preserved verbatim.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Bip30Exception {
    pub height: i32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub hash_genesis_block: Hash256,
    pub pow_limit: Hash256,
    pub pow_target_spacing: i64,
    pub pow_target_timespan: i64,
    pub pow_allow_min_difficulty_blocks: bool,
    pub pow_no_retargeting: bool,

    /// Super-majority gates for version-numbered soft forks: a version floor
    /// is enforced once `majority_reject_block_outdated` of the last
    /// `majority_window` blocks carry a higher version.
    pub majority_enforce_block_upgrade: u32,
    pub majority_reject_block_outdated: u32,
    pub majority_window: usize,

    /// P2SH evaluation applies to blocks at or after this timestamp.
    pub p2sh_activation_time: u32,

    pub rule_change_activation_threshold: u32,
    pub miner_confirmation_window: u32,
    pub deployments: [DeploymentSchedule; MAX_DEPLOYMENTS],

    pub bip30_exceptions: [Bip30Exception; 2],

    /// Subsidy schedule: `subsidy_base` coins per block below the flat-end
    /// height, a harmonic taper after it, nothing past the terminal height.
    pub subsidy_base: Amount,
    pub subsidy_flat_end_height: i32,
    pub subsidy_terminal_height: i32,

    /// Legacy zerocoin in/outputs are rejected from this height on.
    pub zerocoin_disable_height: i32,
    /// Smartnode payment validation applies from this height on.
    pub smartnode_start_height: i32,
    /// Block version whose super-majority activates the adaptive size limit.
    pub size_fork_version: i32,

    pub checkpoints: Vec<Checkpoint>,
}

impl ConsensusParams {
    pub fn difficulty_adjustment_interval(&self) -> i64 {
        self.pow_target_timespan / self.pow_target_spacing
    }

    pub fn deployment(&self, deployment: Deployment) -> &DeploymentSchedule {
        &self.deployments[deployment.as_usize()]
    }

    pub fn zerocoin_allowed(&self, height: i32) -> bool {
        height < self.zerocoin_disable_height
    }

    pub fn smartnode_payments_active(&self, height: i32) -> bool {
        height >= self.smartnode_start_height
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }
    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        let byte =
            u8::from_str_radix(&hex[start..start + 2], 16).map_err(|_| HexError::InvalidHex)?;
        *byte_out = byte;
    }
    // Display order is big-endian; internal order is little-endian.
    bytes.reverse();
    Ok(bytes)
}

fn required_hash(hex: &str) -> Hash256 {
    match hash256_from_hex(hex) {
        Ok(hash) => hash,
        Err(_) => panic!("invalid hard-coded hash literal"),
    }
}

pub fn chain_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_params(),
        Network::Testnet => testnet_params(),
        Network::Regtest => regtest_params(),
    }
}

fn bip30_exceptions() -> [Bip30Exception; 2] {
    [
        Bip30Exception {
            height: 91_842,
            hash: required_hash(
                "00000000000a4d0a398161ffc163c503763b1f4360639393e0e4c8e300e0caec",
            ),
        },
        Bip30Exception {
            height: 91_880,
            hash: required_hash(
                "00000000000743f190a18c5577a3c2d2a1f610ae9601ac046a38084ccb7cd721",
            ),
        },
    ]
}

fn mainnet_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        hash_genesis_block: required_hash(
            "000007acc6970b812948d14ea5a0a13db0fdd07d5047c7e69101fa8b361e05a4",
        ),
        pow_limit: required_hash(
            "00000fffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        ),
        pow_target_spacing: 55,
        pow_target_timespan: 55 * 2016,
        pow_allow_min_difficulty_blocks: false,
        pow_no_retargeting: false,
        majority_enforce_block_upgrade: 750,
        majority_reject_block_outdated: 950,
        majority_window: 1000,
        p2sh_activation_time: 1_333_238_400,
        rule_change_activation_threshold: 1916,
        miner_confirmation_window: 2016,
        deployments: mainnet_deployments(),
        bip30_exceptions: bip30_exceptions(),
        subsidy_base: 5_000,
        subsidy_flat_end_height: 143_500,
        subsidy_terminal_height: 717_499_999,
        zerocoin_disable_height: 266_765,
        smartnode_start_height: 300_000,
        size_fork_version: 5,
        checkpoints: vec![
            Checkpoint {
                height: 0,
                hash: required_hash(
                    "000007acc6970b812948d14ea5a0a13db0fdd07d5047c7e69101fa8b361e05a4",
                ),
            },
            Checkpoint {
                height: 90_000,
                hash: required_hash(
                    "000000000002b079d4d82db50e10ee35e1e41701d166f19b2a0337b31e0a773d",
                ),
            },
            Checkpoint {
                height: 300_000,
                hash: required_hash(
                    "0000000000294ee4e9d3b32c7b58a9b0f12e28e2c78f184ec33b4bb8e8c07bbf",
                ),
            },
        ],
    }
}

fn mainnet_deployments() -> [DeploymentSchedule; MAX_DEPLOYMENTS] {
    let mut deployments = [DeploymentSchedule::disabled(28); MAX_DEPLOYMENTS];
    deployments[Deployment::TestDummy.as_usize()] = DeploymentSchedule {
        bit: 28,
        start_time: 1_199_145_601,
        timeout: 1_230_767_999,
    };
    deployments[Deployment::Csv.as_usize()] = DeploymentSchedule {
        bit: 0,
        start_time: 1_462_060_800,
        timeout: 1_493_596_800,
    };
    deployments
}

fn testnet_params() -> ConsensusParams {
    let mut params = mainnet_params();
    params.network = Network::Testnet;
    params.hash_genesis_block = required_hash(
        "0000027b4e0d5a51e4acd50e29b88ed3474ae314ae97d40891ba0d1d7a9d9ada",
    );
    params.pow_allow_min_difficulty_blocks = true;
    params.majority_enforce_block_upgrade = 51;
    params.majority_reject_block_outdated = 75;
    params.majority_window = 100;
    params.rule_change_activation_threshold = 1512;
    params.zerocoin_disable_height = 0;
    params.smartnode_start_height = 1_000;
    params.checkpoints = vec![Checkpoint {
        height: 0,
        hash: params.hash_genesis_block,
    }];
    params
}

fn regtest_params() -> ConsensusParams {
    let mut deployments = [DeploymentSchedule::disabled(28); MAX_DEPLOYMENTS];
    deployments[Deployment::TestDummy.as_usize()] = DeploymentSchedule {
        bit: 28,
        start_time: 0,
        timeout: DeploymentSchedule::NO_TIMEOUT,
    };
    deployments[Deployment::Csv.as_usize()] = DeploymentSchedule {
        bit: 0,
        start_time: 0,
        timeout: DeploymentSchedule::NO_TIMEOUT,
    };
    ConsensusParams {
        network: Network::Regtest,
        // Regtest genesis is supplied by the embedder (tests mine their own).
        hash_genesis_block: [0u8; 32],
        pow_limit: required_hash(
            "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        ),
        pow_target_spacing: 55,
        pow_target_timespan: 55 * 2016,
        pow_allow_min_difficulty_blocks: true,
        pow_no_retargeting: true,
        majority_enforce_block_upgrade: 750,
        majority_reject_block_outdated: 950,
        majority_window: 1000,
        p2sh_activation_time: 0,
        rule_change_activation_threshold: 108,
        miner_confirmation_window: 144,
        deployments,
        bip30_exceptions: bip30_exceptions(),
        subsidy_base: 5_000,
        subsidy_flat_end_height: 150,
        subsidy_terminal_height: 717_499_999,
        zerocoin_disable_height: i32::MAX,
        smartnode_start_height: i32::MAX,
        size_fork_version: 5,
        checkpoints: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_parsing_reverses_to_internal_order() {
        let hash = hash256_from_hex(
            "00000000000a4d0a398161ffc163c503763b1f4360639393e0e4c8e300e0caec",
        )
        .expect("parse");
        // Last display byte is first internal byte.
        assert_eq!(hash[0], 0xec);
        assert_eq!(hash[31], 0x00);
    }

    #[test]
    fn hex_parsing_rejects_bad_input() {
        assert!(hash256_from_hex("abcd").is_err());
        assert!(hash256_from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn difficulty_interval() {
        let params = chain_params(Network::Mainnet);
        assert_eq!(params.difficulty_adjustment_interval(), 2016);
    }

    #[test]
    fn zerocoin_gate_boundary() {
        let params = chain_params(Network::Mainnet);
        assert!(params.zerocoin_allowed(266_764));
        assert!(!params.zerocoin_allowed(266_765));
    }
}
