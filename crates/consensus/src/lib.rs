//! Consensus constants, chain parameters, subsidy schedule, and soft-fork
//! deployment definitions.

pub mod constants;
pub mod money;
pub mod params;
pub mod rewards;
pub mod softfork;

pub type Hash256 = [u8; 32];

pub use params::{chain_params, Checkpoint, ConsensusParams, Network};
pub use rewards::block_subsidy;
pub use softfork::{Deployment, DeploymentSchedule, ThresholdState, MAX_DEPLOYMENTS};
