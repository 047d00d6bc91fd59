//! Version-bits soft-fork deployment definitions.

/// Blocks signalling via version bits carry these top bits.
pub const VERSIONBITS_TOP_BITS: u32 = 0x2000_0000;
/// Mask selecting the top bits of a signalling version.
pub const VERSIONBITS_TOP_MASK: u32 = 0xe000_0000;
/// Number of usable deployment bits.
pub const VERSIONBITS_NUM_BITS: u8 = 29;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Deployment {
    TestDummy = 0,
    Csv = 1,
}

pub const MAX_DEPLOYMENTS: usize = 2;

pub const ALL_DEPLOYMENTS: [Deployment; MAX_DEPLOYMENTS] =
    [Deployment::TestDummy, Deployment::Csv];

impl Deployment {
    pub const fn as_usize(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Deployment::TestDummy => "testdummy",
            Deployment::Csv => "csv",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DeploymentSchedule {
    pub bit: u8,
    pub start_time: i64,
    pub timeout: i64,
}

impl DeploymentSchedule {
    /// Start-time marker for deployments that are active from genesis.
    pub const ALWAYS_ACTIVE: i64 = -1;
    pub const NO_TIMEOUT: i64 = i64::MAX;

    pub const fn disabled(bit: u8) -> Self {
        Self {
            bit,
            start_time: i64::MAX,
            timeout: i64::MAX,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThresholdState {
    Defined,
    Started,
    LockedIn,
    Active,
    Failed,
}

/// Whether a header version signals the given deployment bit.
pub fn signals_bit(version: i32, bit: u8) -> bool {
    let version = version as u32;
    (version & VERSIONBITS_TOP_MASK) == VERSIONBITS_TOP_BITS && (version >> bit) & 1 == 1
}
