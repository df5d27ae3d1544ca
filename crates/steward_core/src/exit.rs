//! Process and operation exit codes.
//!
//! The sysexits-style range (64..=78) matches what wrapper tooling
//! expects; the extended range carries cluster-specific outcomes.

use serde::{Deserialize, Serialize};

/// Why a process or operation exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitStatus {
    /// Success
    Ok = 0,
    /// Generic error
    Error = 1,
    /// Invalid parameter
    InvalidParam = 2,
    /// Feature not implemented
    UnimplementFeature = 3,
    /// Insufficient privileges
    InsufficientPriv = 4,
    /// Dependency not installed
    NotInstalled = 5,
    /// Not configured
    NotConfigured = 6,
    /// Service not running
    NotRunning = 7,
    /// Resource is promoted
    Promoted = 8,
    /// Resource failed while promoted
    FailedPromoted = 9,
    /// Command line usage error
    Usage = 64,
    /// Bad input data
    DataErr = 65,
    /// Missing input
    NoInput = 66,
    /// Cluster unavailable
    Unavailable = 69,
    /// Internal software error
    Software = 70,
    /// Operating system error
    OsErr = 71,
    /// Cannot create output
    CantCreat = 73,
    /// I/O error
    IoErr = 74,
    /// Temporary failure, retry may succeed
    TempFail = 75,
    /// Protocol violation
    Protocol = 76,
    /// Permission denied
    NoPerm = 77,
    /// Configuration error
    Config = 78,
    /// Fatal error, do not respawn
    Fatal = 100,
    /// Panic, immediate abort
    Panic = 101,
    /// Lost connection to the cluster
    Disconnect = 102,
    /// Update rejected as older than current state
    Old = 103,
    /// Digest comparison failed
    Digest = 104,
    /// No such object
    NoSuch = 105,
    /// Quorum required but absent
    Quorum = 106,
    /// Operation unsafe without quorum
    Unsafe = 107,
    /// Object already exists
    Exists = 108,
    /// Multiple matches where one expected
    Multiple = 109,
    /// Requested item has expired
    Expired = 110,
    /// Requested item is not yet in effect
    NotYetInEffect = 111,
    /// Result indeterminate
    Indeterminate = 112,
    /// Constraints unsatisfied
    Unsatisfied = 113,
    /// Operation timed out
    Timeout = 124,
    /// Service active but degraded
    Degraded = 190,
    /// Service promoted but degraded
    DegradedPromoted = 191,
}

impl ExitStatus {
    /// The process exit code for this status
    #[must_use]
    pub const fn code(&self) -> i32 {
        *self as i32
    }

    /// Map a raw code back to a status, defaulting unknown codes to
    /// [`ExitStatus::Error`]
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Error,
            2 => Self::InvalidParam,
            3 => Self::UnimplementFeature,
            4 => Self::InsufficientPriv,
            5 => Self::NotInstalled,
            6 => Self::NotConfigured,
            7 => Self::NotRunning,
            8 => Self::Promoted,
            9 => Self::FailedPromoted,
            64 => Self::Usage,
            65 => Self::DataErr,
            66 => Self::NoInput,
            69 => Self::Unavailable,
            70 => Self::Software,
            71 => Self::OsErr,
            73 => Self::CantCreat,
            74 => Self::IoErr,
            75 => Self::TempFail,
            76 => Self::Protocol,
            77 => Self::NoPerm,
            78 => Self::Config,
            100 => Self::Fatal,
            101 => Self::Panic,
            102 => Self::Disconnect,
            103 => Self::Old,
            104 => Self::Digest,
            105 => Self::NoSuch,
            106 => Self::Quorum,
            107 => Self::Unsafe,
            108 => Self::Exists,
            109 => Self::Multiple,
            110 => Self::Expired,
            111 => Self::NotYetInEffect,
            112 => Self::Indeterminate,
            113 => Self::Unsatisfied,
            124 => Self::Timeout,
            190 => Self::Degraded,
            191 => Self::DegradedPromoted,
            _ => Self::Error,
        }
    }

    /// Whether an agent result with this status counts as success for
    /// the operation's expectations
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok | Self::Promoted | Self::Degraded | Self::DegradedPromoted)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
