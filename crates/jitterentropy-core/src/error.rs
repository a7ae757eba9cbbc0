//! Error types for collector operations and the initialization self-test.
//!
//! Both enums carry the numeric codes C callers of the collector expect:
//! negative codes for reads, positive codes for the self-test.

use thiserror::Error;

/// Failure of a collector operation.
///
/// Health failures are permanent for the collector that reported them. The
/// only recovery is to drop the instance and allocate a new one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The collector handle is null or already released.
    #[error("invalid entropy collector")]
    InvalidCollector,

    /// The Repetition Count Test saw too many consecutive stuck samples.
    #[error("repetition count test failed: noise source is stuck")]
    RepetitionCount,

    /// A health test other than the RCT (the Adaptive Proportion Test) failed.
    #[error("adaptive proportion test failed: noise source repeats one value too often")]
    HealthFailure,

    /// The supplied configuration cannot describe a working collector.
    #[error("invalid collector configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Legacy negative return code.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidCollector => -1,
            Self::RepetitionCount => -2,
            Self::HealthFailure => -3,
            Self::InvalidConfig { .. } => -4,
        }
    }
}

/// Failure of the one-shot initialization self-test.
///
/// Every variant maps to a distinct positive code. Codes 4, 5 and 7 are
/// reserved and never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelfTestError {
    /// A timestamp read returned zero.
    #[error("timer service not available")]
    NoTimer,

    /// Back-to-back reads did not differ, or too many deltas are multiples of 100.
    #[error("timer too coarse for the jitter collector")]
    CoarseTimer,

    /// Time went backwards more than three times.
    #[error("timer is not monotonic increasing")]
    NotMonotonic,

    /// The summed variation of successive deltas is at most one tick.
    #[error("timer variations of variations are too small")]
    MinVarVar,

    /// More than 90% of the measurements were stuck.
    #[error("too many stuck measurements during initialization")]
    Stuck,

    /// The Adaptive Proportion Test failed during the self-test.
    #[error("health test failed during initialization")]
    Health,

    /// The Repetition Count Test failed during the self-test.
    #[error("repetition count test failed during initialization")]
    RepetitionCount,
}

impl SelfTestError {
    /// Distinct positive code of this failure mode. Success is 0.
    pub fn code(&self) -> i32 {
        match self {
            Self::NoTimer => 1,
            Self::CoarseTimer => 2,
            Self::NotMonotonic => 3,
            Self::MinVarVar => 6,
            Self::Stuck => 8,
            Self::Health => 9,
            Self::RepetitionCount => 10,
        }
    }
}
