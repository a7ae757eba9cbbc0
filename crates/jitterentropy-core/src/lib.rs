//! # jitterentropy-core
//!
//! Non-physical true random number generator built on CPU execution time
//! jitter.
//!
//! The collector repeatedly times a fixed amount of work (a walk over a
//! memory buffer plus an LFSR) with a high-resolution counter. The
//! fluctuations in those timings are the noise source. Every delta is
//! screened by online health tests and folded into a 64-bit entropy word;
//! `64 * osr` non-stuck deltas make one output block.
//!
//! ## Quick Start
//!
//! ```no_run
//! use jitterentropy_core::{Collector, Flags, self_test};
//!
//! // Check once that this platform's timer is usable.
//! self_test().expect("timer unsuitable for jitter entropy");
//!
//! let mut collector = Collector::new(1, Flags::NONE).unwrap();
//! let key = collector.read(32).unwrap();
//! assert_eq!(key.len(), 32);
//! ```
//!
//! ## Architecture
//!
//! Timer → delta → health tests (stuck / APT / RCT) → LFSR → 64-bit block
//!
//! Health failures latch. Under [`HealthPolicy::Enforce`] (the default) a
//! collector that failed never produces output again; drop it and allocate a
//! new one. Under [`HealthPolicy::RecordOnly`] failures are only reported
//! through [`Collector::health`].

pub mod analysis;
pub mod collector;
pub mod config;
pub mod error;
pub mod ffi;
pub mod health;
pub mod lfsr;
pub mod noise;
pub mod rng;
pub mod secure;
pub mod selftest;
pub mod timer;

pub use analysis::RawNoiseReport;
pub use collector::{BLOCK_BYTES, Collector, DATA_SIZE_BITS, RawSample};
pub use config::{CollectorConfig, Flags, HealthPolicy, MemoryConfig};
pub use error::{Error, SelfTestError};
pub use health::{HealthStatus, HealthTest};
pub use secure::SecureBuffer;
pub use selftest::{SelfTestReport, self_test, self_test_with_timer};
pub use timer::{CycleTimer, FnTimer, Timer};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const fn parse_decimal(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut value = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    value
}

const VERSION_NUMBER: u32 = parse_decimal(env!("CARGO_PKG_VERSION_MAJOR")) * 1_000_000
    + parse_decimal(env!("CARGO_PKG_VERSION_MINOR")) * 10_000
    + parse_decimal(env!("CARGO_PKG_VERSION_PATCH")) * 100;

/// Numeric library version, `major * 1_000_000 + minor * 10_000 + patch * 100`.
///
/// Larger values are newer releases.
pub fn version() -> u32 {
    VERSION_NUMBER
}
