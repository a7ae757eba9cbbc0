//! Collector configuration.
//!
//! Everything a caller can choose at allocation time lives in
//! [`CollectorConfig`]. The struct is serde-friendly so front-ends can load it
//! from a file; every field has a default so partial documents work.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default number of memory blocks touched by the memory noise source.
pub const MEMORY_BLOCKS: usize = 64;
/// Default size of one memory block in bytes.
pub const MEMORY_BLOCK_SIZE: usize = 32;
/// Default number of memory accesses per measurement before loop shuffling.
pub const MEMORY_ACCESS_LOOPS: u64 = 128;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Allocation flags.
///
/// Bits this crate does not recognise are kept but ignored, so flag words
/// written for other collector builds still allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(u32);

impl Flags {
    /// No flags set.
    pub const NONE: Flags = Flags(0);
    /// Do not allocate the memory noise buffer; only CPU jitter is harvested.
    pub const DISABLE_MEMORY_ACCESS: Flags = Flags(1 << 2);

    pub const fn from_bits(bits: u32) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Health policy
// ---------------------------------------------------------------------------

/// What a latched health-test failure means for reads.
///
/// The tests always run. `Enforce` (FIPS behaviour) makes a failure fatal for
/// the collector; `RecordOnly` keeps serving bytes and only exposes the
/// failure through [`crate::Collector::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthPolicy {
    #[default]
    Enforce,
    RecordOnly,
}

impl std::fmt::Display for HealthPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enforce => write!(f, "enforce"),
            Self::RecordOnly => write!(f, "record_only"),
        }
    }
}

// ---------------------------------------------------------------------------
// Memory noise geometry
// ---------------------------------------------------------------------------

/// Shape of the buffer walked by the memory noise source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub blocks: usize,
    pub block_size: usize,
    /// Fixed accesses per measurement; the loop shuffle adds 1..=128 more.
    pub access_loops: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            blocks: MEMORY_BLOCKS,
            block_size: MEMORY_BLOCK_SIZE,
            access_loops: MEMORY_ACCESS_LOOPS,
        }
    }
}

impl MemoryConfig {
    /// Total buffer size in bytes, `None` on overflow.
    pub fn size(&self) -> Option<usize> {
        self.blocks.checked_mul(self.block_size)
    }
}

// ---------------------------------------------------------------------------
// Collector configuration
// ---------------------------------------------------------------------------

/// Allocation parameters of a [`crate::Collector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Oversample rate. Zero is treated as one.
    pub osr: u32,
    pub flags: Flags,
    pub health: HealthPolicy,
    pub memory: MemoryConfig,
    /// The collector state lives in protected memory; skip the extra block
    /// that is otherwise generated after every read.
    pub secure_memory: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            osr: 1,
            flags: Flags::NONE,
            health: HealthPolicy::Enforce,
            memory: MemoryConfig::default(),
            secure_memory: false,
        }
    }
}

impl CollectorConfig {
    /// Configuration equivalent to the classic `(osr, flags)` allocation call.
    pub fn new(osr: u32, flags: Flags) -> Self {
        Self {
            osr,
            flags,
            ..Self::default()
        }
    }

    pub fn with_health(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    /// Oversample rate with the minimum of one applied.
    pub fn effective_osr(&self) -> u32 {
        self.osr.max(1)
    }

    pub fn memory_enabled(&self) -> bool {
        !self.flags.contains(Flags::DISABLE_MEMORY_ACCESS)
    }

    /// Reject geometries the memory noise source cannot walk.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.memory_enabled() {
            return Ok(());
        }
        if self.memory.blocks == 0 {
            return Err(Error::InvalidConfig {
                reason: "memory block count is zero".into(),
            });
        }
        if self.memory.block_size == 0 {
            return Err(Error::InvalidConfig {
                reason: "memory block size is zero".into(),
            });
        }
        if self.memory.size().is_none() {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "memory size {} x {} overflows",
                    self.memory.blocks, self.memory.block_size
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_classic_collector() {
        let cfg = CollectorConfig::default();
        assert_eq!(cfg.osr, 1);
        assert!(cfg.memory_enabled());
        assert_eq!(cfg.memory.size(), Some(2048));
        assert_eq!(cfg.health, HealthPolicy::Enforce);
        assert!(!cfg.secure_memory);
    }

    #[test]
    fn zero_osr_is_normalized() {
        assert_eq!(CollectorConfig::new(0, Flags::NONE).effective_osr(), 1);
        assert_eq!(CollectorConfig::new(3, Flags::NONE).effective_osr(), 3);
    }

    #[test]
    fn flags_disable_memory() {
        let cfg = CollectorConfig::new(1, Flags::DISABLE_MEMORY_ACCESS);
        assert!(!cfg.memory_enabled());
    }

    #[test]
    fn unknown_flag_bits_are_ignored() {
        let flags = Flags::from_bits(0b11);
        assert!(!flags.contains(Flags::DISABLE_MEMORY_ACCESS));
        let cfg = CollectorConfig::new(1, flags | Flags::DISABLE_MEMORY_ACCESS);
        assert!(!cfg.memory_enabled());
        assert_eq!(cfg.flags.bits(), 0b111);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let mut cfg = CollectorConfig::default();
        cfg.memory.block_size = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn bad_geometry_is_fine_when_memory_disabled() {
        let mut cfg = CollectorConfig::new(1, Flags::DISABLE_MEMORY_ACCESS);
        cfg.memory.blocks = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overflowing_geometry_is_rejected() {
        let mut cfg = CollectorConfig::default();
        cfg.memory.blocks = usize::MAX;
        cfg.memory.block_size = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: CollectorConfig =
            serde_json::from_str(r#"{"osr": 4, "health": "record_only", "memory": {"blocks": 128}}"#)
                .unwrap();
        assert_eq!(cfg.osr, 4);
        assert_eq!(cfg.health, HealthPolicy::RecordOnly);
        assert_eq!(cfg.memory.blocks, 128);
        assert_eq!(cfg.memory.block_size, MEMORY_BLOCK_SIZE);
        assert_eq!(cfg.flags, Flags::NONE);
    }

    #[test]
    fn flags_serialize_as_plain_integer() {
        let cfg = CollectorConfig::new(1, Flags::DISABLE_MEMORY_ACCESS);
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["flags"], 4);
    }
}
