//! Noise sources: timestamp deltas, loop shuffling and the memory walk.
//!
//! The entropy comes from the variation in how long a fixed amount of CPU
//! work takes. The work itself has two parts: a walk over a memory buffer
//! (cache and bus contention) and the LFSR conditioner in [`crate::lfsr`].
//! Both run a timer-dependent number of times so the duration of one
//! measurement is itself hard to predict.

use std::hint::black_box;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::MemoryConfig;
use crate::secure::SecureBuffer;
use crate::timer::Timer;

/// Loop-shuffle width for the memory walk: 1..=128 extra accesses.
pub const MEMORY_LOOP_BITS: u32 = 7;
/// Loop-shuffle width for the conditioner: 1..=16 extra rounds.
pub const LFSR_LOOP_BITS: u32 = 4;

/// Difference between two timestamps, tolerant of one counter wraparound.
///
/// `next < prev` is taken to mean the counter wrapped, so the result is
/// `u64::MAX - prev + 1 + next`, which is the modular difference.
#[inline(always)]
pub fn delta(prev: u64, next: u64) -> u64 {
    next.wrapping_sub(prev)
}

/// Timer-derived loop count in `[2^min, 2^bits - 1 + 2^min]`.
///
/// Reads the timer once, mixes in the current entropy word, and XOR-folds the
/// 64-bit result down to `bits` bits.
#[inline(never)]
pub fn loop_shuffle<T: Timer>(timer: &mut T, data: u64, bits: u32, min: u32) -> u64 {
    debug_assert!(bits > 0 && bits < 64);
    let mask = (1u64 << bits) - 1;
    let mut time = timer.now() ^ data;
    let mut shuffle = 0u64;
    for _ in 0..(64 + bits - 1) / bits {
        shuffle ^= time & mask;
        time >>= bits;
    }
    black_box(shuffle) + (1u64 << min)
}

// ---------------------------------------------------------------------------
// Memory walk
// ---------------------------------------------------------------------------

/// Memory access noise source.
///
/// Every access increments one byte and steps the location by
/// `block_size - 1`, wrapping around the whole buffer. Stepping by one less
/// than a block touches a different cache line on nearly every access.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct MemoryNoise {
    buf: SecureBuffer,
    location: usize,
    #[zeroize(skip)]
    block_size: usize,
    #[zeroize(skip)]
    access_loops: u64,
}

impl MemoryNoise {
    /// Allocate the walk buffer. The geometry must already be validated.
    pub fn new(geometry: &MemoryConfig) -> Option<Self> {
        let size = geometry.size()?;
        if size == 0 || geometry.block_size == 0 {
            return None;
        }
        Some(Self {
            buf: SecureBuffer::zeroed(size),
            location: 0,
            block_size: geometry.block_size,
            access_loops: geometry.access_loops,
        })
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Current walk position. Exposed for diagnostics and tests.
    pub fn location(&self) -> usize {
        self.location
    }

    /// Walk the buffer for the fixed access count plus `extra` accesses.
    #[inline(never)]
    pub fn access(&mut self, extra: u64) {
        let wrap = self.buf.len();
        let step = self.block_size - 1;
        let rounds = self.access_loops.saturating_add(extra);
        let base = self.buf.as_mut_slice().as_mut_ptr();
        for _ in 0..rounds {
            // SAFETY: `location < wrap == buf.len()` holds on entry and is
            // re-established by the modulo below. The buffer is owned by
            // `self` and no other reference to it is live.
            unsafe {
                let slot = base.add(self.location);
                let val = std::ptr::read_volatile(slot);
                std::ptr::write_volatile(slot, val.wrapping_add(1));
            }
            self.location = (self.location + step) % wrap;
        }
    }

    #[cfg(test)]
    pub(crate) fn bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::FnTimer;

    #[test]
    fn delta_is_plain_difference_without_wrap() {
        assert_eq!(delta(100, 250), 150);
        assert_eq!(delta(7, 7), 0);
    }

    #[test]
    fn delta_survives_counter_wraparound() {
        assert_eq!(delta(u64::MAX - 1, 3), 5);
        assert_eq!(delta(u64::MAX, 0), 1);
    }

    #[test]
    fn shuffle_stays_in_range() {
        let mut state = 0x1234_5678_9abc_def0u64;
        let mut timer = FnTimer(move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            state
        });
        for _ in 0..1000 {
            let lfsr = loop_shuffle(&mut timer, 0xfeed, LFSR_LOOP_BITS, 0);
            assert!((1..=16).contains(&lfsr), "lfsr loops {lfsr}");
            let mem = loop_shuffle(&mut timer, 0xfeed, MEMORY_LOOP_BITS, 0);
            assert!((1..=128).contains(&mem), "memory loops {mem}");
        }
    }

    #[test]
    fn shuffle_reads_timer_once() {
        let mut calls = 0u32;
        let mut timer = FnTimer(|| {
            calls += 1;
            0xabcdef_u64
        });
        loop_shuffle(&mut timer, 0, LFSR_LOOP_BITS, 0);
        drop(timer);
        assert_eq!(calls, 1);
    }

    #[test]
    fn shuffle_folds_all_nibbles() {
        // All sixteen nibbles equal to 1 cancel out pairwise.
        let mut timer = FnTimer(|| 0x1111_1111_1111_1111u64);
        assert_eq!(loop_shuffle(&mut timer, 0, 4, 0), 1);
        // Data is XORed in before folding.
        assert_eq!(loop_shuffle(&mut timer, 0x1, 4, 0), 1 + 1);
        assert_eq!(loop_shuffle(&mut timer, 0, 4, 3), 8);
    }

    #[test]
    fn memory_walk_counts_every_access() {
        let geometry = MemoryConfig {
            blocks: 4,
            block_size: 8,
            access_loops: 10,
        };
        let mut mem = MemoryNoise::new(&geometry).unwrap();
        mem.access(6);
        let total: u32 = mem.bytes().iter().map(|&b| u32::from(b)).sum();
        assert_eq!(total, 16);
        assert_eq!(mem.location(), (16 * 7) % 32);
    }

    #[test]
    fn memory_walk_wraps_bytes() {
        let geometry = MemoryConfig {
            blocks: 1,
            block_size: 1,
            access_loops: 256,
        };
        let mut mem = MemoryNoise::new(&geometry).unwrap();
        mem.access(1);
        assert_eq!(mem.bytes(), &[1]);
        assert_eq!(mem.location(), 0);
    }

    #[test]
    fn empty_geometry_has_no_memory_source() {
        let geometry = MemoryConfig {
            blocks: 0,
            block_size: 32,
            access_loops: 128,
        };
        assert!(MemoryNoise::new(&geometry).is_none());
    }

    #[test]
    fn zeroize_resets_buffer_and_location() {
        let mut mem = MemoryNoise::new(&MemoryConfig::default()).unwrap();
        mem.access(3);
        mem.zeroize();
        assert_eq!(mem.location(), 0);
        assert!(mem.bytes().iter().all(|&b| b == 0));
        assert_eq!(mem.size(), 2048);
    }
}
