//! LFSR conditioner.
//!
//! Each timing delta is shifted bit by bit into a 64-bit Fibonacci LFSR
//! seeded with the current entropy word. The feedback polynomial
//! x^64 + x^61 + x^56 + x^31 + x^28 + x^23 + 1 is primitive, so the map is a
//! bijection for a fixed delta and no entropy is lost.
//!
//! The conditioner is also a noise source: it is repeated a timer-dependent
//! number of times, and how long that takes is part of the next delta. The
//! repetitions recompute the same value, so they are hidden from the
//! optimizer with `black_box` and the function is never inlined.

use std::hint::black_box;

/// Zero-based tap positions, XORed into the incoming bit.
const TAPS: [u32; 6] = [63, 60, 55, 30, 27, 22];

/// Feed all 64 bits of `delta`, most significant first, into an LFSR seeded
/// with `data`, `loop_cnt` times over.
///
/// Every repetition starts again from `data`, so the result does not depend
/// on `loop_cnt` as long as it is at least one. With `loop_cnt == 0` the
/// input word is returned unchanged.
///
/// The bit order is MSB first on purpose. The classic C collector shifts the
/// delta in LSB first; outputs of the two are not expected to match.
#[inline(never)]
pub fn lfsr_mix(data: u64, delta: u64, loop_cnt: u64) -> u64 {
    let mut out = data;
    for _ in 0..black_box(loop_cnt) {
        let mut word = black_box(data);
        for bit in (0..64).rev() {
            let mut incoming = (delta >> bit) & 1;
            for tap in TAPS {
                incoming ^= (word >> tap) & 1;
            }
            word = (word << 1) ^ incoming;
        }
        out = black_box(word);
    }
    out
}

/// Mix `delta` into `*data` unless the measurement was stuck.
///
/// The LFSR work is performed either way so stuck and non-stuck
/// measurements take the same time.
#[inline(always)]
pub fn condition(data: &mut u64, delta: u64, loop_cnt: u64, stuck: bool) {
    let mixed = black_box(lfsr_mix(*data, delta, loop_cnt));
    if !stuck {
        *data = mixed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;

    #[test]
    fn deterministic() {
        let a = lfsr_mix(0x0123_4567_89ab_cdef, 0x1f2e_3d4c, 1);
        let b = lfsr_mix(0x0123_4567_89ab_cdef, 0x1f2e_3d4c, 1);
        assert_eq!(a, b);
        assert_ne!(a, 0x0123_4567_89ab_cdef);
    }

    #[test]
    fn repetitions_do_not_change_result() {
        let once = lfsr_mix(42, 0xdead_beef, 1);
        for loops in 2..=16 {
            assert_eq!(lfsr_mix(42, 0xdead_beef, loops), once);
        }
        assert_eq!(lfsr_mix(42, 0xdead_beef, 0), 42);
    }

    #[test]
    fn zero_state_zero_delta_is_fixed_point() {
        assert_eq!(lfsr_mix(0, 0, 1), 0);
    }

    #[test]
    fn single_delta_bit_reaches_state() {
        // The last bit fed in lands in bit 0 of the state.
        assert_eq!(lfsr_mix(0, 1, 1), 1);
        // The first bit fed in has been shifted all the way up.
        assert_eq!(lfsr_mix(0, 1 << 63, 1) >> 63, 1);
    }

    #[test]
    fn injective_in_state() {
        let mut rng = rand::rng();
        let delta: u64 = rng.random();
        let states: HashSet<u64> = (0..10_000).map(|_| rng.random()).collect();
        let outputs: HashSet<u64> = states.iter().map(|&s| lfsr_mix(s, delta, 1)).collect();
        assert_eq!(outputs.len(), states.len());
    }

    #[test]
    fn injective_in_delta() {
        let mut rng = rand::rng();
        let state: u64 = rng.random();
        let deltas: HashSet<u64> = (0..10_000).map(|_| rng.random()).collect();
        let outputs: HashSet<u64> = deltas.iter().map(|&d| lfsr_mix(state, d, 1)).collect();
        assert_eq!(outputs.len(), deltas.len());
    }

    #[test]
    fn every_delta_bit_changes_output() {
        let mut rng = rand::rng();
        let state: u64 = rng.random();
        let delta: u64 = rng.random();
        let base = lfsr_mix(state, delta, 1);
        for bit in 0..64 {
            let flipped = lfsr_mix(state, delta ^ (1 << bit), 1);
            let distance = (base ^ flipped).count_ones();
            assert!(distance >= 1, "bit {bit} lost");
            if bit >= 23 {
                // Fed early enough to pass a feedback tap.
                assert!(distance >= 2, "bit {bit} did not spread: {distance}");
            }
        }
    }

    #[test]
    fn bit_flip_spreads_over_a_delta_sequence() {
        let mut rng = rand::rng();
        let trials = 500;
        let mut total = 0u32;
        for _ in 0..trials {
            let state: u64 = rng.random();
            let deltas: [u64; 8] = rng.random();
            let flip = 1u64 << rng.random_range(0..64);
            let mut a = state;
            let mut b = state;
            for (i, &d) in deltas.iter().enumerate() {
                a = lfsr_mix(a, d, 1);
                b = lfsr_mix(b, if i == 0 { d ^ flip } else { d }, 1);
            }
            total += (a ^ b).count_ones();
        }
        let mean = f64::from(total) / f64::from(trials);
        assert!((24.0..=40.0).contains(&mean), "mean changed bits {mean}");
    }

    #[test]
    fn stuck_measurement_leaves_data_alone() {
        let mut data = 0x5555_aaaa_5555_aaaa;
        condition(&mut data, 0x1234, 3, true);
        assert_eq!(data, 0x5555_aaaa_5555_aaaa);
        condition(&mut data, 0x1234, 3, false);
        assert_eq!(data, lfsr_mix(0x5555_aaaa_5555_aaaa, 0x1234, 1));
    }
}
