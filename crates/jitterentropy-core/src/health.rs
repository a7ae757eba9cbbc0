//! Online health tests of the raw noise source (SP 800-90B section 4.4).
//!
//! Every timing delta passes through [`HealthMonitor::stuck`], which runs
//! the stuck detector, feeds the Adaptive Proportion Test and feeds the
//! Repetition Count Test. Failures latch: once a test has failed the monitor
//! reports failure until it is dropped.

use serde::Serialize;
use zeroize::Zeroize;

use crate::config::HealthPolicy;
use crate::noise::delta;

/// Observations per APT window.
pub const APT_WINDOW_SIZE: u32 = 512;
/// Matches of the window base value at which the APT fails.
///
/// Cutoff for H = 1 bit per sample at alpha = 2^-30.
pub const APT_CUTOFF: u32 = 325;
/// Only the low bits of each delta are compared by the APT.
pub const APT_WORD_MASK: u64 = 0xF;
/// The RCT fails after `RCT_CUTOFF_PER_OSR * osr` consecutive stuck samples.
pub const RCT_CUTOFF_PER_OSR: u32 = 30;

/// Terminal value of the RCT counter.
const RCT_FAILED: i32 = -1;

/// Which health test tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthTest {
    RepetitionCount,
    AdaptiveProportion,
}

impl std::fmt::Display for HealthTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RepetitionCount => write!(f, "repetition count test"),
            Self::AdaptiveProportion => write!(f, "adaptive proportion test"),
        }
    }
}

// ---------------------------------------------------------------------------
// Adaptive Proportion Test
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Zeroize)]
struct AdaptiveProportion {
    count: u32,
    base: u64,
    base_set: bool,
    observations: u32,
}

impl AdaptiveProportion {
    fn reset(&mut self, masked: u64) {
        self.count = 0;
        self.base = masked;
        self.observations = 0;
    }

    /// Feed one masked delta. Returns true when the cutoff is reached.
    fn insert(&mut self, masked: u64) -> bool {
        if !self.base_set {
            self.base = masked;
            self.base_set = true;
            return false;
        }

        let mut tripped = false;
        if masked == self.base {
            self.count += 1;
            tripped = self.count >= APT_CUTOFF;
        }

        self.observations += 1;
        if self.observations >= APT_WINDOW_SIZE {
            self.reset(masked);
        }
        tripped
    }
}

// ---------------------------------------------------------------------------
// Repetition Count Test
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Zeroize)]
struct RepetitionCount {
    count: i32,
}

impl RepetitionCount {
    fn failed(&self) -> bool {
        self.count < 0
    }

    /// Cutoff for `osr`, capped so the counter cannot overflow before it.
    fn cutoff(osr: u32) -> i32 {
        i32::try_from(RCT_CUTOFF_PER_OSR.saturating_mul(osr)).unwrap_or(i32::MAX)
    }

    /// Feed one stuck verdict.
    fn insert(&mut self, stuck: bool, osr: u32) {
        if self.failed() {
            return;
        }
        if !stuck {
            self.count = 0;
            return;
        }
        self.count += 1;
        if self.count >= Self::cutoff(osr) {
            self.count = RCT_FAILED;
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Stuck detector plus APT and RCT state of one collector.
///
/// Holds the previous first and second derivatives of the timing deltas,
/// which are derived from secret timing data and are scrubbed with the rest
/// of the collector state.
#[derive(Zeroize)]
pub struct HealthMonitor {
    last_delta: u64,
    last_delta2: u64,
    apt: AdaptiveProportion,
    rct: RepetitionCount,
    apt_failed: bool,
    #[zeroize(skip)]
    osr: u32,
}

impl HealthMonitor {
    pub fn new(osr: u32) -> Self {
        Self {
            last_delta: 0,
            last_delta2: 0,
            apt: AdaptiveProportion::default(),
            rct: RepetitionCount::default(),
            apt_failed: false,
            osr: osr.max(1),
        }
    }

    /// Classify `current` and feed the APT and RCT.
    ///
    /// A delta is stuck when its first, second or third discrete derivative
    /// is zero. Stuck deltas are not credited with entropy.
    pub fn stuck(&mut self, current: u64) -> bool {
        let delta2 = delta(self.last_delta, current);
        let delta3 = delta(self.last_delta2, delta2);
        self.last_delta = current;
        self.last_delta2 = delta2;

        let healthy = !self.is_failed();
        if self.apt.insert(current & APT_WORD_MASK) {
            self.apt_failed = true;
        }

        let stuck = current == 0 || delta2 == 0 || delta3 == 0;
        self.rct.insert(stuck, self.osr);

        if healthy {
            if let Some(test) = self.failure() {
                log::warn!("noise source health failure: {test}");
            }
        }
        stuck
    }

    /// Start a fresh APT window with `masked` as its base value.
    pub fn reset_apt(&mut self, masked: u64) {
        self.apt.reset(masked & APT_WORD_MASK);
    }

    /// First latched failure, if any.
    pub fn failure(&self) -> Option<HealthTest> {
        if self.rct.failed() {
            Some(HealthTest::RepetitionCount)
        } else if self.apt_failed {
            Some(HealthTest::AdaptiveProportion)
        } else {
            None
        }
    }

    pub fn is_failed(&self) -> bool {
        self.apt_failed || self.rct.failed()
    }

    pub fn rct_failed(&self) -> bool {
        self.rct.failed()
    }

    pub fn osr(&self) -> u32 {
        self.osr
    }

    /// Snapshot for reporting.
    pub fn status(&self, policy: HealthPolicy) -> HealthStatus {
        HealthStatus {
            policy,
            failure: self.failure(),
            rct_count: self.rct.count,
            apt_count: self.apt.count,
            apt_observations: self.apt.observations,
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("osr", &self.osr)
            .field("failure", &self.failure())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of the health tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub policy: HealthPolicy,
    pub failure: Option<HealthTest>,
    /// Consecutive stuck samples, or -1 once the RCT has failed.
    pub rct_count: i32,
    pub apt_count: u32,
    pub apt_observations: u32,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.failure.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Irregular deltas that rarely look stuck.
    fn lively(n: usize) -> Vec<u64> {
        let mut out = Vec::with_capacity(n);
        let mut d = 1000u64;
        for i in 0..n as u64 {
            d += 1 + (i * i) % 7 + i % 16;
            out.push(d ^ (i % 16));
        }
        out
    }

    #[test]
    fn zero_delta_is_stuck() {
        let mut h = HealthMonitor::new(1);
        assert!(!h.stuck(500));
        assert!(h.stuck(0));
    }

    #[test]
    fn repeated_delta_is_stuck() {
        let mut h = HealthMonitor::new(1);
        h.stuck(100);
        h.stuck(250);
        assert!(h.stuck(250), "second derivative zero");
    }

    #[test]
    fn constant_slope_is_stuck() {
        let mut h = HealthMonitor::new(1);
        h.stuck(100);
        h.stuck(200);
        assert!(h.stuck(300), "third derivative zero");
    }

    #[test]
    fn first_sample_against_zero_history() {
        let mut h = HealthMonitor::new(1);
        // delta2 = 42, delta3 = 42: not stuck.
        assert!(!h.stuck(42));
    }

    #[test]
    fn rct_trips_at_thirty_times_osr() {
        for osr in [1u32, 3] {
            let mut h = HealthMonitor::new(osr);
            h.stuck(7);
            let cutoff = (RCT_CUTOFF_PER_OSR * osr) as usize;
            // Every repeated 7 is stuck.
            for _ in 0..cutoff - 1 {
                assert!(h.stuck(7));
            }
            assert!(!h.rct_failed());
            h.stuck(7);
            assert!(h.rct_failed());
            assert_eq!(h.failure(), Some(HealthTest::RepetitionCount));
            assert_eq!(h.status(HealthPolicy::Enforce).rct_count, -1);
        }
    }

    #[test]
    fn rct_cutoff_saturates_for_huge_osr() {
        assert_eq!(RepetitionCount::cutoff(1), 30);
        assert_eq!(RepetitionCount::cutoff(100_000_000), i32::MAX);
        assert_eq!(RepetitionCount::cutoff(u32::MAX), i32::MAX);

        let mut rct = RepetitionCount { count: i32::MAX - 1 };
        rct.insert(true, u32::MAX);
        assert!(rct.failed());
        rct.insert(true, u32::MAX);
        assert_eq!(rct.count, RCT_FAILED);
    }

    #[test]
    fn rct_resets_on_lively_sample() {
        let mut h = HealthMonitor::new(1);
        h.stuck(7);
        for _ in 0..30 {
            h.stuck(7);
        }
        assert!(h.rct_failed());

        let mut h = HealthMonitor::new(1);
        h.stuck(7);
        for _ in 0..20 {
            h.stuck(7);
        }
        assert!(!h.stuck(1000));
        assert_eq!(h.status(HealthPolicy::Enforce).rct_count, 0);
    }

    #[test]
    fn rct_failure_is_permanent() {
        let mut h = HealthMonitor::new(1);
        for _ in 0..40 {
            h.stuck(0);
        }
        assert!(h.rct_failed());
        for d in lively(100) {
            h.stuck(d);
        }
        assert!(h.rct_failed());
        assert!(h.is_failed());
    }

    #[test]
    fn apt_counts_matches_after_base() {
        let mut apt = AdaptiveProportion::default();
        assert!(!apt.insert(3));
        assert_eq!(apt.observations, 0, "base sample is not an observation");
        for _ in 0..APT_CUTOFF - 1 {
            assert!(!apt.insert(3));
        }
        assert_eq!(apt.count, APT_CUTOFF - 1);
        assert!(apt.insert(3));
    }

    #[test]
    fn apt_window_resets() {
        let mut apt = AdaptiveProportion::default();
        apt.insert(1);
        for i in 0..APT_WINDOW_SIZE as u64 {
            apt.insert(if i % 2 == 0 { 1 } else { 2 });
        }
        assert_eq!(apt.observations, 0);
        assert_eq!(apt.count, 0);
    }

    #[test]
    fn apt_trips_on_dominant_nibble() {
        // Low nibble always 5, higher bits vary so the stuck test stays quiet.
        let mut h = HealthMonitor::new(1);
        let mut tripped_at = None;
        for i in 0..400u64 {
            h.stuck(((i * i + 3 * i + 1) << 4) | 5);
            if tripped_at.is_none() && h.is_failed() {
                tripped_at = Some(i);
            }
        }
        // Base sample plus 325 matches.
        assert_eq!(tripped_at, Some(APT_CUTOFF as u64));
        assert_eq!(h.failure(), Some(HealthTest::AdaptiveProportion));
        assert!(!h.rct_failed());
    }

    #[test]
    fn apt_just_below_cutoff_passes() {
        let mut h = HealthMonitor::new(1);
        for i in 0..APT_CUTOFF as u64 {
            h.stuck(((i * i + 3 * i + 1) << 4) | 5);
        }
        assert!(!h.is_failed());
    }

    #[test]
    fn lively_source_stays_healthy() {
        let mut h = HealthMonitor::new(1);
        for d in lively(5000) {
            h.stuck(d);
        }
        assert!(h.status(HealthPolicy::RecordOnly).is_healthy());
    }

    #[test]
    fn zeroize_clears_history_and_failure() {
        let mut h = HealthMonitor::new(2);
        for _ in 0..100 {
            h.stuck(0);
        }
        h.zeroize();
        assert!(!h.is_failed());
        assert!(!h.rct_failed());
        assert_eq!(h.osr(), 2);
    }
}
