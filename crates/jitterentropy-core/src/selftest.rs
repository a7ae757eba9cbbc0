//! Initialization self-test of the timer and noise source.
//!
//! Runs the noise work `CLEAR_CACHE + TEST_LOOP_COUNT` times, timing each
//! round, and rejects timers that are missing, too coarse, not monotonic,
//! too regular or stuck. Run it once before trusting a platform.

use serde::Serialize;

use crate::collector::Collector;
use crate::config::{CollectorConfig, Flags};
use crate::error::SelfTestError;
use crate::health::{APT_WINDOW_SIZE, APT_WORD_MASK};
use crate::noise::delta;
use crate::timer::{CycleTimer, Timer};

/// Rounds that are evaluated.
pub const TEST_LOOP_COUNT: u32 = 1024;
/// Warm-up rounds that are executed but not evaluated.
pub const CLEAR_CACHE: u32 = 100;

/// Backward steps tolerated before the timer counts as non-monotonic.
const MAX_BACKWARDS: u32 = 3;
/// At most 90% of the evaluated rounds may be stuck or divisible by 100.
const MAX_SUSPICIOUS: u32 = TEST_LOOP_COUNT / 10 * 9;

/// Statistics of a passed self-test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelfTestReport {
    /// Rounds evaluated after warm-up.
    pub rounds: u32,
    pub backwards: u32,
    pub stuck: u32,
    /// Rounds whose low 32 bits of `t2 - t1` were a multiple of 100.
    pub multiples_of_100: u32,
    /// Sum of absolute differences between successive deltas.
    pub delta_variation: u64,
}

/// Self-test the platform cycle counter.
pub fn self_test() -> Result<SelfTestReport, SelfTestError> {
    self_test_with_timer(CycleTimer::new())
}

/// Self-test an arbitrary timer.
pub fn self_test_with_timer<T: Timer>(timer: T) -> Result<SelfTestReport, SelfTestError> {
    let config = CollectorConfig::new(1, Flags::DISABLE_MEMORY_ACCESS);
    let mut ec = Collector::unseeded(&config, timer).map_err(|_| SelfTestError::NoTimer)?;

    let mut report = SelfTestReport::default();
    let mut non_stuck = 0u32;
    let mut old_delta = 0u64;

    for round in 0..TEST_LOOP_COUNT + CLEAR_CACHE {
        let (t1, t2) = ec.timed_cycle();
        if t1 == 0 || t2 == 0 {
            return Err(SelfTestError::NoTimer);
        }
        let current = delta(t1, t2);
        if current == 0 {
            return Err(SelfTestError::CoarseTimer);
        }

        let health = ec.health_mut();
        let stuck = health.stuck(current);

        if round < CLEAR_CACHE {
            continue;
        }
        report.rounds += 1;

        if stuck {
            report.stuck += 1;
        } else {
            non_stuck += 1;
            // Every full window of non-stuck samples the APT is restarted and
            // evaluated. The RCT is checked below on every round.
            if non_stuck % APT_WINDOW_SIZE == 0 {
                if health.is_failed() && !health.rct_failed() {
                    return Err(SelfTestError::Health);
                }
                health.reset_apt(current & APT_WORD_MASK);
            }
        }

        if health.rct_failed() {
            return Err(SelfTestError::RepetitionCount);
        }

        if t2 <= t1 {
            report.backwards += 1;
        }
        if (t2 as u32).wrapping_sub(t1 as u32) % 100 == 0 {
            report.multiples_of_100 += 1;
        }

        report.delta_variation = report
            .delta_variation
            .saturating_add(current.abs_diff(old_delta));
        old_delta = current;
    }

    log::debug!("self-test statistics: {report:?}");

    // An APT failure after the last full window is not seen inside the loop.
    if ec.health_mut().is_failed() {
        return Err(SelfTestError::Health);
    }

    if report.backwards > MAX_BACKWARDS {
        return Err(SelfTestError::NotMonotonic);
    }
    if report.delta_variation <= 1 {
        return Err(SelfTestError::MinVarVar);
    }
    if report.multiples_of_100 > MAX_SUSPICIOUS {
        return Err(SelfTestError::CoarseTimer);
    }
    if report.stuck > MAX_SUSPICIOUS {
        return Err(SelfTestError::Stuck);
    }
    Ok(report)
}
