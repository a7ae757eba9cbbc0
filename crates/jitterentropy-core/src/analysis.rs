//! Statistics over raw timing deltas.
//!
//! Used to judge a platform before trusting it: how many measurements are
//! stuck, how spread out the deltas are, and how much entropy the low byte
//! of each delta carries. Estimates here are quick single-pass figures, not
//! a full SP 800-90B assessment.

use serde::Serialize;

use crate::health::{APT_WORD_MASK, HealthMonitor, HealthTest};

/// Summary of a run of raw deltas.
#[derive(Debug, Clone, Serialize)]
pub struct RawNoiseReport {
    pub samples: usize,
    pub stuck: usize,
    pub stuck_fraction: f64,
    pub min_delta: u64,
    pub max_delta: u64,
    pub mean_delta: f64,
    /// Distinct values of the APT-masked low bits (at most 16).
    pub distinct_masked: usize,
    /// Shannon entropy of the low byte of each delta, bits per sample.
    pub shannon_low_byte: f64,
    /// Most-common-value min-entropy of the low byte, bits per sample.
    pub min_entropy_low_byte: f64,
    /// Lag-1 autocorrelation of the deltas.
    pub lag1_correlation: f64,
    /// Health failure the online tests would have raised on this run.
    pub health_failure: Option<HealthTest>,
}

impl RawNoiseReport {
    /// Replay `deltas` through a fresh health monitor (osr 1) and summarize.
    pub fn from_deltas(deltas: &[u64]) -> Self {
        let n = deltas.len();
        if n == 0 {
            return Self {
                samples: 0,
                stuck: 0,
                stuck_fraction: 0.0,
                min_delta: 0,
                max_delta: 0,
                mean_delta: 0.0,
                distinct_masked: 0,
                shannon_low_byte: 0.0,
                min_entropy_low_byte: 0.0,
                lag1_correlation: 0.0,
                health_failure: None,
            };
        }

        let mut health = HealthMonitor::new(1);
        let stuck = deltas.iter().filter(|&&d| health.stuck(d)).count();

        let mut masked = [false; 16];
        let mut low_bytes = [0u64; 256];
        for &d in deltas {
            masked[(d & APT_WORD_MASK) as usize] = true;
            low_bytes[(d & 0xFF) as usize] += 1;
        }

        let min_delta = deltas.iter().copied().min().unwrap_or(0);
        let max_delta = deltas.iter().copied().max().unwrap_or(0);
        let mean_delta = deltas.iter().map(|&d| d as f64).sum::<f64>() / n as f64;

        Self {
            samples: n,
            stuck,
            stuck_fraction: stuck as f64 / n as f64,
            min_delta,
            max_delta,
            mean_delta,
            distinct_masked: masked.iter().filter(|&&m| m).count(),
            shannon_low_byte: shannon(&low_bytes, n),
            min_entropy_low_byte: mcv_min_entropy(&low_bytes, n),
            lag1_correlation: lag1(deltas, mean_delta),
            health_failure: health.failure(),
        }
    }
}

fn shannon(counts: &[u64], n: usize) -> f64 {
    let n = n as f64;
    let mut h = 0.0;
    for &c in counts {
        if c > 0 {
            let p = c as f64 / n;
            h -= p * p.log2();
        }
    }
    h
}

/// SP 800-90B 6.3.1 most common value estimate with the 99% upper bound.
fn mcv_min_entropy(counts: &[u64], n: usize) -> f64 {
    let max = counts.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return 0.0;
    }
    let n = n as f64;
    let p_hat = max as f64 / n;
    let p_u = (p_hat + 2.576 * (p_hat * (1.0 - p_hat) / (n - 1.0).max(1.0)).sqrt()).min(1.0);
    -p_u.log2()
}

fn lag1(deltas: &[u64], mean: f64) -> f64 {
    if deltas.len() < 2 {
        return 0.0;
    }
    let var: f64 = deltas.iter().map(|&d| (d as f64 - mean).powi(2)).sum();
    if var < 1e-10 {
        return 0.0;
    }
    let cov: f64 = deltas
        .windows(2)
        .map(|w| (w[0] as f64 - mean) * (w[1] as f64 - mean))
        .sum();
    cov / var
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        let r = RawNoiseReport::from_deltas(&[]);
        assert_eq!(r.samples, 0);
        assert_eq!(r.health_failure, None);
    }

    #[test]
    fn constant_deltas_are_stuck_and_fail_rct() {
        let r = RawNoiseReport::from_deltas(&[250; 100]);
        assert_eq!(r.stuck, 99);
        assert_eq!(r.distinct_masked, 1);
        assert_eq!(r.shannon_low_byte, 0.0);
        assert_eq!(r.min_delta, 250);
        assert_eq!(r.max_delta, 250);
        assert_eq!(r.lag1_correlation, 0.0);
        assert_eq!(r.health_failure, Some(HealthTest::RepetitionCount));
    }

    #[test]
    fn uniform_low_byte_is_near_eight_bits() {
        // 256 * 40 deltas walking all low-byte values with growing high bits.
        let deltas: Vec<u64> = (0..256u64 * 40)
            .map(|i| ((i * i) << 8) | ((i * 37) & 0xFF))
            .collect();
        let r = RawNoiseReport::from_deltas(&deltas);
        assert!((r.shannon_low_byte - 8.0).abs() < 1e-9, "{}", r.shannon_low_byte);
        assert!(r.min_entropy_low_byte > 6.5, "{}", r.min_entropy_low_byte);
        assert_eq!(r.distinct_masked, 16);
        assert!(r.stuck_fraction < 0.01);
    }

    #[test]
    fn alternating_deltas_anticorrelate() {
        let deltas: Vec<u64> = (0..1000).map(|i| if i % 2 == 0 { 1000 } else { 3000 }).collect();
        let r = RawNoiseReport::from_deltas(&deltas);
        assert!(r.lag1_correlation < -0.9, "{}", r.lag1_correlation);
        assert!((r.mean_delta - 2000.0).abs() < 1e-9);
    }
}
