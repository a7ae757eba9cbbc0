//! Statistical test battery for collector output.
//!
//! A compact set of NIST SP 800-22 style tests plus a few practical checks
//! (compression, byte entropy, repeated 64-bit words). Each test returns a
//! [`TestResult`] with a p-value where one exists, a pass/fail verdict and a
//! letter grade (A through F). Passing says the sample is not obviously
//! broken; it says nothing about min-entropy of the noise source.

use flate2::Compression;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF, DiscreteCDF, Normal, Poisson};
use statrs::function::erf::erfc;
use std::collections::HashSet;
use std::io::Write;

// ═══════════════════════════════════════════════════════════════════════════════
// Core types
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a single randomness test.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub p_value: Option<f64>,
    pub statistic: f64,
    pub details: String,
    pub grade: char,
}

impl TestResult {
    /// Letter grade for a p-value.
    ///
    /// - A: p >= 0.1
    /// - B: p >= 0.01
    /// - C: p >= 0.001
    /// - D: p >= 0.0001
    /// - F: otherwise or None
    pub fn grade_from_p(p: Option<f64>) -> char {
        match p {
            Some(p) if p >= 0.1 => 'A',
            Some(p) if p >= 0.01 => 'B',
            Some(p) if p >= 0.001 => 'C',
            Some(p) if p >= 0.0001 => 'D',
            _ => 'F',
        }
    }

    /// Pass/fail from a p-value against `threshold`.
    pub fn pass_from_p(p: Option<f64>, threshold: f64) -> bool {
        match p {
            Some(p) => p >= threshold,
            None => false,
        }
    }

    fn from_p(name: &str, p: f64, statistic: f64, details: String) -> Self {
        TestResult {
            name: name.to_string(),
            passed: Self::pass_from_p(Some(p), 0.01),
            p_value: Some(p),
            statistic,
            details,
            grade: Self::grade_from_p(Some(p)),
        }
    }

    fn failed(name: &str, details: &str) -> Self {
        TestResult {
            name: name.to_string(),
            passed: false,
            p_value: Some(0.0),
            statistic: 0.0,
            details: details.to_string(),
            grade: 'F',
        }
    }
}

/// Outcome of [`run_all_tests`] with its summary score.
#[derive(Debug, Clone, Serialize)]
pub struct BatteryReport {
    pub bytes: usize,
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub score: f64,
}

impl BatteryReport {
    pub fn run(data: &[u8]) -> Self {
        let results = run_all_tests(data);
        let passed = results.iter().filter(|r| r.passed).count();
        let score = calculate_quality_score(&results);
        Self {
            bytes: data.len(),
            results,
            passed,
            score,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Unpack a byte slice into individual bits (MSB first per byte).
fn to_bits(data: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(data.len() * 8);
    for &byte in data {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

/// Failing result for too-short input.
fn insufficient(name: &str, needed: usize, got: usize) -> TestResult {
    TestResult {
        name: name.to_string(),
        passed: false,
        p_value: None,
        statistic: 0.0,
        details: format!("Insufficient data: need {needed}, got {got}"),
        grade: 'F',
    }
}

/// Upper tail of the chi-squared distribution. Invalid degrees of freedom
/// count as a certain failure.
fn chi2_sf(df: f64, x: f64) -> f64 {
    ChiSquared::new(df).map(|d| d.sf(x)).unwrap_or(0.0)
}

fn ratio_grade(ratio: f64) -> char {
    if ratio > 0.95 {
        'A'
    } else if ratio > 0.85 {
        'B'
    } else if ratio > 0.7 {
        'C'
    } else if ratio > 0.5 {
        'D'
    } else {
        'F'
    }
}

fn byte_histogram(data: &[u8]) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for &b in data {
        hist[b as usize] += 1;
    }
    hist
}

// ═══════════════════════════════════════════════════════════════════════════════
// 1. FREQUENCY TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Monobit frequency: proportion of ones should be about one half.
pub fn monobit_frequency(data: &[u8]) -> TestResult {
    let name = "Monobit Frequency";
    let n = data.len() * 8;
    if n < 100 {
        return insufficient(name, 100, n);
    }
    let ones: i64 = data.iter().map(|b| i64::from(b.count_ones())).sum();
    let s = 2 * ones - n as i64;
    let s_obs = (s as f64).abs() / (n as f64).sqrt();
    let p = erfc(s_obs / 2.0_f64.sqrt());
    TestResult::from_p(name, p, s_obs, format!("S={s}, n={n}"))
}

/// Block frequency: ones within 128-bit blocks, chi-squared.
pub fn block_frequency(data: &[u8]) -> TestResult {
    let name = "Block Frequency";
    let block_size = 128usize;
    let bytes_per_block = block_size / 8;
    let num_blocks = data.len() / bytes_per_block;
    if num_blocks < 10 {
        return insufficient(name, block_size * 10, data.len() * 8);
    }
    let chi2: f64 = data
        .chunks_exact(bytes_per_block)
        .map(|block| {
            let ones: u32 = block.iter().map(|b| b.count_ones()).sum();
            let proportion = f64::from(ones) / block_size as f64;
            (proportion - 0.5) * (proportion - 0.5)
        })
        .sum::<f64>()
        * 4.0
        * block_size as f64;
    let p = chi2_sf(num_blocks as f64, chi2);
    TestResult::from_p(name, p, chi2, format!("blocks={num_blocks}, M={block_size}"))
}

/// Byte frequency: chi-squared over the 256 byte values.
pub fn byte_frequency(data: &[u8]) -> TestResult {
    let name = "Byte Frequency";
    let n = data.len();
    if n < 2560 {
        return insufficient(name, 2560, n);
    }
    let expected = n as f64 / 256.0;
    let chi2: f64 = byte_histogram(data)
        .iter()
        .map(|&c| {
            let diff = c as f64 - expected;
            diff * diff / expected
        })
        .sum();
    let p = chi2_sf(255.0, chi2);
    TestResult::from_p(name, p, chi2, format!("n={n}, expected_per_bin={expected:.1}"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// 2. RUNS TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs: number of uninterrupted runs of identical bits.
pub fn runs_test(data: &[u8]) -> TestResult {
    let name = "Runs Test";
    let bits = to_bits(data);
    let n = bits.len();
    if n < 100 {
        return insufficient(name, 100, n);
    }
    let ones: usize = bits.iter().map(|&b| b as usize).sum();
    let prop = ones as f64 / n as f64;
    if (prop - 0.5).abs() >= 2.0 / (n as f64).sqrt() {
        return TestResult::failed(name, &format!("Pre-test failed: proportion={prop:.4}"));
    }
    let runs = 1 + bits.windows(2).filter(|w| w[0] != w[1]).count();
    let expected = 2.0 * n as f64 * prop * (1.0 - prop) + 1.0;
    let std = 2.0 * (2.0 * n as f64).sqrt() * prop * (1.0 - prop);
    if std < 1e-10 {
        return TestResult::failed(name, "Zero variance");
    }
    let z = (runs as f64 - expected).abs() / std;
    let p = erfc(z / 2.0_f64.sqrt());
    TestResult::from_p(name, p, z, format!("runs={runs}, expected={expected:.0}"))
}

/// Longest run of ones within 8-bit blocks, chi-squared against the
/// theoretical distribution.
pub fn longest_run_of_ones(data: &[u8]) -> TestResult {
    let name = "Longest Run of Ones";
    let n = data.len() * 8;
    if n < 128 {
        return insufficient(name, 128, n);
    }
    // Bins: <=1, 2, 3, >=4 for M = 8.
    let mut observed = [0u64; 4];
    for &byte in data {
        let mut longest = 0u32;
        let mut current = 0u32;
        for shift in (0..8).rev() {
            if (byte >> shift) & 1 == 1 {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }
        observed[match longest {
            0 | 1 => 0,
            2 => 1,
            3 => 2,
            _ => 3,
        }] += 1;
    }
    let probs = [0.2148, 0.3672, 0.2305, 0.1875];
    let blocks = data.len() as f64;
    let chi2: f64 = observed
        .iter()
        .zip(probs)
        .map(|(&o, p)| {
            let expected = p * blocks;
            let diff = o as f64 - expected;
            diff * diff / expected
        })
        .sum();
    let p = chi2_sf(3.0, chi2);
    TestResult::from_p(name, p, chi2, format!("blocks={}, M=8", data.len()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// 3. ENTROPY TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Shannon entropy in bits per byte (max 8.0).
pub fn shannon_entropy(data: &[u8]) -> TestResult {
    let name = "Shannon Entropy";
    let n = data.len();
    if n < 16 {
        return insufficient(name, 16, n);
    }
    let mut h = 0.0;
    for &c in &byte_histogram(data) {
        if c > 0 {
            let p = c as f64 / n as f64;
            h -= p * p.log2();
        }
    }
    let ratio = h / 8.0;
    TestResult {
        name: name.to_string(),
        passed: ratio > 0.85,
        p_value: None,
        statistic: h,
        details: format!("{h:.4} / 8.0 bits ({:.1}%)", ratio * 100.0),
        grade: ratio_grade(ratio),
    }
}

/// Min-entropy, -log2(p_max), in bits per byte.
pub fn min_entropy(data: &[u8]) -> TestResult {
    let name = "Min-Entropy";
    let n = data.len();
    if n < 16 {
        return insufficient(name, 16, n);
    }
    let max = byte_histogram(data).iter().copied().max().unwrap_or(0);
    let p_max = max as f64 / n as f64;
    let h_min = -(p_max + 1e-15).log2();
    let ratio = h_min / 8.0;
    let grade = if ratio > 0.9 {
        'A'
    } else if ratio > 0.75 {
        'B'
    } else if ratio > 0.5 {
        'C'
    } else if ratio > 0.25 {
        'D'
    } else {
        'F'
    };
    TestResult {
        name: name.to_string(),
        passed: ratio > 0.7,
        p_value: None,
        statistic: h_min,
        details: format!("{h_min:.4} / 8.0 bits ({:.1}%)", ratio * 100.0),
        grade,
    }
}

/// Compression ratio under zlib level 9. Random data does not compress.
pub fn compression_ratio(data: &[u8]) -> TestResult {
    let name = "Compression Ratio";
    let n = data.len();
    if n < 32 {
        return insufficient(name, 32, n);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    let compressed = match encoder.write_all(data).and_then(|()| encoder.finish()) {
        Ok(out) => out.len(),
        Err(err) => return TestResult::failed(name, &format!("zlib error: {err}")),
    };
    let ratio = compressed as f64 / n as f64;
    TestResult {
        name: name.to_string(),
        passed: ratio > 0.85,
        p_value: None,
        statistic: ratio,
        details: format!("{compressed}/{n} = {ratio:.4}"),
        grade: ratio_grade(ratio),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// 4. CORRELATION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Autocorrelation at lags 1-50. Violations of the 2/sqrt(n) threshold are
/// compared against a Poisson expectation.
pub fn autocorrelation(data: &[u8]) -> TestResult {
    let name = "Autocorrelation";
    let max_lag = 50usize;
    let n = data.len();
    if n < max_lag + 10 {
        return insufficient(name, max_lag + 10, n);
    }
    let arr: Vec<f64> = data.iter().map(|&b| f64::from(b)).collect();
    let mean: f64 = arr.iter().sum::<f64>() / n as f64;
    let var: f64 = arr.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
    if var < 1e-10 {
        return TestResult::failed(name, "Zero variance");
    }
    let threshold = 2.0 / (n as f64).sqrt();
    let mut max_corr = 0.0f64;
    let mut violations = 0u64;
    for lag in 1..=max_lag {
        let count = n - lag;
        let sum: f64 = (0..count).map(|i| (arr[i] - mean) * (arr[i + lag] - mean)).sum();
        let c = (sum / (count as f64 * var)).abs();
        max_corr = max_corr.max(c);
        if c > threshold {
            violations += 1;
        }
    }
    let lambda = (0.05 * max_lag as f64).max(1.0);
    let p = if violations > 0 {
        Poisson::new(lambda)
            .map(|d| d.sf(violations - 1))
            .unwrap_or(0.0)
    } else {
        1.0
    };
    TestResult::from_p(
        name,
        p,
        max_corr,
        format!("violations={violations}/{max_lag}, max|r|={max_corr:.4}"),
    )
}

/// Serial correlation of adjacent bytes, z-test.
pub fn serial_correlation(data: &[u8]) -> TestResult {
    let name = "Serial Correlation";
    let n = data.len();
    if n < 20 {
        return insufficient(name, 20, n);
    }
    let arr: Vec<f64> = data.iter().map(|&b| f64::from(b)).collect();
    let mean: f64 = arr.iter().sum::<f64>() / n as f64;
    let var: f64 = arr.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
    if var < 1e-10 {
        return TestResult::failed(name, "Zero variance");
    }
    let sum: f64 = arr.windows(2).map(|w| (w[0] - mean) * (w[1] - mean)).sum();
    let r = sum / ((n - 1) as f64 * var);
    let z = r * (n as f64).sqrt();
    let p = 2.0 * (1.0 - Normal::standard().cdf(z.abs()));
    TestResult::from_p(name, p, r.abs(), format!("r={r:.6}, z={z:.4}"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// 5. ADVANCED TESTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Cumulative sums (forward): detects drift in the bit stream.
pub fn cusum_test(data: &[u8]) -> TestResult {
    let name = "Cumulative Sums";
    let bits = to_bits(data);
    let n = bits.len();
    if n < 100 {
        return insufficient(name, 100, n);
    }
    let mut s: i64 = 0;
    let mut z_max = 0u64;
    for &bit in &bits {
        s += if bit == 1 { 1 } else { -1 };
        z_max = z_max.max(s.unsigned_abs());
    }
    if z_max == 0 {
        return TestResult {
            name: name.to_string(),
            passed: true,
            p_value: Some(1.0),
            statistic: 0.0,
            details: format!("max|S|=0, n={n}"),
            grade: 'A',
        };
    }

    let z = z_max as f64;
    let nf = n as f64;
    let sqrt_n = nf.sqrt();
    let norm = Normal::standard();
    let mut sum1 = 0.0;
    let k_start = ((-nf / z + 1.0) / 4.0).floor() as i64;
    let k_end = ((nf / z - 1.0) / 4.0).floor() as i64;
    for k in k_start..=k_end {
        let kf = k as f64;
        sum1 += norm.cdf((4.0 * kf + 1.0) * z / sqrt_n) - norm.cdf((4.0 * kf - 1.0) * z / sqrt_n);
    }
    let mut sum2 = 0.0;
    let k_start = ((-nf / z - 3.0) / 4.0).floor() as i64;
    for k in k_start..=k_end {
        let kf = k as f64;
        sum2 += norm.cdf((4.0 * kf + 3.0) * z / sqrt_n) - norm.cdf((4.0 * kf + 1.0) * z / sqrt_n);
    }
    let p = (1.0 - sum1 + sum2).clamp(0.0, 1.0);
    TestResult::from_p(name, p, z, format!("max|S|={z_max}, n={n}"))
}

/// Bit avalanche: adjacent bytes should differ in about 4 of 8 bits.
pub fn bit_avalanche(data: &[u8]) -> TestResult {
    let name = "Bit Avalanche";
    let n = data.len();
    if n < 100 {
        return insufficient(name, 100, n);
    }
    let pairs = n - 1;
    let total: u64 = data
        .windows(2)
        .map(|w| u64::from((w[0] ^ w[1]).count_ones()))
        .sum();
    let mean_diff = total as f64 / pairs as f64;
    // Binomial(8, 0.5) standard deviation.
    let std = 2.0_f64.sqrt();
    let z = (mean_diff - 4.0).abs() / (std / (pairs as f64).sqrt());
    let p = 2.0 * (1.0 - Normal::standard().cdf(z));
    TestResult::from_p(
        name,
        p,
        mean_diff,
        format!("mean_diff={mean_diff:.3}/8 bits, expected=4.0"),
    )
}

/// Repeated 64-bit words. The collector emits one 64-bit block at a time; a
/// repeat within any realistic sample means the state stopped moving.
pub fn word_repetition(data: &[u8]) -> TestResult {
    let name = "Word Repetition";
    let words = data.len() / 8;
    if words < 16 {
        return insufficient(name, 128, data.len());
    }
    let mut seen = HashSet::with_capacity(words);
    let repeats = data
        .chunks_exact(8)
        .filter(|w| !seen.insert(*w))
        .count();
    TestResult {
        name: name.to_string(),
        passed: repeats == 0,
        p_value: None,
        statistic: repeats as f64,
        details: format!("{repeats} repeats in {words} words"),
        grade: if repeats == 0 { 'A' } else { 'F' },
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Test battery
// ═══════════════════════════════════════════════════════════════════════════════

/// Every test in the battery, in reporting order.
pub const TESTS: [fn(&[u8]) -> TestResult; 13] = [
    monobit_frequency,
    block_frequency,
    byte_frequency,
    runs_test,
    longest_run_of_ones,
    shannon_entropy,
    min_entropy,
    compression_ratio,
    autocorrelation,
    serial_correlation,
    cusum_test,
    bit_avalanche,
    word_repetition,
];

/// Run the complete battery on a byte slice.
pub fn run_all_tests(data: &[u8]) -> Vec<TestResult> {
    TESTS.iter().map(|test| test(data)).collect()
}

/// Overall quality score (0-100): A=100, B=75, C=50, D=25, F=0, averaged.
pub fn calculate_quality_score(results: &[TestResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let total: f64 = results
        .iter()
        .map(|r| match r.grade {
            'A' => 100.0,
            'B' => 75.0,
            'C' => 50.0,
            'D' => 25.0,
            _ => 0.0,
        })
        .sum();
    total / results.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pseudo-random bytes from the high bits of a 64-bit LCG.
    fn pseudo_random(n: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(n);
        let mut state: u64 = 0xDEAD_BEEF_CAFE_BABE;
        for _ in 0..n {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            data.push((state >> 33) as u8);
        }
        data
    }

    #[test]
    fn test_to_bits() {
        assert_eq!(to_bits(&[0b10110001u8]), vec![1, 0, 1, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_grade_from_p() {
        assert_eq!(TestResult::grade_from_p(Some(0.5)), 'A');
        assert_eq!(TestResult::grade_from_p(Some(0.05)), 'B');
        assert_eq!(TestResult::grade_from_p(Some(0.005)), 'C');
        assert_eq!(TestResult::grade_from_p(Some(0.0005)), 'D');
        assert_eq!(TestResult::grade_from_p(Some(0.00000001)), 'F');
        assert_eq!(TestResult::grade_from_p(None), 'F');
    }

    #[test]
    fn test_insufficient_data() {
        let result = monobit_frequency(&[0u8; 5]);
        assert!(!result.passed);
        assert!(result.details.contains("Insufficient"));
    }

    #[test]
    fn test_constant_data_fails() {
        let results = run_all_tests(&[0u8; 4096]);
        let passed = results.iter().filter(|r| r.passed).count();
        assert!(passed < results.len() / 2, "{passed} passed");
    }

    #[test]
    fn test_pseudo_random_passes() {
        let report = BatteryReport::run(&pseudo_random(16_384));
        assert!(
            report.passed > report.results.len() / 2,
            "Only {}/{} tests passed",
            report.passed,
            report.results.len()
        );
        assert_eq!(report.bytes, 16_384);
    }

    #[test]
    fn test_all_tests_present() {
        assert_eq!(run_all_tests(&pseudo_random(4096)).len(), TESTS.len());
    }

    #[test]
    fn test_monobit_counts_ones() {
        let result = monobit_frequency(&[0xFFu8; 100]);
        assert_eq!(result.details, "S=800, n=800");
        assert!(!result.passed);
        let balanced = monobit_frequency(&[0x0Fu8; 100]);
        assert!(balanced.p_value.unwrap() > 0.99);
    }

    #[test]
    fn test_longest_run_bins() {
        // Every 0x0F byte lands in the longest-run >= 4 bin.
        let result = longest_run_of_ones(&[0x0Fu8; 64]);
        assert!(!result.passed);
        let mixed: Vec<u8> = pseudo_random(4096);
        assert!(longest_run_of_ones(&mixed).p_value.unwrap() > 0.0);
    }

    #[test]
    fn test_shannon_entropy_random() {
        let result = shannon_entropy(&pseudo_random(10_000));
        assert!(result.statistic > 7.0, "Shannon entropy too low: {}", result.statistic);
    }

    #[test]
    fn test_compression_ratio_random() {
        let result = compression_ratio(&pseudo_random(10_000));
        assert!(result.statistic > 0.9, "Compression ratio too low: {}", result.statistic);
        assert!(!compression_ratio(&[7u8; 1000]).passed);
    }

    #[test]
    fn test_word_repetition() {
        assert!(word_repetition(&pseudo_random(8 * 64)).passed);
        let mut data = pseudo_random(8 * 64);
        let first: Vec<u8> = data[..8].to_vec();
        data[8..16].copy_from_slice(&first);
        let result = word_repetition(&data);
        assert!(!result.passed);
        assert_eq!(result.statistic, 1.0);
    }

    #[test]
    fn test_cusum_balanced_walk() {
        let result = cusum_test(&[0xAAu8; 512]);
        assert!(result.passed, "{:?}", result);
        assert_eq!(result.statistic, 1.0);
    }

    #[test]
    fn test_quality_score() {
        let mk = |grade| TestResult {
            name: String::new(),
            passed: grade == 'A',
            p_value: None,
            statistic: 0.0,
            details: String::new(),
            grade,
        };
        assert!((calculate_quality_score(&[mk('A'), mk('F')]) - 50.0).abs() < 0.01);
        assert_eq!(calculate_quality_score(&[]), 0.0);
    }
}
