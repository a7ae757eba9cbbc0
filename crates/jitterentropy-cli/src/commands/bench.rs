use std::time::Instant;

use jitterentropy_core::{Collector, CollectorConfig, Flags};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct BenchRow {
    osr: u32,
    memory_noise: bool,
    bytes: usize,
    seconds: f64,
    bytes_per_sec: f64,
}

pub fn run(bytes: usize, max_osr: u32, no_memory: bool, output_path: Option<&str>) {
    let flags = if no_memory {
        Flags::DISABLE_MEMORY_ACCESS
    } else {
        Flags::NONE
    };

    println!("Benchmarking {bytes} bytes per oversample rate\n");
    println!("  {:>4} {:>8} {:>10} {:>14}", "OSR", "Memory", "Time", "Throughput");

    let mut rows = Vec::new();
    for osr in 1..=max_osr.max(1) {
        match bench_one(&CollectorConfig::new(osr, flags), bytes) {
            Ok(row) => {
                println!(
                    "  {:>4} {:>8} {:>9.3}s {:>11.0} B/s",
                    row.osr,
                    if row.memory_noise { "yes" } else { "no" },
                    row.seconds,
                    row.bytes_per_sec
                );
                rows.push(row);
            }
            Err(e) => {
                eprintln!("  {osr:>4} failed: {e}");
            }
        }
    }

    if let Some(path) = output_path {
        let written = serde_json::to_string_pretty(&rows)
            .map_err(|e| e.to_string())
            .and_then(|s| std::fs::write(path, s).map_err(|e| e.to_string()));
        match written {
            Ok(()) => println!("\nResults written to {path}"),
            Err(e) => {
                eprintln!("Error writing results: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn bench_one(config: &CollectorConfig, bytes: usize) -> Result<BenchRow, jitterentropy_core::Error> {
    let mut collector = Collector::with_config(config)?;
    let t0 = Instant::now();
    collector.read(bytes)?;
    let seconds = t0.elapsed().as_secs_f64();
    Ok(BenchRow {
        osr: collector.osr(),
        memory_noise: collector.has_memory_noise(),
        bytes,
        seconds,
        bytes_per_sec: if seconds > 0.0 {
            bytes as f64 / seconds
        } else {
            0.0
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bench_one_reports_throughput() {
        let row = bench_one(&CollectorConfig::new(2, Flags::DISABLE_MEMORY_ACCESS), 256).unwrap();
        assert_eq!(row.osr, 2);
        assert!(!row.memory_noise);
        assert_eq!(row.bytes, 256);
        assert!(row.seconds >= 0.0);
    }

    #[test]
    fn test_bench_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");
        run(64, 2, true, Some(path.to_str().unwrap()));
        let rows: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 2);
    }
}
