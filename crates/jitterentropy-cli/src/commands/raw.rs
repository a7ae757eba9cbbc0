use std::io::Write;

use jitterentropy_core::RawNoiseReport;

use super::CollectorArgs;

pub fn run(
    args: &CollectorArgs,
    samples: usize,
    fixed_loops: Option<u64>,
    dump: Option<&str>,
    json: bool,
) {
    let mut collector = super::make_collector(args);

    let deltas: Vec<u64> = match fixed_loops {
        Some(loops) => (0..samples).map(|_| collector.measure_fixed(loops)).collect(),
        None => collector.raw_deltas(samples),
    };

    if let Some(path) = dump {
        if let Err(e) = write_deltas(path, &deltas) {
            eprintln!("Error writing {path}: {e}");
            std::process::exit(1);
        }
        eprintln!("Wrote {} deltas to {path}", deltas.len());
    }

    let report = RawNoiseReport::from_deltas(&deltas);
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                std::process::exit(1);
            }
        }
    } else {
        print_report(&report, fixed_loops);
    }
}

fn write_deltas(path: &str, deltas: &[u64]) -> std::io::Result<()> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    for d in deltas {
        writeln!(out, "{d}")?;
    }
    out.flush()
}

fn print_report(report: &RawNoiseReport, fixed_loops: Option<u64>) {
    match fixed_loops {
        Some(loops) => println!("Raw noise, {} samples, fixed loops {loops}", report.samples),
        None => println!("Raw noise, {} samples", report.samples),
    }
    println!(
        "  {:<22} {:>12} ({:.2}%)",
        "stuck",
        report.stuck,
        report.stuck_fraction * 100.0
    );
    println!("  {:<22} {:>12}", "min delta", report.min_delta);
    println!("  {:<22} {:>12}", "max delta", report.max_delta);
    println!("  {:<22} {:>12.1}", "mean delta", report.mean_delta);
    println!("  {:<22} {:>12}", "distinct low nibbles", report.distinct_masked);
    println!("  {:<22} {:>12.3}", "Shannon (low byte)", report.shannon_low_byte);
    println!("  {:<22} {:>12.3}", "min-entropy (low byte)", report.min_entropy_low_byte);
    println!("  {:<22} {:>12.4}", "lag-1 correlation", report.lag1_correlation);
    match report.health_failure {
        Some(test) => println!("  health: {test} would fail"),
        None => println!("  health: ok"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_writes_one_delta_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deltas.txt");
        write_deltas(path.to_str().unwrap(), &[3, 17, 4000]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "3\n17\n4000\n");
    }

    #[test]
    fn test_run_with_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deltas.txt");
        let args = CollectorArgs {
            no_memory: true,
            record_only: true,
            ..CollectorArgs::default()
        };
        run(&args, 200, Some(1), Some(path.to_str().unwrap()), true);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 200);
        assert!(text.lines().all(|l| l.parse::<u64>().is_ok()));
    }
}
