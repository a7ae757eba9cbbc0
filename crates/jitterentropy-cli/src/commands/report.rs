use std::time::Instant;

use jitterentropy_tests::BatteryReport;

use super::CollectorArgs;

pub fn run(args: &CollectorArgs, bytes: usize, output_path: Option<&str>) {
    let mut collector = super::make_collector(args);

    println!("Running test battery on {bytes} bytes...\n");

    let t0 = Instant::now();
    let data = match collector.read(bytes) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let collect_secs = t0.elapsed().as_secs_f64();

    let report = BatteryReport::run(&data);
    print_report(&report, collect_secs);

    if let Some(path) = output_path {
        let json = serde_json::json!({
            "osr": collector.osr(),
            "memory_noise": collector.has_memory_noise(),
            "health": collector.health(),
            "collect_seconds": collect_secs,
            "battery": report,
        });
        let written = serde_json::to_string_pretty(&json)
            .map_err(|e| e.to_string())
            .and_then(|s| std::fs::write(path, s).map_err(|e| e.to_string()));
        match written {
            Ok(()) => println!("\nReport written to {path}"),
            Err(e) => {
                eprintln!("Error writing report: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn print_report(report: &BatteryReport, collect_secs: f64) {
    println!("  {:<24} {:>5} {:>10}  Details", "Test", "Grade", "p-value");
    println!("  {}", "-".repeat(72));
    for r in &report.results {
        let p = r
            .p_value
            .map(|p| format!("{p:.4}"))
            .unwrap_or_else(|| "-".to_string());
        let mark = if r.passed { " " } else { "✗" };
        println!(
            "{mark} {:<24} {:>5} {:>10}  {}",
            r.name, r.grade, p, r.details
        );
    }
    println!(
        "\n  Score: {:.0}/100 ({}/{} passed), {} bytes in {:.2}s",
        report.score,
        report.passed,
        report.results.len(),
        report.bytes,
        collect_secs
    );
}
