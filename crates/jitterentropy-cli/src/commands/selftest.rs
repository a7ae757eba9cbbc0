use jitterentropy_core::{SelfTestReport, self_test};

pub fn run(json: bool) {
    let result = self_test();

    if json {
        let value = match &result {
            Ok(report) => serde_json::json!({ "passed": true, "code": 0, "report": report }),
            Err(e) => serde_json::json!({ "passed": false, "code": e.code(), "error": e.to_string() }),
        };
        match serde_json::to_string_pretty(&value) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Error serializing result: {e}"),
        }
    } else {
        match &result {
            Ok(report) => print_report(report),
            Err(e) => eprintln!("Self-test FAILED (code {}): {e}", e.code()),
        }
    }

    if let Err(e) = result {
        std::process::exit(e.code());
    }
}

fn print_report(report: &SelfTestReport) {
    println!("Self-test passed ({} rounds)", report.rounds);
    println!("  {:<20} {:>12}", "backward steps", report.backwards);
    println!("  {:<20} {:>12}", "stuck rounds", report.stuck);
    println!("  {:<20} {:>12}", "multiples of 100", report.multiples_of_100);
    println!("  {:<20} {:>12}", "delta variation", report.delta_variation);
}
