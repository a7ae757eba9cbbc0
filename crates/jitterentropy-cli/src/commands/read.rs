use std::io::Write;

use super::CollectorArgs;

pub fn run(args: &CollectorArgs, bytes: usize, format: &str, output: Option<&str>) {
    let mut collector = super::make_collector(args);

    let data = match collector.read(bytes) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let mut encoded = super::encode(&data, format);
    if format != "raw" {
        encoded.push(b'\n');
    }

    let result = match output {
        Some(path) => std::fs::write(path, &encoded),
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            out.write_all(&encoded).and_then(|()| out.flush())
        }
    };
    if let Err(e) = result {
        eprintln!("Error writing output: {e}");
        std::process::exit(1);
    }
    if let Some(path) = output {
        eprintln!("Wrote {bytes} bytes to {path}");
    }
}
