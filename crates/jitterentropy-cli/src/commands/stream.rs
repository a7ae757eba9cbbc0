use std::io::Write;

use super::CollectorArgs;

/// Largest chunk requested from the collector per iteration.
const CHUNK_SIZE: usize = 4096;

pub fn run(args: &CollectorArgs, format: &str, rate: usize, n_bytes: usize) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = stream_to(&mut out, args, format, rate, n_bytes) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Write collector output to `out` until `n_bytes` (0 = forever) have been
/// produced or the reader goes away.
fn stream_to<W: Write>(
    out: &mut W,
    args: &CollectorArgs,
    format: &str,
    rate: usize,
    n_bytes: usize,
) -> Result<usize, jitterentropy_core::Error> {
    let mut collector = super::make_collector(args);
    let mut chunk_size = if rate > 0 { rate.min(CHUNK_SIZE) } else { CHUNK_SIZE };
    if format == "base64" {
        // Chunks are encoded separately; padding may only appear at the end.
        chunk_size = (chunk_size / 3 * 3).max(3);
    }
    let mut total = 0usize;

    loop {
        if n_bytes > 0 && total >= n_bytes {
            break;
        }
        let want = if n_bytes == 0 {
            chunk_size
        } else {
            chunk_size.min(n_bytes - total)
        };

        let data = collector.read(want)?;

        if out.write_all(&super::encode(&data, format)).is_err() {
            log::debug!("output closed after {total} bytes");
            break;
        }
        let _ = out.flush();

        total += data.len();

        if rate > 0 {
            let sleep_dur = std::time::Duration::from_secs_f64(data.len() as f64 / rate as f64);
            std::thread::sleep(sleep_dur);
        }
    }
    Ok(total)
}
