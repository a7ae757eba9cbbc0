pub mod bench;
pub mod raw;
pub mod read;
pub mod report;
pub mod selftest;
pub mod stream;

use clap::Args;
use jitterentropy_core::{Collector, CollectorConfig, Flags, HealthPolicy};

/// Collector options shared by every command that reads entropy.
#[derive(Args, Debug, Clone, Default)]
pub struct CollectorArgs {
    /// Oversample rate (overrides the config file)
    #[arg(long)]
    pub osr: Option<u32>,

    /// Disable the memory access noise source
    #[arg(long)]
    pub no_memory: bool,

    /// Keep reading after a health-test failure instead of failing
    #[arg(long)]
    pub record_only: bool,

    /// JSON collector configuration file
    #[arg(long)]
    pub config: Option<String>,
}

/// Load a collector configuration from a JSON file. Missing fields take
/// their defaults.
pub fn load_config(path: &str) -> Result<CollectorConfig, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("cannot read {path}: {e}"))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid config {path}: {e}"))
}

/// Merge the config file (if any) with command-line overrides.
pub fn build_config(args: &CollectorArgs) -> Result<CollectorConfig, String> {
    let mut config = match args.config.as_deref() {
        Some(path) => load_config(path)?,
        None => CollectorConfig::default(),
    };
    if let Some(osr) = args.osr {
        config.osr = osr;
    }
    if args.no_memory {
        config.flags |= Flags::DISABLE_MEMORY_ACCESS;
    }
    if args.record_only {
        config.health = HealthPolicy::RecordOnly;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Build a collector from the command-line options, exiting on error.
pub fn make_collector(args: &CollectorArgs) -> Collector {
    let config = build_config(args).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    log::debug!("collector config: {config:?}");
    match Collector::with_config(&config) {
        Ok(collector) => collector,
        Err(e) => {
            eprintln!("Error: cannot allocate collector: {e}");
            std::process::exit(1);
        }
    }
}

/// Encode a chunk of output in the requested text format.
pub fn encode(data: &[u8], format: &str) -> Vec<u8> {
    match format {
        "hex" => data
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
            .into_bytes(),
        "base64" => base64_encode(data).into_bytes(),
        _ => data.to_vec(),
    }
}

pub fn base64_encode(data: &[u8]) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut result = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;
        result.push(CHARS[((triple >> 18) & 0x3F) as usize] as char);
        result.push(CHARS[((triple >> 12) & 0x3F) as usize] as char);
        if chunk.len() > 1 {
            result.push(CHARS[((triple >> 6) & 0x3F) as usize] as char);
        } else {
            result.push('=');
        }
        if chunk.len() > 2 {
            result.push(CHARS[(triple & 0x3F) as usize] as char);
        } else {
            result.push('=');
        }
    }
    result
}
