//! CLI for jitterentropy: entropy from CPU execution-time jitter.

mod commands;

use clap::{Parser, Subcommand};

use commands::CollectorArgs;

#[derive(Parser)]
#[command(name = "jitterentropy")]
#[command(about = "jitterentropy: true random numbers from CPU timing jitter")]
#[command(version = jitterentropy_core::VERSION)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the timer self-test and print its statistics
    Selftest {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read a fixed number of random bytes
    Read {
        /// Number of bytes to read
        #[arg(long, short = 'n', default_value = "32")]
        bytes: usize,

        /// Output format
        #[arg(long, default_value = "hex", value_parser = ["raw", "hex", "base64"])]
        format: String,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<String>,

        #[command(flatten)]
        collector: CollectorArgs,
    },

    /// Stream random bytes to stdout until interrupted or --bytes is reached
    Stream {
        /// Output format
        #[arg(long, default_value = "raw", value_parser = ["raw", "hex", "base64"])]
        format: String,

        /// Total bytes to emit (0 = unlimited)
        #[arg(long, default_value = "0")]
        bytes: usize,

        /// Bytes per second (0 = as fast as the collector allows)
        #[arg(long, default_value = "0")]
        rate: usize,

        #[command(flatten)]
        collector: CollectorArgs,
    },

    /// Record raw timing deltas and summarize the noise source
    Raw {
        /// Number of deltas to record
        #[arg(long, default_value = "100000")]
        samples: usize,

        /// Use a fixed noise loop count instead of the shuffled one
        #[arg(long)]
        fixed_loops: Option<u64>,

        /// Write the deltas to this file, one decimal value per line
        #[arg(long)]
        dump: Option<String>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        collector: CollectorArgs,
    },

    /// Run the statistical test battery over collector output
    Report {
        /// Number of bytes to test
        #[arg(long, default_value = "100000")]
        bytes: usize,

        /// Write the full JSON report to this path
        #[arg(long)]
        output: Option<String>,

        #[command(flatten)]
        collector: CollectorArgs,
    },

    /// Measure throughput across oversample rates
    Bench {
        /// Bytes read per oversample rate
        #[arg(long, default_value = "4096")]
        bytes: usize,

        /// Highest oversample rate to measure
        #[arg(long, default_value = "3")]
        max_osr: u32,

        /// Disable the memory access noise source
        #[arg(long)]
        no_memory: bool,

        /// Write the results as JSON to this path
        #[arg(long)]
        output: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Selftest { json } => commands::selftest::run(json),
        Commands::Read {
            bytes,
            format,
            output,
            collector,
        } => commands::read::run(&collector, bytes, &format, output.as_deref()),
        Commands::Stream {
            format,
            bytes,
            rate,
            collector,
        } => commands::stream::run(&collector, &format, rate, bytes),
        Commands::Raw {
            samples,
            fixed_loops,
            dump,
            json,
            collector,
        } => commands::raw::run(&collector, samples, fixed_loops, dump.as_deref(), json),
        Commands::Report {
            bytes,
            output,
            collector,
        } => commands::report::run(&collector, bytes, output.as_deref()),
        Commands::Bench {
            bytes,
            max_osr,
            no_memory,
            output,
        } => commands::bench::run(bytes, max_osr, no_memory, output.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn read_parses_collector_options() {
        let cli = Cli::try_parse_from([
            "jitterentropy",
            "read",
            "-n",
            "64",
            "--osr",
            "3",
            "--no-memory",
            "--record-only",
        ])
        .unwrap();
        match cli.command {
            Commands::Read {
                bytes, collector, ..
            } => {
                assert_eq!(bytes, 64);
                assert_eq!(collector.osr, Some(3));
                assert!(collector.no_memory);
                assert!(collector.record_only);
            }
            _ => panic!("expected read"),
        }
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(Cli::try_parse_from(["jitterentropy", "read", "--format", "octal"]).is_err());
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["jitterentropy", "selftest", "-v"]).unwrap();
        assert!(cli.verbose);
    }
}
