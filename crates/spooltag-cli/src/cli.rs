use std::path::PathBuf;

use clap::Parser;

/// Read and write filament spool tags from a terminal.
///
/// Commands are read from stdin, one per line; every response and
/// auto-detect notification is printed to stdout as one JSON object per line.
/// Logs go to stderr.
#[derive(Debug, Parser)]
#[command(name = "spooltag", version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "SPOOLTAG_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Use the in-process mock reader instead of PC/SC
    #[arg(long)]
    pub mock: bool,

    /// Only use readers whose name contains NAME (overrides the config file)
    #[arg(short, long, value_name = "NAME")]
    pub reader: Option<String>,

    /// Enable auto-detect on startup
    #[arg(long)]
    pub auto: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "SPOOLTAG_LOG", default_value = "info")]
    pub log_level: String,
}
