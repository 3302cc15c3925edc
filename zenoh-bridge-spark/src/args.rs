//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Files read when no `--config` is given, merged in this order.
pub const DEFAULT_CONFIG_FILES: [&str; 2] = [
    "/opt/spark/iot/secrets.json",
    "/opt/spark/iot/config.json",
];

/// SPARK bridge command line.
#[derive(Parser, Debug, Clone)]
#[command(about = "Zenoh bridge for SPARK parking occupancy telemetry", version)]
pub struct BridgeArgs {
    /// Configuration file. Repeat to merge several files; later files win.
    #[arg(short, long = "config", value_name = "PATH", default_values = DEFAULT_CONFIG_FILES)]
    pub configs: Vec<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}
