//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Grantor - identity-and-access token service
#[derive(Parser, Debug)]
#[command(name = "grantor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "GRANTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GRANTOR_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "GRANTOR_LOG_FORMAT")]
    pub log_format: Option<String>,
}
