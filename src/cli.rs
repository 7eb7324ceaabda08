//! Command-line interface for proxsave-notify using clap.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format for journalctl (default).
    #[default]
    Text,
    /// Structured JSON format for log aggregation.
    Json,
}

/// Send ProxSave backup reports to the configured notification channels.
#[derive(Parser, Debug)]
#[command(name = "proxsave-notify")]
#[command(version)]
#[command(about = "Send ProxSave backup reports by email, Telegram, Gotify and webhooks")]
pub struct Cli {
    /// Path to configuration file.
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Backup report (JSON) to send.
    #[arg(long = "report", required_unless_present = "validate")]
    pub report: Option<PathBuf>,

    /// Validate configuration and exit.
    #[arg(long = "validate")]
    pub validate: bool,

    /// Log format: text or json.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, env = "LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Debug logging; also makes sendmail verbose.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}
