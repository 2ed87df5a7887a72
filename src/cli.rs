//! CLI argument parsing for the trace replay tool

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Output format for detection reports
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON report for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "huella")]
#[command(version)]
#[command(
    about = "Canvas-fingerprinting detection engine: replay and analyze operation traces",
    long_about = None
)]
pub struct Cli {
    /// JSONL operation trace to replay (reads stdin when omitted)
    pub trace: Option<PathBuf>,

    /// Engine configuration file (TOML)
    #[arg(short = 'C', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Show the summary table only, without individual detections
    #[arg(short = 'c', long = "summary")]
    pub summary: bool,

    /// Run the signature classifier over every surface after replay
    #[arg(long = "classify")]
    pub classify: bool,

    /// Trusted caller-URL pattern (regex); repeatable, merged with the
    /// config file's list
    #[arg(long = "trust", value_name = "PATTERN")]
    pub trust: Vec<String>,

    /// Enable debug tracing to stderr
    #[arg(long)]
    pub debug: bool,
}
