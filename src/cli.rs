// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `traind`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "traind",
    version,
    about = "Consume training tasks from a queue and run them through plugins.",
    long_about = None
)]
pub struct CliArgs {
    /// Optional TOML config file.
    ///
    /// Environment variables always override values from this file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Run a single receive/process cycle, then exit.
    #[arg(long)]
    pub once: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TRAIND_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate configuration, print the selected task source, but
    /// don't poll.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
