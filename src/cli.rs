// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `rundag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rundag",
    version,
    about = "Run a DAG of tasks to completion under a bounded resource envelope.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    ///
    /// Default: `Rundag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Rundag.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the DAG, but don't execute any commands.
    #[arg(long)]
    pub dry_run: bool,

    /// Milliseconds to sleep between scheduling ticks (overrides `[run]`).
    #[arg(long, value_name = "MS")]
    pub sleep_ms: Option<u64>,

    /// Wall-clock limit in seconds (overrides `[run]`).
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Capture per-attempt task output under this directory.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<String>,
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
