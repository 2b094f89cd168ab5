// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The level comes from `--log-level`, then the `RUNDAG_LOG` environment
//! variable, then defaults to `info`.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = resolve_level(cli_level);

    // Engine logs go to stderr: stdout is left to the dry-run report and to
    // task output that is not being captured into log files.
    //
    // Thread names only help when digging into the exec layer (each admitted
    // task runs on its own worker), so they are gated on verbosity along
    // with targets.
    let verbose = level >= Level::DEBUG;

    fmt()
        .with_max_level(level)
        .with_target(verbose)
        .with_thread_ids(false)
        .with_thread_names(verbose)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn resolve_level(cli_level: Option<LogLevel>) -> Level {
    if let Some(lvl) = cli_level {
        return lvl.into();
    }
    std::env::var("RUNDAG_LOG")
        .ok()
        .and_then(|s| s.trim().parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

impl From<LogLevel> for Level {
    fn from(lvl: LogLevel) -> Level {
        match lvl {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}
