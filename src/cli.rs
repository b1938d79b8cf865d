//! Command-line interface for forkpool.
use std::{ffi::OsString, path::PathBuf, str::FromStr};

use clap::{CommandFactory, Parser, Subcommand, error::ErrorKind};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for forkpool.
#[derive(Debug, Parser)]
#[command(name = "forkpool", version)]
#[command(about = "A minimal process-pool daemon supervisor", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Use this PID file instead of the registered one.
    #[arg(long, value_name = "PATH", global = true)]
    pub pid_file: Option<PathBuf>,

    /// Number of workers to fork on start.
    #[arg(short = 'n', long, value_name = "N", global = true)]
    pub workers: Option<usize>,

    /// Redirect the detached supervisor's stdio to /dev/null.
    #[arg(long, global = true)]
    pub detach_stdio: bool,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Detach and fork the worker pool.
    Start,
    /// Remove the PID file so the running supervisor shuts down.
    Stop,
    /// Stop, then start again.
    Restart,
    /// Report whether the supervisor is running.
    Status,
}

/// Parses `argv`, including the program name in position zero.
pub fn parse_args<I, T>(argv: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(argv)
}

/// Whether a parse error is clap answering `--help` or `--version`.
pub fn is_informational(err: &clap::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::DisplayHelp
            | ErrorKind::DisplayVersion
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
    )
}

/// Usage text printed for a missing or unknown command.
pub fn usage() -> String {
    Cli::command().render_help().to_string()
}
