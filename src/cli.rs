// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::Stream;

/// Command-line arguments for `procwatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "procwatch",
    version,
    about = "Run a command, echo its output and forward stdin to it.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to a config file (TOML).
    ///
    /// Default: `procwatch.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Log when a line matching this regex appears (whole-line match).
    #[arg(long, value_name = "REGEX")]
    pub wait_for: Option<String>,

    /// Stream to watch for `--wait-for` (stdout or stderr).
    #[arg(long, value_name = "STREAM")]
    pub wait_stream: Option<Stream>,

    /// Remove ANSI escape sequences from echoed output.
    #[arg(long)]
    pub strip_escapes: bool,

    /// Run the command under a pseudo-terminal.
    #[arg(long)]
    pub pty: bool,

    /// Grace period after stdin EOF before the command is killed (e.g. "3s").
    #[arg(long, value_name = "DURATION")]
    pub terminate_timeout: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PROCWATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// The command to run, followed by its arguments.
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
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
