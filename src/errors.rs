// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    /// The child could not be started (empty command, missing executable,
    /// exec failure, or no Tokio runtime to drive it).
    #[error("failed to launch `{command}`: {source}")]
    LaunchError {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Process not running")]
    NotRunning,

    /// The process exited before a line matched the pattern.
    #[error("No match for {0:?}, process exited")]
    NoMatch(String),

    /// A wait was requested after the process had already exited.
    #[error("Process already terminated")]
    AlreadyTerminated,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WatcherError>;
