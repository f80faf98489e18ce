// src/config/model.rs

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::types::Stream;
use crate::watcher::{DEFAULT_CLEANUP_TIMEOUT, WatcherOptions};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [watcher]
/// cleanup_timeout = "5s"
/// terminate_timeout = "3s"
/// strip_escape_sequences = true
/// pty = false
///
/// [wait]
/// pattern = "^ready$"
/// stream = "stdout"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub watcher: RawWatcherSection,

    /// Optional line to wait for after start.
    #[serde(default)]
    pub wait: Option<RawWaitSection>,
}

/// `[watcher]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWatcherSection {
    /// Bound for the shutdown hook's wait on a force-killed child.
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout: String,

    /// Grace period between closing stdin (on our stdin EOF) and force-kill.
    #[serde(default = "default_terminate_timeout")]
    pub terminate_timeout: String,

    /// Remove ANSI escape sequences before echoing child output.
    #[serde(default)]
    pub strip_escape_sequences: bool,

    /// Run the command under a pseudo-terminal (see `with_pty`).
    #[serde(default)]
    pub pty: bool,
}

fn default_cleanup_timeout() -> String {
    "5s".to_string()
}

fn default_terminate_timeout() -> String {
    "3s".to_string()
}

impl Default for RawWatcherSection {
    fn default() -> Self {
        Self {
            cleanup_timeout: default_cleanup_timeout(),
            terminate_timeout: default_terminate_timeout(),
            strip_escape_sequences: false,
            pty: false,
        }
    }
}

/// `[wait]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWaitSection {
    pub pattern: String,

    #[serde(default)]
    pub stream: Stream,
}

/// Validated configuration; construct via `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub watcher: WatcherSection,
    pub wait: Option<WaitSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherSection {
    pub cleanup_timeout: Duration,
    pub terminate_timeout: Duration,
    pub strip_escape_sequences: bool,
    pub pty: bool,
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            terminate_timeout: Duration::from_secs(3),
            strip_escape_sequences: false,
            pty: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WaitSection {
    pub pattern: Regex,
    pub stream: Stream,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(watcher: WatcherSection, wait: Option<WaitSection>) -> Self {
        Self { watcher, wait }
    }

    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            cleanup_timeout: self.watcher.cleanup_timeout,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(WatcherSection::default(), None)
    }
}
