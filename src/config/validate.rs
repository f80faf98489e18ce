// src/config/validate.rs

use std::time::Duration;

use regex::Regex;

use crate::config::model::{ConfigFile, RawConfigFile, WaitSection, WatcherSection};
use crate::errors::{Result, WatcherError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::WatcherError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let watcher = validate_watcher_section(&raw)?;
        let wait = validate_wait_section(&raw)?;
        Ok(ConfigFile::new_unchecked(watcher, wait))
    }
}

fn validate_watcher_section(cfg: &RawConfigFile) -> Result<WatcherSection> {
    let section = &cfg.watcher;
    let cleanup_timeout = duration_field("watcher.cleanup_timeout", &section.cleanup_timeout)?;
    let terminate_timeout =
        duration_field("watcher.terminate_timeout", &section.terminate_timeout)?;

    if cleanup_timeout.is_zero() {
        return Err(WatcherError::ConfigError(
            "[watcher].cleanup_timeout must be > 0".to_string(),
        ));
    }

    Ok(WatcherSection {
        cleanup_timeout,
        terminate_timeout,
        strip_escape_sequences: section.strip_escape_sequences,
        pty: section.pty,
    })
}

fn validate_wait_section(cfg: &RawConfigFile) -> Result<Option<WaitSection>> {
    let Some(wait) = &cfg.wait else {
        return Ok(None);
    };

    let pattern = Regex::new(&wait.pattern).map_err(|e| {
        WatcherError::ConfigError(format!(
            "[wait].pattern {:?} is not a valid regex: {}",
            wait.pattern, e
        ))
    })?;

    Ok(Some(WaitSection {
        pattern,
        stream: wait.stream,
    }))
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| WatcherError::ConfigError(format!("{field}: {e}")))
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' missing unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
