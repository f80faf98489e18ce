// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file and return the raw, unvalidated `RawConfigFile`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it (durations, wait
/// pattern).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Load `path` if given; otherwise load [`default_config_path`] if it exists,
/// falling back to built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<ConfigFile> {
    if let Some(path) = path {
        return load_and_validate(path);
    }

    let default_path = default_config_path();
    if default_path.is_file() {
        debug!(path = %default_path.display(), "using default config file");
        load_and_validate(default_path)
    } else {
        Ok(ConfigFile::default())
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("procwatch.toml")
}
