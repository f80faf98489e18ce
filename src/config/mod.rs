// src/config/mod.rs

//! Configuration for the `procwatch` binary.
//!
//! - [`model`] holds the raw (serde) and validated config types.
//! - [`loader`] reads TOML from disk.
//! - [`validate`] turns a [`RawConfigFile`] into a [`ConfigFile`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{
    ConfigFile, RawConfigFile, RawWaitSection, RawWatcherSection, WaitSection, WatcherSection,
};
pub use validate::parse_duration;
