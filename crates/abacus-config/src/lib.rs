//! Configuration system for Abacus.
//!
//! Provides TOML-based configuration with:
//! - `[server]`, `[client]` and `[logging]` sections, every field optional
//! - Config file layering (XDG user config + project-local overrides)
//! - Defaults filled in by accessors, so an empty file is a valid config

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
