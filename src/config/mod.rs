//! Configuration management for nightrelay
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use nightrelay::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Sleeping {} between passes", config.daemon.sleep);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `NIGHTRELAY__<section>__<key>`
//!
//! Examples:
//! - `NIGHTRELAY__DAEMON__CATCHUP_HOUR=13`
//! - `NIGHTRELAY__REMOTE__HOST=dts`
//! - `NIGHTRELAY__ARCHIVE__ENABLED=false`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/nightrelay.toml`.
//! This can be overridden using the `NIGHTRELAY_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    ArchiveConfig, Config, DaemonConfig, DirectoryConfig, MirrorConfig, NightlogConfig,
    PermissionsConfig, PipelineConfig, RemoteConfig,
};
pub use validation::{ValidationError, require_directories};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - Validation fails (hours out of range, bad templates, etc.)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Environment overrides still apply on top of the file.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_with_environment(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
