//! Configuration management for Sweepbox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use sweepbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `SWEEPBOX__<section>__<key>`
//!
//! Examples:
//! - `SWEEPBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `SWEEPBOX__SWEEP__PRUNE_MODE=deferred`
//! - `SWEEPBOX__SWEEP__PRUNE_INTERVAL=30m`
//! - `SWEEPBOX__STORAGE__EXTRA_NAMESPACES=avatars,banners`
//!
//! S3 credentials are read only from `S3_ACCESS_KEY` / `S3_SECRET_KEY`
//! (or the `AWS_*` equivalents).
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/sweepbox.toml`.
//! This can be overridden using the `SWEEPBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, HumanDuration};
pub use models::{
    ApiLimits, Config, PruneMode, RetentionConfig, ServerConfig, StorageConfig, StorageProvider,
    SweepConfig, TelemetryConfig,
};
pub use validation::ValidationError;

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
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files. Secrets are not
    /// read from the environment on this path.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
