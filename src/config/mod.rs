//! Configuration management for downloaderd
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! The resulting [`Config`] is built once at startup and handed to each
//! component's constructor; nothing reads configuration after that.
//!
//! # Usage
//!
//! ```no_run
//! use downloaderd::config::Config;
//!
//! let config = Config::load(None).expect("Failed to load configuration");
//! println!("Workers: {}", config.engine.workers);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `DOWNLOADERD__<section>__<key>`
//!
//! Examples:
//! - `DOWNLOADERD__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `DOWNLOADERD__ENGINE__WORKERS=8`
//! - `DOWNLOADERD__ENGINE__CHUNK_SIZE=64KB`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/downloaderd.toml`.
//! This can be overridden using the `DOWNLOADERD_CONFIG` environment variable
//! or the `--config` flag.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    Config, EngineConfig, FetchConfig, HookConfig, MetadataBackend, MetadataConfig,
    ServerConfig, StorageConfig, StorageProvider,
};
pub use validation::ValidationError;

use std::path::PathBuf;
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
    /// `path` overrides `DOWNLOADERD_CONFIG` and the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or validation fails.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, without secrets from the environment
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Re-run validation, e.g. after command-line overrides were applied
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)?;
        Ok(())
    }
}
