use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid loop configuration: {0}")]
    InvalidLoop(String),

    #[error("Invalid {0} timeout: must be positive")]
    InvalidTimeout(&'static str),

    #[error("Invalid oracle max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("Invalid temperature: {0}. Must be between 0.0 and 2.0")]
    InvalidTemperature(f32),

    #[error("{0} base_url cannot be empty")]
    EmptyBaseUrl(&'static str),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .finloop/config.yaml (project config)
    /// 3. .finloop/local.yaml (project local overrides, optional)
    /// 4. Environment variables (FINLOOP_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".finloop")
    }

    /// Same precedence as [`load`](Self::load), reading YAML from `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("FINLOOP_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        config
            .loop_config
            .validate()
            .map_err(ConfigError::InvalidLoop)?;

        if config.oracle.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl("oracle"));
        }
        if config.oracle.call_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("oracle"));
        }
        if config.oracle.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.oracle.max_attempts));
        }
        if !(0.0..=2.0).contains(&config.oracle.temperature) {
            return Err(ConfigError::InvalidTemperature(config.oracle.temperature));
        }

        if config.retrieval.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl("retrieval"));
        }
        if config.retrieval.call_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("retrieval"));
        }

        if config.trace.database_path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.trace.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.trace.max_connections,
            ));
        }
        if config.trace.append_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("trace append"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}
