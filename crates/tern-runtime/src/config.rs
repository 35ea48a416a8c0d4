//! Collector configuration
//!
//! Thresholds can be set in code or loaded from a TOML file:
//!
//! ```toml
//! max_objects = 50000
//! max_bytes = 4194304
//! pool_bytes = 67108864
//! ```
//!
//! Missing keys keep their defaults.

use crate::defaults::{DEFAULT_MAX_BYTES, DEFAULT_MAX_OBJECTS, DEFAULT_POOL_BYTES};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Heap and collector thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Live objects above which an allocation triggers a collection
    pub max_objects: usize,

    /// Live payload bytes above which an allocation triggers a collection
    pub max_bytes: usize,

    /// Capacity of the memory pool
    pub pool_bytes: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_objects: DEFAULT_MAX_OBJECTS,
            max_bytes: DEFAULT_MAX_BYTES,
            pool_bytes: DEFAULT_POOL_BYTES,
        }
    }
}

impl GcConfig {
    /// Set the live-object threshold
    pub fn with_max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = max_objects;
        self
    }

    /// Set the live-byte threshold
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Set the pool capacity
    pub fn with_pool_bytes(mut self, pool_bytes: usize) -> Self {
        self.pool_bytes = pool_bytes;
        self
    }

    /// Parse a configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GcConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "pool_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
