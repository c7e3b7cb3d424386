//! Layered configuration loading using figment.
//!
//! Sources in priority order, highest wins:
//! 1. Environment variables (`TUTOR_` prefix, `__` as separator)
//! 2. `tutor.toml` in the working directory
//! 3. Built-in defaults
//!
//! `TUTOR_PAGINATION__MAX_LIMIT=500` maps to `pagination.max_limit`.

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

const fn default_limit() -> u32 {
    100
}

const fn default_max_limit() -> u32 {
    1000
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_graphql_path() -> String {
    "/graphql".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

/// Page size policy for connection queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PaginationConfig {
    /// Page size when a request gives no limit
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Largest accepted limit; anything above is rejected
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl PaginationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pagination.max_limit".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(ConfigError::InvalidValue {
                field: "pagination.default_limit".to_string(),
                reason: format!("must be between 1 and {}", self.max_limit),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_graphql_path")]
    pub graphql_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            graphql_path: default_graphql_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Fallback filter when `TUTOR_LOG_FILTER` is unset
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TutorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl TutorConfig {
    /// Load and validate configuration from all sources
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// Extract and validate from an explicit provider chain
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.pagination.validate()?;
        Ok(config)
    }

    /// Build the figment provider chain.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let local_path = PathBuf::from("tutor.toml");
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        figment.merge(Env::prefixed("TUTOR_").split("__"))
    }
}
