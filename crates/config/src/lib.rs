//! Configuration management for the voice room agent
//!
//! Supports loading configuration from:
//! - TOML/YAML/JSON files under `config/` (`default`, then `{env}`)
//! - Environment variables (`WEAVER__` prefix, `__` separated)

pub mod agent;
pub mod observability;
pub mod pipeline;
pub mod settings;

pub use agent::{AgentConfig, DEFAULT_GREETING, DEFAULT_INSTRUCTIONS};
pub use observability::init_tracing;
pub use pipeline::{PipelineConfig, ReconnectConfig};
pub use settings::{
    load_settings, load_settings_from, LlmConfig, ObservabilityConfig, RoomConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => ConfigError::MissingField(key),
            other => ConfigError::ParseError(other.to_string()),
        }
    }
}
