//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{AgentConfig, ConfigError, PipelineConfig, ReconnectConfig};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Room to join
    #[serde(default)]
    pub room: RoomConfig,

    /// Assistant behaviour
    #[serde(default)]
    pub agent: AgentConfig,

    /// Speech pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Reconnection policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Reply generation backend
    #[serde(default)]
    pub llm: LlmConfig,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_room()?;
        self.validate_pipeline()?;
        self.validate_reconnect()?;
        self.validate_llm()?;
        Ok(())
    }

    fn validate_room(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("room.url", &self.room.url),
            ("room.name", &self.room.name),
            ("room.identity", &self.room.identity),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field.to_string()));
            }
        }
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        let pipeline = &self.pipeline;

        if pipeline.event_bus_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.event_bus_capacity".to_string(),
                message: "Event bus capacity must be at least 1".to_string(),
            });
        }

        if pipeline.max_retries > 10 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.max_retries".to_string(),
                message: format!("{} retries is too many (maximum 10)", pipeline.max_retries),
            });
        }

        if pipeline.initial_backoff_ms > pipeline.max_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.initial_backoff_ms".to_string(),
                message: "Initial backoff exceeds max_backoff_ms".to_string(),
            });
        }

        Ok(())
    }

    fn validate_reconnect(&self) -> Result<(), ConfigError> {
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_backoff_ms".to_string(),
                message: "Initial backoff exceeds max_backoff_ms".to_string(),
            });
        }
        Ok(())
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        let llm = &self.llm;

        if llm.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingField("llm.endpoint".to_string()));
        }

        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".to_string(),
                message: format!("{} is outside [0.0, 2.0]", llm.temperature),
            });
        }

        if llm.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.timeout_secs".to_string(),
                message: "Timeout must be positive".to_string(),
            });
        }

        Ok(())
    }
}

/// Room connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Room server URL
    #[serde(default = "default_room_url")]
    pub url: String,

    #[serde(default = "default_room_name")]
    pub name: String,

    /// Participant identity of the agent
    #[serde(default = "default_identity")]
    pub identity: String,

    #[serde(default = "default_display_name")]
    pub display_name: String,
}

fn default_room_url() -> String {
    "ws://localhost:7880".to_string()
}
fn default_room_name() -> String {
    "worldweaver-room".to_string()
}
fn default_identity() -> String {
    "WorldWeaver-Agent".to_string()
}
fn default_display_name() -> String {
    "WorldWeaver AI".to_string()
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            url: default_room_url(),
            name: default_room_name(),
            identity: default_identity(),
            display_name: default_display_name(),
        }
    }
}

/// Ollama reply generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on generated tokens per reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    256
}
fn default_llm_timeout() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from `config/` relative to the working directory
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from an explicit config directory.
///
/// Sources, later ones winning: `{dir}/default.*`, `{dir}/{env}.*`, then
/// `WEAVER__SECTION__KEY` environment variables.
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    let default_path = dir.join("default");
    builder = builder.add_source(File::with_name(&default_path.to_string_lossy()).required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        let env_path = dir.join(env_name);
        builder = builder.add_source(File::with_name(&env_path.to_string_lossy()).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("WEAVER")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
