//! Reply generation for the voice room agent
//!
//! Features:
//! - Prompt composition with the assistant instructions and context framing
//! - Streaming Ollama chat backend implementing `ReplyGenerator`

pub mod backend;
pub mod prompt;

pub use backend::OllamaReplyGenerator;
pub use prompt::{context_message, Message, PromptBuilder, Role};

use std::time::Duration;
use thiserror::Error;
use weaver_core::{ProviderError, Stage};

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout")]
    Timeout,

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for ProviderError {
    fn from(err: LlmError) -> Self {
        let stage = Stage::ReplyGeneration;
        match err {
            LlmError::Timeout => ProviderError::Timeout { stage },
            LlmError::RateLimited { retry_after } => ProviderError::RateLimited { stage, retry_after },
            LlmError::Network(message) => ProviderError::Unavailable { stage, message },
            e @ LlmError::Server { .. } => ProviderError::Unavailable {
                stage,
                message: e.to_string(),
            },
            e @ (LlmError::Api { .. } | LlmError::Configuration(_)) => ProviderError::Rejected {
                stage,
                message: e.to_string(),
            },
            LlmError::InvalidResponse(message) => ProviderError::InvalidOutput { stage, message },
        }
    }
}
