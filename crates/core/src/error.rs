//! Error taxonomy for the voice room agent
//!
//! Each concern has its own enum so callers can apply the matching policy:
//! - [`AuthError`] ends the session, never retried
//! - [`TransportError`] feeds the reconnection policy
//! - [`ProviderError`] is contained to the turn that made the call
//! - [`ProtocolError`] is logged and the payload dropped

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage that produced a provider error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Transcription,
    ReplyGeneration,
    Synthesis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcription => "transcription",
            Stage::ReplyGeneration => "reply_generation",
            Stage::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential problems at join time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Credential is empty")]
    Empty,

    #[error("Credential expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("Credential rejected: {0}")]
    Rejected(String),
}

/// Room connection failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed")]
    Closed,
}

/// Speech provider failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{stage} timed out")]
    Timeout { stage: Stage },

    #[error("{stage} rate limited")]
    RateLimited {
        stage: Stage,
        retry_after: Option<Duration>,
    },

    #[error("{stage} unavailable: {message}")]
    Unavailable { stage: Stage, message: String },

    #[error("{stage} rejected the request: {message}")]
    Rejected { stage: Stage, message: String },

    #[error("{stage} returned invalid output: {message}")]
    InvalidOutput { stage: Stage, message: String },
}

impl ProviderError {
    pub fn stage(&self) -> Stage {
        match self {
            ProviderError::Timeout { stage }
            | ProviderError::RateLimited { stage, .. }
            | ProviderError::Unavailable { stage, .. }
            | ProviderError::Rejected { stage, .. }
            | ProviderError::InvalidOutput { stage, .. } => *stage,
        }
    }

    /// Timeouts, rate limits and unavailability are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout { .. }
                | ProviderError::RateLimited { .. }
                | ProviderError::Unavailable { .. }
        )
    }

    /// Server-provided hint for how long to wait before retrying
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Malformed side-channel payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing or invalid field: {0}")]
    InvalidField(&'static str),
}

/// Crate-level error
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
