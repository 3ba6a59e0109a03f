//! Bounded exponential backoff

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use weaver_config::{PipelineConfig, ReconnectConfig};

/// Retry bound and backoff curve shared by stage runners and reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

impl From<&ReconnectConfig> for RetryPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_retries: config.max_attempts,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
        }
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another try is allowed after `retry` retries have been made
    pub fn allows_retry(&self, retry: u32) -> bool {
        retry < self.max_retries
    }

    /// Delay before retry number `retry` (1-based), doubling from
    /// `initial_backoff` and capped at `max_backoff`
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Sleep for the backoff of `retry`, stretched to a server hint if one is
    /// given. Returns false if cancelled first.
    pub async fn wait(&self, retry: u32, hint: Option<Duration>, cancel: &CancellationToken) -> bool {
        let delay = match hint {
            Some(hint) => self.backoff(retry).max(hint.min(self.max_backoff)),
            None => self.backoff(retry),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
