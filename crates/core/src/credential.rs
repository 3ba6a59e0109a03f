//! Externally issued room access credential

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AuthError;

/// Opaque, time-bounded token handed in by whoever provisioned the session.
///
/// The agent never mints or refreshes credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessCredential {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessCredential {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Local check before dialing. The transport may still reject.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AuthError> {
        if self.token.trim().is_empty() {
            return Err(AuthError::Empty);
        }
        if self.is_expired_at(now) {
            return Err(AuthError::Expired(self.expires_at));
        }
        Ok(())
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
