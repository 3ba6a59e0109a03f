//! Out-of-band context facts and the side-channel message format
//!
//! A remote participant can tell the assistant what they are currently looking
//! at by sending a data message such as
//! `{"type":"visual_context","content":"a cathedral"}`. Such messages become
//! [`ContextFact`]s of kind [`ContextKind::VISUAL`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProtocolError;

/// Side-channel message type carrying visual context
pub const VISUAL_CONTEXT_MESSAGE: &str = "visual_context";

/// Tag identifying which kind of fact a payload describes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextKind(Cow<'static, str>);

impl ContextKind {
    /// What the user currently sees
    pub const VISUAL: ContextKind = ContextKind(Cow::Borrowed("visual"));

    pub fn new(kind: impl Into<String>) -> Self {
        Self(Cow::Owned(kind.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single out-of-band fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFact {
    pub kind: ContextKind,
    pub payload: String,
    pub received_at: DateTime<Utc>,
    /// Arrival order assigned by the store; zero until stored
    pub seq: u64,
}

impl ContextFact {
    pub fn new(kind: ContextKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            received_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn visual(payload: impl Into<String>) -> Self {
        Self::new(ContextKind::VISUAL, payload)
    }
}

/// Immutable copy of every current fact, one per kind
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    facts: BTreeMap<ContextKind, ContextFact>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl ContextSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_facts(facts: impl IntoIterator<Item = ContextFact>) -> Self {
        Self {
            facts: facts.into_iter().map(|f| (f.kind.clone(), f)).collect(),
            taken_at: Some(Utc::now()),
        }
    }

    pub fn get(&self, kind: &ContextKind) -> Option<&ContextFact> {
        self.facts.get(kind)
    }

    pub fn visual(&self) -> Option<&str> {
        self.get(&ContextKind::VISUAL).map(|f| f.payload.as_str())
    }

    /// Facts ordered by kind
    pub fn facts(&self) -> impl Iterator<Item = &ContextFact> {
        self.facts.values()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Parse a side-channel data message.
///
/// Returns `Ok(None)` for well-formed messages of a type this agent does not
/// handle.
pub fn parse_side_channel(bytes: &[u8]) -> Result<Option<ContextFact>, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    let message_type = object
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::InvalidField("type"))?;

    if message_type != VISUAL_CONTEXT_MESSAGE {
        return Ok(None);
    }

    let content = object
        .get("content")
        .and_then(|c| c.as_str())
        .ok_or(ProtocolError::InvalidField("content"))?;

    Ok(Some(ContextFact::visual(content)))
}
