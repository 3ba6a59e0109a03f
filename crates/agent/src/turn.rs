//! Turn model

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use weaver_core::{ContextSnapshot, Utterance};

pub type TurnId = u64;

/// Conversational state of a turn, or of the controller when no turn is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    /// Reply fully spoken, or nothing to say
    Completed,
    /// Cancelled by barge-in, reconnection or shutdown
    Interrupted,
    Failed,
    /// Final transcript was empty
    Abandoned,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnState::Completed | TurnState::Interrupted | TurnState::Failed | TurnState::Abandoned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Listening => "listening",
            TurnState::Thinking => "thinking",
            TurnState::Speaking => "speaking",
            TurnState::Completed => "completed",
            TurnState::Interrupted => "interrupted",
            TurnState::Failed => "failed",
            TurnState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnOrigin {
    Speech(Utterance),
    /// Scripted utterance such as the greeting
    Announcement,
}

/// A live turn, owned by the controller
#[derive(Debug)]
pub struct Turn {
    pub id: TurnId,
    pub origin: TurnOrigin,
    pub state: TurnState,
    pub transcript: String,
    /// Captured on the Listening -> Thinking transition
    pub context: Option<ContextSnapshot>,
    pub reply: String,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
    /// Synthesis input; dropped once the reply is complete
    pub(crate) feed: Option<mpsc::UnboundedSender<String>>,
    pub(crate) reply_done: bool,
    pub(crate) synthesis_done: bool,
}

impl Turn {
    pub(crate) fn new(id: TurnId, origin: TurnOrigin, state: TurnState) -> Self {
        Self {
            id,
            origin,
            state,
            transcript: String::new(),
            context: None,
            reply: String::new(),
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
            feed: None,
            reply_done: false,
            synthesis_done: false,
        }
    }

    pub fn utterance(&self) -> Option<Utterance> {
        match self.origin {
            TurnOrigin::Speech(utterance) => Some(utterance),
            TurnOrigin::Announcement => None,
        }
    }

    pub(crate) fn archive(self, outcome: TurnState, failure: Option<String>) -> TurnRecord {
        TurnRecord {
            id: self.id,
            origin: self.origin,
            outcome,
            transcript: self.transcript,
            context: self.context,
            reply: self.reply,
            failure,
            started_at: self.started_at,
            ended_at: Utc::now(),
        }
    }
}

/// An archived turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub id: TurnId,
    pub origin: TurnOrigin,
    pub outcome: TurnState,
    pub transcript: String,
    pub context: Option<ContextSnapshot>,
    pub reply: String,
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Current controller state, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnStatus {
    pub turn_id: Option<TurnId>,
    pub state: TurnState,
}

impl TurnStatus {
    pub fn idle() -> Self {
        Self {
            turn_id: None,
            state: TurnState::Idle,
        }
    }
}

/// One state change of one turn, published on a broadcast channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTransition {
    pub turn_id: TurnId,
    pub from: TurnState,
    pub to: TurnState,
    pub at: DateTime<Utc>,
}
