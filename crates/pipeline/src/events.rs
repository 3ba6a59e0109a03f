//! Events carried on the session bus

use chrono::{DateTime, Utc};
use weaver_core::{ContextFact, DisconnectReason, ProviderError, TranscriptEvent};

/// Everything the session consumption loop reacts to
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Voice activity or transcript fragment from the transcription worker.
    /// `stream` counts the provider streams the worker has opened; segment
    /// ids are only unique within one stream.
    Transcript { stream: u64, event: TranscriptEvent },
    /// The transcription worker gave up on the current attempt series
    TranscriptionFailed(ProviderError),
    /// A context fact was stored. Informational; the store holds the value.
    ContextUpdated(ContextFact),
    ReplyChunk { turn_id: u64, text: String },
    ReplyDone { turn_id: u64 },
    ReplyFailed { turn_id: u64, error: ProviderError },
    SynthesisDone { turn_id: u64, frames: u64 },
    SynthesisFailed { turn_id: u64, error: ProviderError },
    Connection(ConnectionEvent),
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Transcript { .. } => "transcript",
            SessionEvent::TranscriptionFailed(_) => "transcription_failed",
            SessionEvent::ContextUpdated(_) => "context_updated",
            SessionEvent::ReplyChunk { .. } => "reply_chunk",
            SessionEvent::ReplyDone { .. } => "reply_done",
            SessionEvent::ReplyFailed { .. } => "reply_failed",
            SessionEvent::SynthesisDone { .. } => "synthesis_done",
            SessionEvent::SynthesisFailed { .. } => "synthesis_failed",
            SessionEvent::Connection(_) => "connection",
        }
    }

    /// Turn the event belongs to, for turn-scoped stage output
    pub fn turn_id(&self) -> Option<u64> {
        match self {
            SessionEvent::ReplyChunk { turn_id, .. }
            | SessionEvent::ReplyDone { turn_id }
            | SessionEvent::ReplyFailed { turn_id, .. }
            | SessionEvent::SynthesisDone { turn_id, .. }
            | SessionEvent::SynthesisFailed { turn_id, .. } => Some(*turn_id),
            _ => None,
        }
    }
}

/// Connection state transitions observed on the room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Joined,
    Disconnected(DisconnectReason),
}

/// Sequenced, timestamped bus entry
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Strictly increasing in delivery order
    pub seq: u64,
    pub at: DateTime<Utc>,
    /// Connection generation of the producer
    pub generation: u64,
    pub event: SessionEvent,
}
