//! Transcription output types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one contiguous stretch of user speech, as reported by the
/// voice-activity signal of the transcription provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg-{}", self.0)
    }
}

/// A speech segment as seen by the session. Providers number segments per
/// transcription stream, so the stream that produced it is part of its
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Utterance {
    pub stream: u64,
    pub segment: SegmentId,
}

impl Utterance {
    pub fn new(stream: u64, segment: SegmentId) -> Self {
        Self { stream, segment }
    }
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}/{}", self.stream, self.segment)
    }
}

/// Partial or final transcript text for a speech segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub segment: SegmentId,
    pub text: String,
    /// Final fragments carry the full utterance for the segment
    pub is_final: bool,
}

impl TranscriptFragment {
    pub fn partial(segment: SegmentId, text: impl Into<String>) -> Self {
        Self {
            segment,
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(segment: SegmentId, text: impl Into<String>) -> Self {
        Self {
            segment,
            text: text.into(),
            is_final: true,
        }
    }

    /// True when the fragment has no speakable content
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Item emitted by a streaming transcription provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptEvent {
    /// Voice activity detected at the start of a segment
    VoiceStarted { segment: SegmentId },
    Fragment(TranscriptFragment),
}

impl TranscriptEvent {
    pub fn segment(&self) -> SegmentId {
        match self {
            TranscriptEvent::VoiceStarted { segment } => *segment,
            TranscriptEvent::Fragment(fragment) => fragment.segment,
        }
    }
}
