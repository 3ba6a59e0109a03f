//! Core traits and types for the voice room agent
//!
//! This crate provides foundational types used across all other crates:
//! - Traits for pluggable speech providers and the room transport
//! - Audio frame types
//! - Transcript events and side-channel context facts
//! - Error types

pub mod audio;
pub mod context;
pub mod credential;
pub mod error;
pub mod traits;
pub mod transcript;

pub use audio::{AudioFrame, Channels, SampleRate};
pub use context::{parse_side_channel, ContextFact, ContextKind, ContextSnapshot};
pub use credential::AccessCredential;
pub use error::{AuthError, Error, ProtocolError, ProviderError, Result, Stage, TransportError};
pub use transcript::{SegmentId, TranscriptEvent, TranscriptFragment, Utterance};

pub use traits::{
    // Speech
    SpeechToText, TextToSpeech,
    // Reply generation
    ReplyGenerator, ReplyRequest,
    // Room
    DisconnectReason, JoinRequest, RoomConnection, RoomEvent, RoomTransport,
};
