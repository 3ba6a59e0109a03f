//! Session plumbing for the voice room agent
//!
//! This crate provides the moving parts between the room and the turn
//! controller:
//! - Context store for out-of-band facts (last write wins per kind)
//! - Ordered event bus with a single consumption point
//! - Streaming transcription, reply and synthesis stages with bounded retry
//! - Turn-id output gate in front of the room's audio output

pub mod context_store;
pub mod event_bus;
pub mod events;
pub mod output_gate;
pub mod retry;
pub mod stages;

pub use context_store::ContextStore;
pub use event_bus::{EventBus, EventPublisher, EventReceiver, TryPublishError};
pub use events::{ConnectionEvent, Envelope, SessionEvent};
pub use output_gate::{GatedOutput, OutputGate};
pub use retry::RetryPolicy;
pub use stages::{ReplyTask, SynthesisTask, TranscriptionWorker};
