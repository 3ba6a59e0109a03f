//! Streaming speech stages
//!
//! Each stage invocation runs as its own task and reports back through the
//! event bus:
//! - [`TranscriptionWorker`]: room audio -> transcript events, reopened when the provider stream ends or fails
//! - [`ReplyTask`]: one turn's reply request -> reply chunks
//! - [`SynthesisTask`]: one turn's reply chunks -> gated room audio
//!
//! Reply and synthesis tasks stop cooperatively when the turn's
//! cancellation token fires.

mod reply;
mod synthesis;
mod transcription;

pub use reply::ReplyTask;
pub use synthesis::SynthesisTask;
pub use transcription::TranscriptionWorker;
