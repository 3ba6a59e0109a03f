//! Core traits for the voice room agent
//!
//! Every external collaborator sits behind one of these traits so backends
//! can be swapped and tests can script them.
//!
//! ```text
//! Speech:
//!   - SpeechToText: audio -> transcript events
//!   - TextToSpeech: reply text -> audio frames
//!
//! Language models:
//!   - ReplyGenerator: transcript + context -> reply text chunks
//!
//! Room:
//!   - RoomTransport: authenticated join
//!   - RoomConnection: events, audio in/out, side channel
//! ```

mod llm;
mod room;
mod speech;

pub use llm::{ReplyGenerator, ReplyRequest};
pub use room::{DisconnectReason, JoinRequest, RoomConnection, RoomEvent, RoomTransport};
pub use speech::{SpeechToText, TextToSpeech};
