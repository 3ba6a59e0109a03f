//! Speech processing traits

use futures::Stream;
use std::pin::Pin;

use crate::error::ProviderError;
use crate::transcript::TranscriptEvent;
use crate::AudioFrame;

/// Streaming speech-to-text with voice-activity markers
///
/// The returned stream yields a [`TranscriptEvent::VoiceStarted`] when a
/// speech segment begins, partial fragments while the user talks and a final
/// fragment when the segment ends. A stream item error ends that invocation;
/// the caller decides whether to open a new one.
pub trait SpeechToText: Send + Sync + 'static {
    fn transcribe_stream<'a>(
        &'a self,
        audio_stream: Pin<Box<dyn Stream<Item = AudioFrame> + Send + 'a>>,
    ) -> Pin<Box<dyn Stream<Item = Result<TranscriptEvent, ProviderError>> + Send + 'a>>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Streaming text-to-speech
///
/// Consumes reply text chunks as they arrive and yields audio frames. Dropping
/// the returned stream stops synthesis.
pub trait TextToSpeech: Send + Sync + 'static {
    fn synthesize_stream<'a>(
        &'a self,
        text_stream: Pin<Box<dyn Stream<Item = String> + Send + 'a>>,
    ) -> Pin<Box<dyn Stream<Item = Result<AudioFrame, ProviderError>> + Send + 'a>>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
