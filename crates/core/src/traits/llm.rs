//! Reply generation trait

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::context::ContextSnapshot;
use crate::error::ProviderError;

/// Request handed to the reply generator once a turn's transcript is final
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRequest {
    pub turn_id: u64,
    pub transcript: String,
    /// Context captured when the request was composed
    pub context: ContextSnapshot,
}

impl ReplyRequest {
    pub fn new(turn_id: u64, transcript: impl Into<String>, context: ContextSnapshot) -> Self {
        Self {
            turn_id,
            transcript: transcript.into(),
            context,
        }
    }
}

/// Streaming language model reply generation
///
/// Implementations:
/// - `OllamaReplyGenerator` - local Ollama chat endpoint
///
/// Chunks are yielded as the model produces them. Dropping the stream cancels
/// the underlying request.
///
/// # Example
///
/// ```ignore
/// let request = ReplyRequest::new(1, "what is this building", snapshot);
/// let mut chunks = generator.generate(request);
/// while let Some(chunk) = chunks.next().await {
///     print!("{}", chunk?);
/// }
/// ```
pub trait ReplyGenerator: Send + Sync + 'static {
    fn generate<'a>(
        &'a self,
        request: ReplyRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send + 'a>>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
