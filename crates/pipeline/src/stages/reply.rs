//! Reply generation stage

use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weaver_core::{ProviderError, ReplyGenerator, ReplyRequest};

use crate::event_bus::EventPublisher;
use crate::events::SessionEvent;
use crate::retry::RetryPolicy;

/// One turn's reply generation call
pub struct ReplyTask {
    generator: Arc<dyn ReplyGenerator>,
    request: ReplyRequest,
    publisher: EventPublisher,
    retry: RetryPolicy,
}

impl ReplyTask {
    pub fn new(
        generator: Arc<dyn ReplyGenerator>,
        request: ReplyRequest,
        publisher: EventPublisher,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            request,
            publisher,
            retry,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Stream the reply onto the bus.
    ///
    /// A failed stream is retried only while it has not produced a chunk.
    pub async fn run(self, cancel: CancellationToken) {
        let turn_id = self.request.turn_id;
        let mut retry = 0u32;

        loop {
            let mut emitted = 0usize;

            let error: ProviderError = {
                let mut chunks = self.generator.generate(self.request.clone());
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::debug!(turn_id, emitted, "Reply generation cancelled");
                            return;
                        }
                        item = chunks.next() => match item {
                            Some(Ok(text)) => {
                                if text.is_empty() {
                                    continue;
                                }
                                emitted += 1;
                                let event = SessionEvent::ReplyChunk { turn_id, text };
                                if self.publisher.publish(event).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(e)) => break e,
                            None => {
                                tracing::debug!(turn_id, chunks = emitted, "Reply stream finished");
                                let _ = self.publisher.publish(SessionEvent::ReplyDone { turn_id }).await;
                                return;
                            }
                        }
                    }
                }
            };

            if emitted == 0 && error.is_transient() && self.retry.allows_retry(retry) {
                retry += 1;
                metrics::counter!("weaver_stage_retries_total", "stage" => error.stage().as_str())
                    .increment(1);
                tracing::warn!(
                    turn_id,
                    attempt = retry + 1,
                    max_attempts = self.retry.max_attempts(),
                    model = self.generator.model_name(),
                    error = %error,
                    "Reply generation failed, retrying"
                );
                if !self.retry.wait(retry, error.retry_after(), &cancel).await {
                    return;
                }
                continue;
            }

            tracing::error!(
                turn_id,
                attempts = retry + 1,
                emitted,
                error = %error,
                "Reply generation failed"
            );
            let _ = self
                .publisher
                .publish(SessionEvent::ReplyFailed { turn_id, error })
                .await;
            return;
        }
    }
}
