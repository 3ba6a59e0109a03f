//! Transcription stage

use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weaver_core::{ProviderError, RoomConnection, SpeechToText};

use crate::event_bus::EventPublisher;
use crate::events::SessionEvent;
use crate::retry::RetryPolicy;

enum Outcome {
    Cancelled,
    BusClosed,
    Ended { progressed: bool },
    Failed { error: ProviderError, progressed: bool },
}

/// Long-lived worker feeding room audio to the transcription provider.
///
/// One worker runs per connection generation. Whenever the provider stream
/// ends or fails the worker opens a new one, pausing with backoff while
/// streams keep ending without output. Once the retry bound for failures is
/// exhausted it publishes [`SessionEvent::TranscriptionFailed`] and starts
/// over. Each opened stream gets the next stream number, which is stamped on
/// every transcript event it produces.
pub struct TranscriptionWorker {
    stt: Arc<dyn SpeechToText>,
    connection: Arc<dyn RoomConnection>,
    publisher: EventPublisher,
    retry: RetryPolicy,
}

impl TranscriptionWorker {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        connection: Arc<dyn RoomConnection>,
        publisher: EventPublisher,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            stt,
            connection,
            publisher,
            retry,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(self, cancel: CancellationToken) {
        let generation = self.publisher.generation();
        let mut stream = 0u64;
        let mut retry = 0u32;
        let mut idle = 0u32;

        tracing::debug!(generation, model = self.stt.model_name(), "Transcription worker started");

        loop {
            let outcome = self.stream_once(stream, &cancel).await;
            stream += 1;

            match outcome {
                Outcome::Cancelled | Outcome::BusClosed => break,
                Outcome::Ended { progressed } => {
                    if progressed {
                        retry = 0;
                        idle = 0;
                    }
                    idle = idle.saturating_add(1);
                    tracing::debug!(generation, stream, idle, "Transcription stream ended, reopening");
                    if !self.retry.wait(idle, None, &cancel).await {
                        break;
                    }
                }
                Outcome::Failed { error, progressed } => {
                    if progressed {
                        retry = 0;
                        idle = 0;
                    }

                    if error.is_transient() && self.retry.allows_retry(retry) {
                        retry += 1;
                        metrics::counter!("weaver_stage_retries_total", "stage" => "transcription")
                            .increment(1);
                        tracing::warn!(
                            generation,
                            attempt = retry + 1,
                            max_attempts = self.retry.max_attempts(),
                            error = %error,
                            "Transcription failed, reopening stream"
                        );
                        if !self.retry.wait(retry, error.retry_after(), &cancel).await {
                            break;
                        }
                        continue;
                    }

                    tracing::error!(generation, error = %error, "Transcription failed, giving up on current utterance");
                    if self
                        .publisher
                        .publish(SessionEvent::TranscriptionFailed(error))
                        .await
                        .is_err()
                    {
                        break;
                    }

                    retry = 0;
                    if !self.retry.wait(1, None, &cancel).await {
                        break;
                    }
                }
            }
        }

        tracing::debug!(generation, streams = stream, "Transcription worker stopped");
    }

    async fn stream_once(&self, stream: u64, cancel: &CancellationToken) -> Outcome {
        let audio = self.connection.audio_input();
        let mut events = self.stt.transcribe_stream(audio);
        let mut progressed = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                item = events.next() => match item {
                    Some(Ok(event)) => {
                        progressed = true;
                        tracing::trace!(stream, segment = %event.segment(), "Transcript event");
                        if self
                            .publisher
                            .publish(SessionEvent::Transcript { stream, event })
                            .await
                            .is_err()
                        {
                            return Outcome::BusClosed;
                        }
                    }
                    Some(Err(error)) => return Outcome::Failed { error, progressed },
                    None => return Outcome::Ended { progressed },
                }
            }
        }
    }
}
