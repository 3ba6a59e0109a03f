//! Synthesis stage

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weaver_core::{ProviderError, Stage, TextToSpeech};

use crate::event_bus::EventPublisher;
use crate::events::SessionEvent;
use crate::output_gate::GatedOutput;
use crate::retry::RetryPolicy;

/// One turn's synthesis call.
///
/// Reply text arrives through a feed channel while the reply is still being
/// generated; closing the feed marks the end of the reply. Frames go to the
/// room through the output gate, and the task stops as soon as the turn is
/// cancelled or the gate no longer admits it.
pub struct SynthesisTask {
    tts: Arc<dyn TextToSpeech>,
    turn_id: u64,
    output: GatedOutput,
    publisher: EventPublisher,
    retry: RetryPolicy,
}

impl SynthesisTask {
    pub fn new(
        tts: Arc<dyn TextToSpeech>,
        turn_id: u64,
        output: GatedOutput,
        publisher: EventPublisher,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tts,
            turn_id,
            output,
            publisher,
            retry,
        }
    }

    pub fn spawn(self, feed: mpsc::UnboundedReceiver<String>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(feed, cancel))
    }

    pub async fn run(self, mut feed: mpsc::UnboundedReceiver<String>, cancel: CancellationToken) {
        let turn_id = self.turn_id;
        let mut received: Vec<String> = Vec::new();
        let mut frames = 0u64;
        let mut retry = 0u32;

        loop {
            let replay = received.clone();

            let error: ProviderError = {
                let text = replaying_feed(replay, &mut feed, &mut received);
                let mut audio = self.tts.synthesize_stream(text);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::debug!(turn_id, frames, "Synthesis cancelled");
                            return;
                        }
                        item = audio.next() => match item {
                            Some(Ok(frame)) => {
                                if cancel.is_cancelled() {
                                    tracing::debug!(turn_id, frames, "Synthesis cancelled");
                                    return;
                                }
                                match self.output.publish(turn_id, frame).await {
                                    Ok(true) => frames += 1,
                                    Ok(false) => {
                                        tracing::debug!(turn_id, frames, "Output gate closed for turn, stopping synthesis");
                                        return;
                                    }
                                    Err(e) => break ProviderError::Unavailable {
                                        stage: Stage::Synthesis,
                                        message: format!("audio output: {e}"),
                                    },
                                }
                            }
                            Some(Err(e)) => break e,
                            None => {
                                tracing::debug!(turn_id, frames, "Synthesis finished");
                                let _ = self
                                    .publisher
                                    .publish(SessionEvent::SynthesisDone { turn_id, frames })
                                    .await;
                                return;
                            }
                        }
                    }
                }
            };

            if frames == 0 && error.is_transient() && self.retry.allows_retry(retry) {
                retry += 1;
                metrics::counter!("weaver_stage_retries_total", "stage" => "synthesis").increment(1);
                tracing::warn!(
                    turn_id,
                    attempt = retry + 1,
                    max_attempts = self.retry.max_attempts(),
                    replayed_chunks = received.len(),
                    model = self.tts.model_name(),
                    error = %error,
                    "Synthesis failed, retrying"
                );
                if !self.retry.wait(retry, error.retry_after(), &cancel).await {
                    return;
                }
                continue;
            }

            tracing::error!(turn_id, frames, error = %error, "Synthesis failed");
            let _ = self
                .publisher
                .publish(SessionEvent::SynthesisFailed { turn_id, error })
                .await;
            return;
        }
    }
}

/// Text stream for one synthesis attempt: chunks already received, then the
/// live feed. Live chunks are recorded for a possible retry.
fn replaying_feed<'a>(
    replay: Vec<String>,
    feed: &'a mut mpsc::UnboundedReceiver<String>,
    received: &'a mut Vec<String>,
) -> Pin<Box<dyn Stream<Item = String> + Send + 'a>> {
    Box::pin(async_stream::stream! {
        for chunk in replay {
            yield chunk;
        }
        while let Some(chunk) = feed.recv().await {
            received.push(chunk.clone());
            yield chunk;
        }
    })
}
