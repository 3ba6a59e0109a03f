//! Room event observer
//!
//! One observer runs per connection generation. It turns room events into
//! bus events and writes side-channel context straight into the store, so a
//! fact is visible to the next composed request even if its notification
//! is dropped.

use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use weaver_core::{parse_side_channel, DisconnectReason, RoomConnection, RoomEvent};
use weaver_pipeline::{ConnectionEvent, ContextStore, EventPublisher, SessionEvent};

pub struct ConnectionObserver {
    connection: Arc<dyn RoomConnection>,
    store: Arc<ContextStore>,
    publisher: EventPublisher,
}

impl ConnectionObserver {
    pub fn new(
        connection: Arc<dyn RoomConnection>,
        store: Arc<ContextStore>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            connection,
            store,
            publisher,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(self, cancel: CancellationToken) {
        let generation = self.publisher.generation();
        let mut events = self.connection.events();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.next() => event,
            };

            match event {
                Some(RoomEvent::Joined) => {
                    if !self.forward(ConnectionEvent::Joined).await {
                        break;
                    }
                }
                Some(RoomEvent::DataMessage {
                    participant,
                    payload,
                }) => self.ingest(participant.as_deref(), &payload),
                Some(RoomEvent::Disconnected(reason)) => {
                    debug!(generation, %reason, "Room disconnected");
                    self.forward(ConnectionEvent::Disconnected(reason)).await;
                    break;
                }
                None => {
                    warn!(generation, "Room event stream ended without a disconnect");
                    self.forward(ConnectionEvent::Disconnected(DisconnectReason::ConnectionLost))
                        .await;
                    break;
                }
            }
        }

        debug!(generation, "Connection observer stopped");
    }

    async fn forward(&self, event: ConnectionEvent) -> bool {
        self.publisher
            .publish(SessionEvent::Connection(event))
            .await
            .is_ok()
    }

    fn ingest(&self, participant: Option<&str>, payload: &[u8]) {
        match parse_side_channel(payload) {
            Ok(Some(mut fact)) => {
                fact.seq = self.store.update(fact.clone());
                debug!(participant, kind = %fact.kind, seq = fact.seq, "Context fact stored");
                self.publisher.notify_context(fact);
            }
            Ok(None) => debug!(participant, "Unhandled side-channel message type"),
            Err(e) => {
                metrics::counter!("weaver_side_channel_rejected_total").increment(1);
                warn!(participant, error = %e, bytes = payload.len(), "Dropping malformed side-channel message");
            }
        }
    }
}
