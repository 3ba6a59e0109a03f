//! Session lifecycle
//!
//! The [`LifecycleManager`] owns a session from the first dial to the final
//! release. It joins the room with an externally issued credential, arms one
//! pipeline generation per connection, runs the single event consumption
//! loop that feeds the [`TurnController`], and reconnects with bounded
//! backoff when the room drops unexpectedly.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use weaver_config::{RoomConfig, Settings};
use weaver_core::{
    AccessCredential, AuthError, DisconnectReason, Error, JoinRequest, ReplyGenerator,
    RoomConnection, RoomTransport, SpeechToText, TextToSpeech, TransportError,
};
use weaver_llm::{LlmError, OllamaReplyGenerator};
use weaver_pipeline::{
    ConnectionEvent, ContextStore, EventBus, EventReceiver, RetryPolicy, SessionEvent,
    TranscriptionWorker,
};

use crate::controller::{TurnController, TurnControllerConfig};
use crate::observer::ConnectionObserver;
use crate::turn::{TurnRecord, TurnStatus, TurnTransition};

/// Session failures
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Could not join room: {0}")]
    Transport(TransportError),
}

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Closed,
}

/// One agent presence in one room
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub room: String,
    pub identity: String,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(room: &RoomConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            room: room.name.clone(),
            identity: room.identity.clone(),
            state: ConnectionState::Connecting,
            created_at: Utc::now(),
        }
    }
}

/// Why a session loop stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The room ended the session
    Disconnected(DisconnectReason),
    /// Local shutdown was requested
    Shutdown,
    BusClosed,
}

/// Summary returned when a session ends normally
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: Session,
    pub end: SessionEnd,
    pub reconnects: u32,
    /// Archived turns, oldest first
    pub turns: Vec<TurnRecord>,
}

/// Requests a graceful local stop
#[derive(Debug, Clone)]
pub struct ShutdownHandle(CancellationToken);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// The three speech stages
#[derive(Clone)]
pub struct Providers {
    pub stt: Arc<dyn SpeechToText>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub tts: Arc<dyn TextToSpeech>,
}

impl Providers {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        generator: Arc<dyn ReplyGenerator>,
        tts: Arc<dyn TextToSpeech>,
    ) -> Self {
        Self {
            stt,
            generator,
            tts,
        }
    }

    /// Reply generation through the configured Ollama endpoint
    pub fn with_ollama(
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        settings: &Settings,
    ) -> Result<Self, LlmError> {
        let generator =
            OllamaReplyGenerator::new(settings.llm.clone(), settings.agent.instructions.clone())?;
        Ok(Self::new(stt, Arc::new(generator), tts))
    }
}

/// Pipeline workers bound to one connection generation
struct Armed {
    generation: u64,
    connection: Arc<dyn RoomConnection>,
    cancel: CancellationToken,
}

impl Armed {
    fn disarm(&self) {
        if !self.cancel.is_cancelled() {
            debug!(generation = self.generation, "Pipeline disarmed");
            self.cancel.cancel();
        }
    }
}

pub struct LifecycleManager {
    settings: Settings,
    transport: Arc<dyn RoomTransport>,
    providers: Providers,
    credential: AccessCredential,
    store: Arc<ContextStore>,
    controller: TurnController,
    session: Session,
    reconnects: u32,
    shutdown: CancellationToken,
    connection_state: watch::Sender<ConnectionState>,
}

impl LifecycleManager {
    pub fn new(
        settings: Settings,
        transport: Arc<dyn RoomTransport>,
        providers: Providers,
        credential: AccessCredential,
    ) -> Self {
        let store = Arc::new(ContextStore::new());
        let controller = TurnController::new(
            TurnControllerConfig {
                barge_in_enabled: settings.agent.barge_in_enabled,
                retry: RetryPolicy::from(&settings.pipeline),
                ..Default::default()
            },
            providers.generator.clone(),
            providers.tts.clone(),
            store.clone(),
        );
        let session = Session::new(&settings.room);
        let (connection_state, _) = watch::channel(ConnectionState::Connecting);

        Self {
            settings,
            transport,
            providers,
            credential,
            store,
            controller,
            session,
            reconnects: 0,
            shutdown: CancellationToken::new(),
            connection_state,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    pub fn subscribe_turns(&self) -> broadcast::Receiver<TurnTransition> {
        self.controller.subscribe()
    }

    pub fn turn_status(&self) -> watch::Receiver<TurnStatus> {
        self.controller.subscribe_status()
    }

    pub fn context_store(&self) -> Arc<ContextStore> {
        self.store.clone()
    }

    /// Run the session to completion.
    ///
    /// Resources are released on every exit path. Returns a report when the
    /// room or a local shutdown ends the session, and an error when joining
    /// or reconnecting fails for good.
    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        info!(
            session_id = %self.session.id,
            room = %self.session.room,
            identity = %self.session.identity,
            "Starting session"
        );
        let (bus, mut events) = EventBus::with_receiver(self.settings.pipeline.event_bus_capacity);

        let outcome = self.drive(&bus, &mut events).await;

        events.close();
        bus.close();
        self.store.clear();
        self.set_state(ConnectionState::Closed);

        match outcome {
            Ok(end) => {
                info!(
                    session_id = %self.session.id,
                    ?end,
                    reconnects = self.reconnects,
                    "Session ended"
                );
                Ok(SessionReport {
                    session: self.session.clone(),
                    end,
                    reconnects: self.reconnects,
                    turns: self.controller.history().cloned().collect(),
                })
            }
            Err(e) => {
                error!(session_id = %self.session.id, error = %e, "Session failed");
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        bus: &EventBus,
        events: &mut EventReceiver,
    ) -> Result<SessionEnd, SessionError> {
        self.set_state(ConnectionState::Connecting);
        let connection = self.join().await?;

        let mut generation = 1;
        let mut armed = self.arm(connection, bus, generation);
        self.set_state(ConnectionState::Connected);
        if let Some(turn_id) = self.controller.announce(&self.settings.agent.greeting) {
            debug!(turn_id, "Greeting announced");
        }

        let end = loop {
            let envelope = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break SessionEnd::Shutdown,
                envelope = events.recv() => envelope,
            };
            let Some(envelope) = envelope else {
                warn!("Event bus closed");
                break SessionEnd::BusClosed;
            };
            if envelope.generation != generation {
                debug!(
                    seq = envelope.seq,
                    stale = envelope.generation,
                    generation,
                    kind = envelope.event.kind(),
                    "Dropping event from a previous connection"
                );
                continue;
            }

            match envelope.event {
                SessionEvent::Connection(ConnectionEvent::Joined) => {
                    debug!(generation, "Room confirmed join");
                }
                SessionEvent::Connection(ConnectionEvent::Disconnected(reason))
                    if !reason.is_recoverable() =>
                {
                    info!(%reason, "Room ended the session");
                    break SessionEnd::Disconnected(reason);
                }
                SessionEvent::Connection(ConnectionEvent::Disconnected(reason)) => {
                    warn!(%reason, generation, "Connection lost, reconnecting");
                    self.controller.reset("reconnect");
                    self.controller.detach();
                    armed.disarm();

                    match self.reconnect().await? {
                        Some(connection) => {
                            generation += 1;
                            self.reconnects += 1;
                            armed = self.arm(connection, bus, generation);
                            self.set_state(ConnectionState::Connected);
                        }
                        None => break SessionEnd::Shutdown,
                    }
                }
                event => self.controller.handle(event),
            }
        };

        self.controller.reset("session ending");
        self.controller.detach();
        armed.disarm();
        if !matches!(end, SessionEnd::Disconnected(_)) {
            if let Err(e) = armed.connection.disconnect().await {
                warn!(error = %e, "Disconnect failed");
            }
        }
        Ok(end)
    }

    /// Initial join. Transport failures are retried with the reconnect
    /// policy; credential problems are not.
    async fn join(&mut self) -> Result<Arc<dyn RoomConnection>, SessionError> {
        let policy = RetryPolicy::from(&self.settings.reconnect);
        let mut retry = 0u32;

        loop {
            match self.dial().await {
                Ok(connection) => return Ok(connection),
                Err(SessionError::Transport(e)) if policy.allows_retry(retry) => {
                    retry += 1;
                    warn!(
                        attempt = retry + 1,
                        max_attempts = policy.max_attempts(),
                        error = %e,
                        "Join failed, retrying"
                    );
                    if !policy.wait(retry, None, &self.shutdown).await {
                        return Err(SessionError::Transport(TransportError::Closed));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns `None` if shutdown was requested while waiting
    async fn reconnect(&mut self) -> Result<Option<Arc<dyn RoomConnection>>, SessionError> {
        let policy = RetryPolicy::from(&self.settings.reconnect);

        for attempt in 1..=policy.max_retries {
            self.set_state(ConnectionState::Reconnecting { attempt });
            if !policy.wait(attempt, None, &self.shutdown).await {
                return Ok(None);
            }

            metrics::counter!("weaver_reconnect_attempts_total").increment(1);
            match self.dial().await {
                Ok(connection) => {
                    metrics::counter!("weaver_reconnects_total").increment(1);
                    info!(attempt, "Reconnected");
                    return Ok(Some(connection));
                }
                Err(SessionError::Transport(e)) => {
                    warn!(attempt, max_attempts = policy.max_retries, error = %e, "Reconnect attempt failed");
                }
                Err(e) => return Err(e),
            }
        }

        Err(SessionError::ReconnectExhausted {
            attempts: policy.max_retries,
        })
    }

    async fn dial(&self) -> Result<Arc<dyn RoomConnection>, SessionError> {
        self.credential.validate(Utc::now())?;

        let room = &self.settings.room;
        let request = JoinRequest {
            url: room.url.clone(),
            room: room.name.clone(),
            identity: room.identity.clone(),
            display_name: room.display_name.clone(),
        };
        debug!(url = %request.url, room = %request.room, "Dialing room");

        self.transport
            .connect(&request, &self.credential)
            .await
            .map_err(|e| match e {
                Error::Auth(e) => SessionError::Auth(e),
                Error::Transport(e) => SessionError::Transport(e),
                other => SessionError::Transport(TransportError::ConnectionFailed(other.to_string())),
            })
    }

    /// Start the observer and transcription worker for a connection and
    /// route turn output to it
    fn arm(&mut self, connection: Arc<dyn RoomConnection>, bus: &EventBus, generation: u64) -> Armed {
        let cancel = self.shutdown.child_token();
        let publisher = bus.publisher(generation);

        ConnectionObserver::new(connection.clone(), self.store.clone(), publisher.clone())
            .spawn(cancel.clone());
        TranscriptionWorker::new(
            self.providers.stt.clone(),
            connection.clone(),
            publisher.clone(),
            RetryPolicy::from(&self.settings.pipeline),
        )
        .spawn(cancel.clone());
        self.controller.attach(connection.clone(), publisher);

        debug!(generation, "Pipeline armed");
        Armed {
            generation,
            connection,
            cancel,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.session.state != state {
            info!(session_id = %self.session.id, ?state, "Connection state changed");
        }
        self.session.state = state;
        self.connection_state.send_replace(state);
    }
}
