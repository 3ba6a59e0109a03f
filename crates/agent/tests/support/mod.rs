//! In-memory room and speech providers for session tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

use weaver_agent::{
    AccessCredential, ConnectionState, LifecycleManager, Providers, SessionError, SessionReport,
    ShutdownHandle, TurnId, TurnStatus, TurnTransition,
};
use weaver_config::Settings;
use weaver_core::{
    AudioFrame, ContextKind, Error, JoinRequest, ProviderError, ReplyGenerator, ReplyRequest,
    RoomConnection, RoomEvent, RoomTransport, SampleRate, SegmentId, SpeechToText, TextToSpeech,
    TranscriptEvent, TranscriptFragment, TransportError,
};
use weaver_pipeline::ContextStore;

pub const WAIT: Duration = Duration::from_secs(5);

/// A joined room driven by the test
pub struct MockConnection {
    events_tx: mpsc::UnboundedSender<RoomEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<RoomEvent>>>,
    published: Mutex<Vec<AudioFrame>>,
    disconnected: AtomicBool,
}

impl MockConnection {
    fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            published: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        })
    }

    pub fn emit(&self, event: RoomEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn send_raw(&self, payload: &[u8]) {
        self.emit(RoomEvent::DataMessage {
            participant: Some("viewer".to_string()),
            payload: payload.to_vec(),
        });
    }

    pub fn send_visual(&self, content: &str) {
        let payload = format!(r#"{{"type":"visual_context","content":"{content}"}}"#);
        self.send_raw(payload.as_bytes());
    }

    pub fn frame_count(&self) -> usize {
        self.published.lock().len()
    }

    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomConnection for MockConnection {
    fn events(&self) -> Pin<Box<dyn Stream<Item = RoomEvent> + Send>> {
        match self.events_rx.lock().take() {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => Box::pin(futures::stream::pending()),
        }
    }

    fn audio_input(&self) -> Pin<Box<dyn Stream<Item = AudioFrame> + Send>> {
        Box::pin(futures::stream::pending())
    }

    async fn publish_audio(&self, frame: AudioFrame) -> Result<(), TransportError> {
        self.published.lock().push(frame);
        Ok(())
    }

    async fn send(&self, _payload: Vec<u8>) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport answering connects from a script; accepts once the script is empty
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Result<(), Error>>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(results: Vec<Result<(), Error>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(results.into()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn connection(&self, index: usize) -> Arc<MockConnection> {
        timeout(WAIT, async {
            loop {
                if let Some(connection) = self.connections.lock().get(index).cloned() {
                    return connection;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("connection was never established")
    }
}

#[async_trait]
impl RoomTransport for MockTransport {
    async fn connect(
        &self,
        _request: &JoinRequest,
        _credential: &AccessCredential,
    ) -> weaver_core::Result<Arc<dyn RoomConnection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().pop_front();
        if let Some(Err(e)) = scripted {
            return Err(e);
        }
        let connection = MockConnection::new();
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

/// Transcription driven by the test. Every opened stream reads from the
/// same queue, so events survive a reconnection.
pub struct MockStt {
    tx: mpsc::UnboundedSender<TranscriptEvent>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TranscriptEvent>>>,
}

impl MockStt {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        })
    }

    pub fn voice(&self, segment: u64) {
        let _ = self.tx.send(TranscriptEvent::VoiceStarted {
            segment: SegmentId(segment),
        });
    }

    pub fn partial(&self, segment: u64, text: &str) {
        let _ = self.tx.send(TranscriptEvent::Fragment(TranscriptFragment::partial(
            SegmentId(segment),
            text,
        )));
    }

    pub fn finish(&self, segment: u64, text: &str) {
        let _ = self.tx.send(TranscriptEvent::Fragment(TranscriptFragment::final_text(
            SegmentId(segment),
            text,
        )));
    }

    /// A whole utterance
    pub fn say(&self, segment: u64, text: &str) {
        self.voice(segment);
        self.partial(segment, text);
        self.finish(segment, text);
    }
}

impl SpeechToText for MockStt {
    fn transcribe_stream<'a>(
        &'a self,
        _audio_stream: Pin<Box<dyn Stream<Item = AudioFrame> + Send + 'a>>,
    ) -> Pin<Box<dyn Stream<Item = Result<TranscriptEvent, ProviderError>> + Send + 'a>> {
        let rx = self.rx.clone();
        Box::pin(async_stream::stream! {
            loop {
                let event = rx.lock().await.recv().await;
                match event {
                    Some(event) => {
                        yield Ok(event);
                    }
                    None => break,
                }
            }
        })
    }

    fn model_name(&self) -> &str {
        "mock-stt"
    }
}

/// What one reply generation call does
pub enum ReplyScript {
    Chunks(Vec<String>),
    /// Sleeps before each chunk
    Slow { delay: Duration, chunks: Vec<String> },
    Fail(ProviderError),
}

/// Reply generator following a script, then echoing the transcript
#[derive(Default)]
pub struct MockLlm {
    scripts: Mutex<VecDeque<ReplyScript>>,
    requests: Mutex<Vec<ReplyRequest>>,
}

impl MockLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(scripts: Vec<ReplyScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        })
    }

    pub fn requests(&self) -> Vec<ReplyRequest> {
        self.requests.lock().clone()
    }
}

impl ReplyGenerator for MockLlm {
    fn generate<'a>(
        &'a self,
        request: ReplyRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send + 'a>> {
        self.requests.lock().push(request.clone());
        let script = self.scripts.lock().pop_front().unwrap_or_else(|| {
            ReplyScript::Chunks(vec![
                "You asked: ".to_string(),
                format!("{}.", request.transcript),
            ])
        });

        Box::pin(async_stream::stream! {
            match script {
                ReplyScript::Chunks(chunks) => {
                    for chunk in chunks {
                        yield Ok(chunk);
                    }
                }
                ReplyScript::Slow { delay, chunks } => {
                    for chunk in chunks {
                        tokio::time::sleep(delay).await;
                        yield Ok(chunk);
                    }
                }
                ReplyScript::Fail(error) => {
                    yield Err(error);
                }
            }
        })
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}

/// Synthesis producing a fixed number of paced frames per text chunk
pub struct MockTts {
    frames_per_chunk: usize,
    frame_delay: Duration,
    texts: Mutex<Vec<String>>,
}

impl MockTts {
    pub fn new() -> Arc<Self> {
        Self::paced(1, Duration::from_millis(2))
    }

    pub fn paced(frames_per_chunk: usize, frame_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            frames_per_chunk,
            frame_delay,
            texts: Mutex::new(Vec::new()),
        })
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }

    pub fn heard(&self, needle: &str) -> bool {
        self.texts.lock().iter().any(|text| text.contains(needle))
    }
}

impl TextToSpeech for MockTts {
    fn synthesize_stream<'a>(
        &'a self,
        mut text_stream: Pin<Box<dyn Stream<Item = String> + Send + 'a>>,
    ) -> Pin<Box<dyn Stream<Item = Result<AudioFrame, ProviderError>> + Send + 'a>> {
        Box::pin(async_stream::stream! {
            let mut seq = 0u64;
            while let Some(text) = text_stream.next().await {
                self.texts.lock().push(text);
                for _ in 0..self.frames_per_chunk {
                    tokio::time::sleep(self.frame_delay).await;
                    seq += 1;
                    yield Ok(AudioFrame::silence(SampleRate::Hz24000, seq));
                }
            }
        })
    }

    fn model_name(&self) -> &str {
        "mock-tts"
    }
}

/// Settings with millisecond backoffs
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.pipeline.initial_backoff_ms = 1;
    settings.pipeline.max_backoff_ms = 5;
    settings.reconnect.initial_backoff_ms = 5;
    settings.reconnect.max_backoff_ms = 20;
    settings
}

pub fn valid_credential() -> AccessCredential {
    AccessCredential::new("room-token", Utc::now() + chrono::Duration::hours(1))
}

/// A running session plus handles to every mock
pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub stt: Arc<MockStt>,
    pub llm: Arc<MockLlm>,
    pub tts: Arc<MockTts>,
    pub store: Arc<ContextStore>,
    pub shutdown: ShutdownHandle,
    pub connection_state: watch::Receiver<ConnectionState>,
    pub status: watch::Receiver<TurnStatus>,
    pub turns: broadcast::Receiver<TurnTransition>,
    session: JoinHandle<Result<SessionReport, SessionError>>,
}

impl Harness {
    pub fn start(
        transport: Arc<MockTransport>,
        llm: Arc<MockLlm>,
        tts: Arc<MockTts>,
        settings: Settings,
        credential: AccessCredential,
    ) -> Self {
        let stt = MockStt::new();
        let providers = Providers::new(stt.clone(), llm.clone(), tts.clone());
        let manager = LifecycleManager::new(settings, transport.clone(), providers, credential);

        let store = manager.context_store();
        let shutdown = manager.shutdown_handle();
        let connection_state = manager.subscribe_connection();
        let status = manager.turn_status();
        let turns = manager.subscribe_turns();
        let session = tokio::spawn(manager.run());

        Self {
            transport,
            stt,
            llm,
            tts,
            store,
            shutdown,
            connection_state,
            status,
            turns,
            session,
        }
    }

    pub fn with_defaults() -> Self {
        Self::start(
            MockTransport::new(),
            MockLlm::new(),
            MockTts::new(),
            fast_settings(),
            valid_credential(),
        )
    }

    pub async fn wait_connected(&mut self) {
        timeout(WAIT, self.connection_state.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .expect("session never connected")
            .expect("session dropped");
    }

    /// Connect and let the greeting finish
    pub async fn ready(&mut self) -> Arc<MockConnection> {
        self.wait_connected().await;
        let greeting = self.wait_turn_end(1).await;
        assert_eq!(greeting.to, weaver_agent::TurnState::Completed);
        self.transport.connection(0).await
    }

    pub async fn next_transition(
        &mut self,
        predicate: impl Fn(&TurnTransition) -> bool,
    ) -> TurnTransition {
        timeout(WAIT, async {
            loop {
                match self.turns.recv().await {
                    Ok(transition) if predicate(&transition) => return transition,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("turn transitions closed")
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for turn transition")
    }

    pub async fn wait_turn_end(&mut self, turn_id: TurnId) -> TurnTransition {
        self.next_transition(|t| t.turn_id == turn_id && t.to.is_terminal())
            .await
    }

    pub async fn wait_for_visual(&self, payload: &str) {
        timeout(WAIT, async {
            loop {
                let current = self.store.get(&ContextKind::VISUAL);
                if matches!(current, Some(ref fact) if fact.payload == payload) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("context never stored")
    }

    /// Wait for the session to end on its own
    pub async fn outcome(&mut self) -> Result<SessionReport, SessionError> {
        timeout(WAIT, &mut self.session)
            .await
            .expect("session did not end")
            .expect("session task panicked")
    }

    /// Request shutdown and wait for the report
    pub async fn stop(&mut self) -> Result<SessionReport, SessionError> {
        self.shutdown.shutdown();
        self.outcome().await
    }
}
