//! Turn controller
//!
//! Owns the one in-flight turn and every decision about it. Events arrive
//! from the session loop in bus order and are applied synchronously, so
//! starting, interrupting and finishing turns never race each other. Stage
//! work runs in spawned tasks that report back through the bus; a turn's
//! cancellation token and the output gate keep stale work away from the
//! room.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};
use weaver_core::{
    ProviderError, ReplyGenerator, ReplyRequest, RoomConnection, TextToSpeech, TranscriptEvent,
    TranscriptFragment, Utterance,
};
use weaver_pipeline::{
    ContextStore, EventPublisher, GatedOutput, OutputGate, ReplyTask, RetryPolicy, SessionEvent,
    SynthesisTask,
};

use crate::turn::{Turn, TurnId, TurnOrigin, TurnRecord, TurnState, TurnStatus, TurnTransition};

/// Finished utterances remembered so late fragments cannot reopen them
const RECENT_UTTERANCES: usize = 32;
/// Reply characters included in the turn summary log line
const REPLY_LOG_CHARS: usize = 120;
const TRANSITION_CAPACITY: usize = 256;

/// Turn controller configuration
#[derive(Debug, Clone)]
pub struct TurnControllerConfig {
    /// New speech interrupts a turn that is thinking or speaking
    pub barge_in_enabled: bool,
    /// Retry policy handed to reply and synthesis tasks
    pub retry: RetryPolicy,
    /// Archived turns kept in memory
    pub history_limit: usize,
}

impl Default for TurnControllerConfig {
    fn default() -> Self {
        Self {
            barge_in_enabled: true,
            retry: RetryPolicy::default(),
            history_limit: 64,
        }
    }
}

/// Where turn output goes for the current connection generation
struct Output {
    connection: Arc<dyn RoomConnection>,
    publisher: EventPublisher,
}

/// Single writer of turn state
pub struct TurnController {
    config: TurnControllerConfig,
    generator: Arc<dyn ReplyGenerator>,
    tts: Arc<dyn TextToSpeech>,
    store: Arc<ContextStore>,
    gate: Arc<OutputGate>,
    output: Option<Output>,
    next_id: TurnId,
    current: Option<Turn>,
    finished: VecDeque<Utterance>,
    history: VecDeque<TurnRecord>,
    status: watch::Sender<TurnStatus>,
    transitions: broadcast::Sender<TurnTransition>,
}

impl TurnController {
    pub fn new(
        config: TurnControllerConfig,
        generator: Arc<dyn ReplyGenerator>,
        tts: Arc<dyn TextToSpeech>,
        store: Arc<ContextStore>,
    ) -> Self {
        let (status, _) = watch::channel(TurnStatus::idle());
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            config,
            generator,
            tts,
            store,
            gate: Arc::new(OutputGate::new()),
            output: None,
            next_id: 1,
            current: None,
            finished: VecDeque::with_capacity(RECENT_UTTERANCES),
            history: VecDeque::new(),
            status,
            transitions,
        }
    }

    /// Route turn output to a connection generation
    pub fn attach(&mut self, connection: Arc<dyn RoomConnection>, publisher: EventPublisher) {
        debug!(generation = publisher.generation(), "Turn controller attached");
        self.output = Some(Output {
            connection,
            publisher,
        });
    }

    pub fn detach(&mut self) {
        self.output = None;
    }

    /// Apply one bus event
    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Transcript { stream, event } => match event {
                TranscriptEvent::VoiceStarted { segment } => {
                    self.on_voice_activity(Utterance::new(stream, segment))
                }
                TranscriptEvent::Fragment(fragment) => self.on_transcript(stream, fragment),
            },
            SessionEvent::TranscriptionFailed(error) => self.on_transcription_failed(error),
            SessionEvent::ContextUpdated(fact) => {
                debug!(kind = %fact.kind, seq = fact.seq, "Context updated");
            }
            SessionEvent::ReplyChunk { turn_id, text } => self.on_reply_chunk(turn_id, text),
            SessionEvent::ReplyDone { turn_id } => self.on_reply_done(turn_id),
            SessionEvent::ReplyFailed { turn_id, error }
            | SessionEvent::SynthesisFailed { turn_id, error } => self.on_stage_failed(turn_id, error),
            SessionEvent::SynthesisDone { turn_id, frames } => self.on_synthesis_done(turn_id, frames),
            SessionEvent::Connection(event) => {
                debug!(?event, "Connection event ignored by turn controller");
            }
        }
    }

    /// Speech detected on a segment
    pub fn on_voice_activity(&mut self, utterance: Utterance) {
        self.admit(utterance);
    }

    /// Transcript fragment for a segment of transcription stream `stream`
    pub fn on_transcript(&mut self, stream: u64, fragment: TranscriptFragment) {
        let utterance = Utterance::new(stream, fragment.segment);
        if !self.admit(utterance) {
            return;
        }
        let blank = fragment.is_blank();
        let Some(turn) = self.current.as_mut() else {
            return;
        };
        if turn.state != TurnState::Listening {
            debug!(
                turn_id = turn.id,
                utterance = %utterance,
                "Fragment after final transcript ignored"
            );
            return;
        }

        turn.transcript = fragment.text;
        if !fragment.is_final {
            return;
        }

        if blank {
            info!(turn_id = turn.id, "Empty final transcript, abandoning turn");
            self.finish(TurnState::Abandoned, None);
        } else {
            self.compose_request();
        }
    }

    /// The transcription worker gave up; a turn still listening cannot finish
    pub fn on_transcription_failed(&mut self, error: ProviderError) {
        let listening = self
            .current
            .as_ref()
            .filter(|turn| turn.state == TurnState::Listening)
            .map(|turn| turn.id);
        match listening {
            Some(turn_id) => {
                warn!(turn_id, error = %error, "Transcription failed while listening");
                self.finish(TurnState::Failed, Some(error.to_string()));
            }
            None => debug!(error = %error, "Transcription failure outside a listening turn"),
        }
    }

    pub fn on_reply_chunk(&mut self, turn_id: TurnId, text: String) {
        let Some(turn) = self.replying(turn_id) else {
            debug!(turn_id, "Discarding reply chunk for inactive turn");
            return;
        };
        turn.reply.push_str(&text);

        match turn.state {
            TurnState::Thinking if !turn.reply.trim().is_empty() => {
                let reply = turn.reply.clone();
                self.start_speaking(turn_id, reply, false);
            }
            TurnState::Speaking => {
                if let Some(feed) = &turn.feed {
                    let _ = feed.send(text);
                }
            }
            _ => {}
        }
    }

    pub fn on_reply_done(&mut self, turn_id: TurnId) {
        let Some(turn) = self.replying(turn_id) else {
            debug!(turn_id, "Reply completion for inactive turn ignored");
            return;
        };
        turn.reply_done = true;

        match turn.state {
            TurnState::Thinking => {
                info!(turn_id, "Empty reply, nothing to speak");
                self.finish(TurnState::Completed, None);
            }
            TurnState::Speaking => {
                turn.feed = None;
                debug!(turn_id, reply_chars = turn.reply.len(), "Reply complete, draining synthesis");
                if turn.synthesis_done {
                    self.finish(TurnState::Completed, None);
                }
            }
            _ => {}
        }
    }

    pub fn on_synthesis_done(&mut self, turn_id: TurnId, frames: u64) {
        let Some(turn) = self.replying(turn_id) else {
            debug!(turn_id, "Synthesis completion for inactive turn ignored");
            return;
        };
        turn.synthesis_done = true;
        if !turn.reply_done {
            debug!(turn_id, frames, "Synthesis ended before the reply did");
            return;
        }
        info!(turn_id, frames, "Reply spoken");
        self.finish(TurnState::Completed, None);
    }

    /// Reply generation or synthesis exhausted its retries
    pub fn on_stage_failed(&mut self, turn_id: TurnId, error: ProviderError) {
        if self.replying(turn_id).is_none() {
            debug!(turn_id, error = %error, "Failure for inactive turn ignored");
            return;
        }
        error!(turn_id, stage = error.stage().as_str(), error = %error, "Turn failed");
        self.finish(TurnState::Failed, Some(error.to_string()));
    }

    /// Speak a fixed text as its own turn, pre-empting any turn in flight.
    ///
    /// Returns the turn id, or `None` if nothing was spoken.
    pub fn announce(&mut self, text: &str) -> Option<TurnId> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self.output.is_none() {
            warn!("No room connection attached, announcement dropped");
            return None;
        }
        if let Some(turn) = &self.current {
            info!(turn_id = turn.id, "Announcement pre-empts turn");
            self.finish(TurnState::Interrupted, None);
        }

        let id = self.allocate_id();
        let mut turn = Turn::new(id, TurnOrigin::Announcement, TurnState::Idle);
        turn.reply = text.to_string();
        turn.reply_done = true;
        self.current = Some(turn);
        self.start_speaking(id, text.to_string(), true);
        Some(id)
    }

    /// Interrupt whatever is in flight and return to Idle.
    ///
    /// Forgets finished utterances too: the transcription streams that
    /// follow a reset number their segments from scratch.
    pub fn reset(&mut self, reason: &str) {
        if let Some(turn) = &self.current {
            info!(turn_id = turn.id, state = %turn.state, reason, "Resetting turn controller");
            self.finish(TurnState::Interrupted, None);
        }
        self.finished.clear();
        self.gate.close();
    }

    pub fn state(&self) -> TurnState {
        self.current
            .as_ref()
            .map(|turn| turn.state)
            .unwrap_or(TurnState::Idle)
    }

    pub fn current_turn_id(&self) -> Option<TurnId> {
        self.current.as_ref().map(|turn| turn.id)
    }

    /// Turns not yet in a terminal state. Never more than one.
    pub fn active_turns(&self) -> usize {
        usize::from(self.current.is_some())
    }

    /// Archived turns, oldest first
    pub fn history(&self) -> impl Iterator<Item = &TurnRecord> {
        self.history.iter()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TurnStatus> {
        self.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnTransition> {
        self.transitions.subscribe()
    }

    /// Decide whether activity on `utterance` belongs to the current turn,
    /// starts a new one, or is dropped.
    fn admit(&mut self, utterance: Utterance) -> bool {
        if self.finished.contains(&utterance) {
            debug!(utterance = %utterance, "Activity for a finished utterance ignored");
            return false;
        }

        let Some(turn) = &self.current else {
            self.begin_listening(utterance);
            return true;
        };
        if turn.origin == TurnOrigin::Speech(utterance) {
            return true;
        }

        let replying = matches!(turn.state, TurnState::Thinking | TurnState::Speaking);
        if replying && !self.config.barge_in_enabled {
            debug!(turn_id = turn.id, utterance = %utterance, "Barge-in disabled, speech ignored");
            self.remember(utterance);
            return false;
        }

        info!(
            turn_id = turn.id,
            state = %turn.state,
            utterance = %utterance,
            "New speech, interrupting turn"
        );
        metrics::counter!("weaver_barge_ins_total").increment(1);
        self.finish(TurnState::Interrupted, None);
        self.begin_listening(utterance);
        true
    }

    fn begin_listening(&mut self, utterance: Utterance) {
        let id = self.allocate_id();
        debug!(turn_id = id, utterance = %utterance, "Turn started");
        self.current = Some(Turn::new(id, TurnOrigin::Speech(utterance), TurnState::Listening));
        self.emit(id, TurnState::Idle, TurnState::Listening);
    }

    /// Listening -> Thinking: capture context and start reply generation
    fn compose_request(&mut self) {
        let Some(publisher) = self.output.as_ref().map(|output| output.publisher.clone()) else {
            warn!("No room connection attached, cannot reply");
            self.finish(TurnState::Failed, Some("no room connection".to_string()));
            return;
        };
        let snapshot = self.store.snapshot();
        let Some(turn) = self.current.as_mut() else {
            return;
        };

        turn.context = Some(snapshot.clone());
        let request = ReplyRequest::new(turn.id, turn.transcript.clone(), snapshot);
        let cancel = turn.cancel.clone();
        info!(
            turn_id = turn.id,
            transcript = %request.transcript,
            context_facts = request.context.len(),
            "Requesting reply"
        );

        self.advance(TurnState::Thinking);
        ReplyTask::new(self.generator.clone(), request, publisher, self.config.retry).spawn(cancel);
    }

    /// Open the gate for the turn and start synthesis from `text`.
    /// `complete` means no further text will follow.
    fn start_speaking(&mut self, turn_id: TurnId, text: String, complete: bool) {
        let Some((connection, publisher)) = self
            .output
            .as_ref()
            .map(|output| (output.connection.clone(), output.publisher.clone()))
        else {
            warn!(turn_id, "No room connection attached, cannot speak");
            self.finish(TurnState::Failed, Some("no room connection".to_string()));
            return;
        };
        let Some(turn) = self.current.as_mut() else {
            return;
        };

        let (feed, feed_rx) = mpsc::unbounded_channel();
        let _ = feed.send(text);
        turn.feed = (!complete).then_some(feed);
        let cancel = turn.cancel.clone();

        self.gate.open(turn_id);
        self.advance(TurnState::Speaking);

        let output = GatedOutput::new(self.gate.clone(), connection);
        SynthesisTask::new(self.tts.clone(), turn_id, output, publisher, self.config.retry)
            .spawn(feed_rx, cancel);
    }

    /// The current turn if it is `turn_id` and still waiting on stage output
    fn replying(&mut self, turn_id: TurnId) -> Option<&mut Turn> {
        self.current.as_mut().filter(|turn| {
            turn.id == turn_id && matches!(turn.state, TurnState::Thinking | TurnState::Speaking)
        })
    }

    fn advance(&mut self, to: TurnState) {
        let Some(turn) = self.current.as_mut() else {
            return;
        };
        let from = std::mem::replace(&mut turn.state, to);
        let id = turn.id;
        self.emit(id, from, to);
    }

    /// Archive the current turn with a terminal outcome
    fn finish(&mut self, outcome: TurnState, failure: Option<String>) {
        let Some(mut turn) = self.current.take() else {
            return;
        };
        turn.cancel.cancel();
        turn.feed = None;
        self.gate.close_turn(turn.id);
        if let Some(utterance) = turn.utterance() {
            self.remember(utterance);
        }

        let id = turn.id;
        let from = turn.state;
        let elapsed_ms = (Utc::now() - turn.started_at).num_milliseconds();
        metrics::counter!("weaver_turns_total", "outcome" => outcome.as_str()).increment(1);
        if outcome == TurnState::Completed {
            let reply = preview(&turn.reply, REPLY_LOG_CHARS);
            info!(
                turn_id = id,
                from = %from,
                outcome = %outcome,
                elapsed_ms,
                reply = %reply,
                "Turn finished"
            );
        } else {
            info!(turn_id = id, from = %from, outcome = %outcome, elapsed_ms, "Turn finished");
        }

        self.history.push_back(turn.archive(outcome, failure));
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
        self.emit(id, from, outcome);
    }

    fn emit(&self, turn_id: TurnId, from: TurnState, to: TurnState) {
        let status = if to.is_terminal() {
            TurnStatus::idle()
        } else {
            TurnStatus {
                turn_id: Some(turn_id),
                state: to,
            }
        };
        self.status.send_replace(status);
        let _ = self.transitions.send(TurnTransition {
            turn_id,
            from,
            to,
            at: Utc::now(),
        });
    }

    fn remember(&mut self, utterance: Utterance) {
        if self.finished.len() == RECENT_UTTERANCES {
            self.finished.pop_front();
        }
        self.finished.push_back(utterance);
    }

    fn allocate_id(&mut self) -> TurnId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// First `max_chars` characters of `text`, marked when cut
fn preview(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
