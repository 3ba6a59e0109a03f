//! Integration tests for the session engine (room -> transcript -> reply -> audio)
//!
//! Every test runs a real `LifecycleManager` against the in-memory room and
//! providers in `support`.

mod support;

use chrono::Utc;
use std::time::Duration;

use support::{
    fast_settings, valid_credential, Harness, MockLlm, MockTransport, MockTts, ReplyScript,
};
use weaver_agent::{AccessCredential, ConnectionState, SessionEnd, SessionError, TurnState, TurnStatus};
use weaver_core::{AuthError, DisconnectReason, Error, ProviderError, RoomEvent, Stage, TransportError};

fn slow(delay_ms: u64, text: &str) -> ReplyScript {
    ReplyScript::Slow {
        delay: Duration::from_millis(delay_ms),
        chunks: vec![text.to_string()],
    }
}

/// Visual context sent before an utterance reaches the reply and the reply is spoken
#[tokio::test]
async fn test_visual_context_reaches_reply() {
    let mut h = Harness::with_defaults();
    let connection = h.ready().await;
    let greeting_frames = connection.frame_count();
    assert!(greeting_frames > 0);
    assert!(h.tts.heard("World Weaver agent connected"));

    connection.send_visual("a cathedral");
    h.wait_for_visual("a cathedral").await;
    h.stt.say(1, "what is this building");

    let done = h.wait_turn_end(2).await;
    assert_eq!(done.from, TurnState::Speaking);
    assert_eq!(done.to, TurnState::Completed);

    let requests = h.llm.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].transcript, "what is this building");
    assert_eq!(requests[0].context.visual(), Some("a cathedral"));
    assert!(connection.frame_count() > greeting_frames);
    assert_eq!(*h.status.borrow(), TurnStatus::idle());

    let report = h.stop().await.unwrap();
    assert_eq!(report.end, SessionEnd::Shutdown);
    let outcomes: Vec<TurnState> = report.turns.iter().map(|t| t.outcome).collect();
    assert_eq!(outcomes, vec![TurnState::Completed, TurnState::Completed]);
    assert_eq!(report.turns[1].transcript, "what is this building");
    assert!(connection.was_disconnected());
    assert!(h.store.is_empty());
    assert_eq!(*h.connection_state.borrow(), ConnectionState::Closed);
}

/// The newest visual context wins
#[tokio::test]
async fn test_latest_visual_context_wins() {
    let mut h = Harness::with_defaults();
    let connection = h.ready().await;

    connection.send_visual("a cathedral");
    connection.send_visual("a stone bridge");
    h.wait_for_visual("a stone bridge").await;
    h.stt.say(1, "what river is this");
    h.wait_turn_end(2).await;

    assert_eq!(h.llm.requests()[0].context.visual(), Some("a stone bridge"));
    h.stop().await.unwrap();
}

/// Speech while a turn is thinking interrupts it; its late reply never reaches synthesis
#[tokio::test]
async fn test_barge_in_while_thinking() {
    let llm = MockLlm::scripted(vec![slow(300, "LATE answer.")]);
    let mut h = Harness::start(
        MockTransport::new(),
        llm,
        MockTts::new(),
        fast_settings(),
        valid_credential(),
    );
    h.ready().await;

    h.stt.say(1, "tell me about the rose window");
    h.next_transition(|t| t.turn_id == 2 && t.to == TurnState::Thinking)
        .await;

    h.stt.voice(2);
    let interrupted = h.wait_turn_end(2).await;
    assert_eq!(interrupted.from, TurnState::Thinking);
    assert_eq!(interrupted.to, TurnState::Interrupted);
    let listening = h.next_transition(|t| t.turn_id == 3).await;
    assert_eq!(listening.to, TurnState::Listening);

    h.stt.finish(2, "who made it");
    let done = h.wait_turn_end(3).await;
    assert_eq!(done.to, TurnState::Completed);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!h.tts.heard("LATE"));
    assert!(h.tts.heard("who made it"));
    h.stop().await.unwrap();
}

/// Interrupting during speech stops frames within a bounded number
#[tokio::test]
async fn test_barge_in_while_speaking_stops_audio() {
    let sentences = (0..20).map(|i| format!("Sentence {i}. ")).collect();
    let llm = MockLlm::scripted(vec![ReplyScript::Chunks(sentences)]);
    let tts = MockTts::paced(4, Duration::from_millis(10));
    let mut h = Harness::start(
        MockTransport::new(),
        llm,
        tts,
        fast_settings(),
        valid_credential(),
    );
    let connection = h.ready().await;

    h.stt.say(1, "tell me everything");
    h.next_transition(|t| t.turn_id == 2 && t.to == TurnState::Speaking)
        .await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    h.stt.voice(2);
    let interrupted = h.wait_turn_end(2).await;
    assert_eq!(interrupted.from, TurnState::Speaking);
    assert_eq!(interrupted.to, TurnState::Interrupted);
    let at_interrupt = connection.frame_count();

    let listening = h.next_transition(|t| t.turn_id == 3).await;
    assert_eq!(listening.to, TurnState::Listening);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(connection.frame_count() <= at_interrupt + 1);
    h.stop().await.unwrap();
}

/// A rejected credential ends the session before it is ever connected
#[tokio::test]
async fn test_rejected_credential_is_fatal() {
    let transport = MockTransport::scripted(vec![Err(Error::Auth(AuthError::Rejected(
        "invalid token".into(),
    )))]);
    let mut h = Harness::start(
        transport.clone(),
        MockLlm::new(),
        MockTts::new(),
        fast_settings(),
        valid_credential(),
    );

    let result = h.outcome().await;
    assert!(matches!(result, Err(SessionError::Auth(AuthError::Rejected(_)))));
    assert_eq!(transport.calls(), 1);
    assert_eq!(*h.connection_state.borrow(), ConnectionState::Closed);
    assert!(h.tts.texts().is_empty());
    assert!(h.llm.requests().is_empty());
}

/// An expired credential is refused locally without dialing
#[tokio::test]
async fn test_expired_credential_never_dials() {
    let transport = MockTransport::new();
    let expired = AccessCredential::new("old-token", Utc::now() - chrono::Duration::minutes(5));
    let mut h = Harness::start(
        transport.clone(),
        MockLlm::new(),
        MockTts::new(),
        fast_settings(),
        expired,
    );

    let result = h.outcome().await;
    assert!(matches!(result, Err(SessionError::Auth(AuthError::Expired(_)))));
    assert_eq!(transport.calls(), 0);
}

/// Join failures are retried before the session gives up
#[tokio::test]
async fn test_initial_join_retries_transport_errors() {
    let refused = || Err(Error::Transport(TransportError::ConnectionFailed("refused".into())));
    let transport = MockTransport::scripted(vec![refused(), refused()]);
    let mut h = Harness::start(
        transport.clone(),
        MockLlm::new(),
        MockTts::new(),
        fast_settings(),
        valid_credential(),
    );

    h.ready().await;
    assert_eq!(transport.calls(), 3);
    h.stop().await.unwrap();
}

/// Five consecutive reply errors fail one turn; the next turn still works
#[tokio::test]
async fn test_reply_failures_fail_only_the_turn() {
    let unavailable = || {
        ReplyScript::Fail(ProviderError::Unavailable {
            stage: Stage::ReplyGeneration,
            message: "model overloaded".into(),
        })
    };
    let llm = MockLlm::scripted((0..5).map(|_| unavailable()).collect());
    let mut h = Harness::start(
        MockTransport::new(),
        llm,
        MockTts::new(),
        fast_settings(),
        valid_credential(),
    );
    h.ready().await;

    h.stt.say(1, "when was it built");
    let failed = h.wait_turn_end(2).await;
    assert_eq!(failed.to, TurnState::Failed);
    assert_eq!(h.llm.requests().len(), 4);
    assert_eq!(*h.status.borrow(), TurnStatus::idle());

    h.stt.say(2, "who built it");
    let next = h.wait_turn_end(3).await;
    assert_eq!(next.to, TurnState::Completed);
    assert_eq!(h.llm.requests().len(), 6);

    let report = h.stop().await.unwrap();
    assert!(report.turns[1].failure.as_deref().unwrap().contains("model overloaded"));
}

/// Losing the connection interrupts the turn, reconnects, and the session carries on
#[tokio::test]
async fn test_reconnect_resets_to_idle() {
    let llm = MockLlm::scripted(vec![slow(2_000, "too late")]);
    let mut h = Harness::start(
        MockTransport::new(),
        llm,
        MockTts::new(),
        fast_settings(),
        valid_credential(),
    );
    let first = h.ready().await;

    h.stt.say(1, "what is this");
    h.next_transition(|t| t.turn_id == 2 && t.to == TurnState::Thinking)
        .await;

    first.emit(RoomEvent::Disconnected(DisconnectReason::ConnectionLost));
    let interrupted = h.wait_turn_end(2).await;
    assert_eq!(interrupted.to, TurnState::Interrupted);
    assert_eq!(*h.status.borrow(), TurnStatus::idle());

    let second = h.transport.connection(1).await;
    h.wait_connected().await;
    assert_eq!(h.transport.calls(), 2);

    // The re-armed transcription stream numbers its segments from 1 again
    h.stt.say(1, "and now");
    let done = h.wait_turn_end(3).await;
    assert_eq!(done.to, TurnState::Completed);
    assert!(second.frame_count() > 0);
    assert!(!h.tts.heard("too late"));

    let report = h.stop().await.unwrap();
    assert_eq!(report.reconnects, 1);
    assert_eq!(report.turns.last().unwrap().transcript, "and now");
    assert!(second.was_disconnected());
}

/// Running out of reconnect attempts closes the session and releases its state
#[tokio::test]
async fn test_reconnect_exhaustion_closes_session() {
    let refused = || Err(Error::Transport(TransportError::ConnectionFailed("refused".into())));
    let transport = MockTransport::scripted(vec![Ok(()), refused(), refused()]);
    let mut settings = fast_settings();
    settings.reconnect.max_attempts = 2;
    let mut h = Harness::start(
        transport.clone(),
        MockLlm::new(),
        MockTts::new(),
        settings,
        valid_credential(),
    );
    let connection = h.ready().await;
    connection.send_visual("a castle");
    h.wait_for_visual("a castle").await;

    connection.emit(RoomEvent::Disconnected(DisconnectReason::ServerRestart));

    let result = h.outcome().await;
    assert!(matches!(result, Err(SessionError::ReconnectExhausted { attempts: 2 })));
    assert_eq!(transport.calls(), 3);
    assert!(h.store.is_empty());
    assert_eq!(*h.connection_state.borrow(), ConnectionState::Closed);
}

/// A rejected credential during reconnection stops further attempts
#[tokio::test]
async fn test_auth_error_during_reconnect_is_fatal() {
    let transport = MockTransport::scripted(vec![
        Ok(()),
        Err(Error::Auth(AuthError::Rejected("revoked".into()))),
    ]);
    let mut h = Harness::start(
        transport.clone(),
        MockLlm::new(),
        MockTts::new(),
        fast_settings(),
        valid_credential(),
    );
    let connection = h.ready().await;

    connection.emit(RoomEvent::Disconnected(DisconnectReason::Unknown));

    let result = h.outcome().await;
    assert!(matches!(result, Err(SessionError::Auth(_))));
    assert_eq!(transport.calls(), 2);
}

/// The room closing ends the session without reconnecting
#[tokio::test]
async fn test_room_closed_ends_session() {
    let transport = MockTransport::new();
    let mut h = Harness::start(
        transport.clone(),
        MockLlm::new(),
        MockTts::new(),
        fast_settings(),
        valid_credential(),
    );
    let connection = h.ready().await;

    connection.emit(RoomEvent::Disconnected(DisconnectReason::RoomClosed));

    let report = h.outcome().await.unwrap();
    assert_eq!(report.end, SessionEnd::Disconnected(DisconnectReason::RoomClosed));
    assert_eq!(report.reconnects, 0);
    assert_eq!(transport.calls(), 1);
}

/// Malformed side-channel messages are dropped and the session keeps working
#[tokio::test]
async fn test_malformed_side_channel_is_ignored() {
    let mut h = Harness::with_defaults();
    let connection = h.ready().await;

    connection.send_raw(b"{not json");
    connection.send_raw(br#"["visual_context"]"#);
    connection.send_raw(br#"{"type":"visual_context","content":7}"#);
    connection.send_raw(br#"{"content":"no type"}"#);
    connection.send_visual("a harbour");
    h.wait_for_visual("a harbour").await;

    assert_eq!(*h.connection_state.borrow(), ConnectionState::Connected);
    h.stt.say(1, "which city is this");
    let done = h.wait_turn_end(2).await;
    assert_eq!(done.to, TurnState::Completed);
    assert_eq!(h.llm.requests()[0].context.visual(), Some("a harbour"));
    h.stop().await.unwrap();
}

/// Rapid overlapping speech never leaves more than one turn in flight
#[tokio::test]
async fn test_at_most_one_active_turn() {
    let mut h = Harness::with_defaults();
    h.ready().await;

    for segment in 1..=10 {
        h.stt.voice(segment);
        h.stt.partial(segment, "hmm");
    }
    h.stt.finish(10, "so what is it");

    let mut active: Option<u64> = None;
    loop {
        let t = h.next_transition(|_| true).await;
        if t.from == TurnState::Idle {
            assert!(active.is_none(), "turn {} started while {:?} active", t.turn_id, active);
            active = Some(t.turn_id);
        } else if t.to.is_terminal() {
            assert_eq!(active, Some(t.turn_id));
            active = None;
            if t.turn_id == 11 {
                assert_eq!(t.to, TurnState::Completed);
                break;
            }
        }
    }

    let report = h.stop().await.unwrap();
    let interrupted = report
        .turns
        .iter()
        .filter(|t| t.outcome == TurnState::Interrupted)
        .count();
    assert_eq!(interrupted, 9);
}

/// Shutdown interrupts the turn in flight and disconnects
#[tokio::test]
async fn test_shutdown_interrupts_turn() {
    let llm = MockLlm::scripted(vec![slow(2_000, "never")]);
    let mut h = Harness::start(
        MockTransport::new(),
        llm,
        MockTts::new(),
        fast_settings(),
        valid_credential(),
    );
    let connection = h.ready().await;

    h.stt.say(1, "one more question");
    h.next_transition(|t| t.turn_id == 2 && t.to == TurnState::Thinking)
        .await;

    let report = h.stop().await.unwrap();
    assert_eq!(report.end, SessionEnd::Shutdown);
    assert_eq!(report.turns.last().unwrap().outcome, TurnState::Interrupted);
    assert!(connection.was_disconnected());
}
