//! Integration tests for the voice session orchestrator.
//!
//! Everything here runs without audio hardware or network access by driving
//! the public dispatch surface directly; tests that need a microphone and a
//! live service are marked `#[ignore]`.

use companion_voice::{
    codec, ConversationMode, ConversationState, Dispatcher, Flow, Identity, Reaction, ServerEvent,
    SessionError, Snapshot, SnapshotPublisher, StateEvent, VoiceSessionManager, API_KEY_ENV,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn identity() -> Identity {
    Identity {
        name: "Alex".to_string(),
        age_band: "10-18".to_string(),
    }
}

#[test]
fn missing_credential_fails_before_any_resource_is_acquired() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    std::env::remove_var(API_KEY_ENV);

    let mut manager = VoiceSessionManager::new();
    let result = manager.start_conversation(identity(), ConversationMode::Assistant);

    assert!(matches!(result, Err(SessionError::Config(_))));
    assert!(!manager.is_active());

    // The published state stays PreGame, with a user-visible message.
    let rx = manager.subscribe();
    let snapshot: Snapshot = rx.borrow().clone();
    assert_eq!(snapshot.state, ConversationState::PreGame);
    assert!(snapshot.error.is_some());

    // Toggle with no stored identity is also a configuration failure.
    assert!(matches!(
        manager.toggle_conversation(),
        Err(SessionError::Config(_))
    ));
}

#[test]
fn published_snapshot_tracks_the_dispatcher() {
    let (publisher, rx) = SnapshotPublisher::new();
    let mut dispatcher = Dispatcher::headless(Arc::new(publisher));
    let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
    dispatcher.attach_outbound(outbound_tx);

    dispatcher.apply_state(StateEvent::Start);
    dispatcher.apply_state(StateEvent::GreetingFinished);
    dispatcher.apply_state(StateEvent::TransportOpen);

    dispatcher.handle_event(ServerEvent::InputTextDelta("sing a song".to_string()));
    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.state, ConversationState::Listening);
    assert_eq!(snapshot.user_transcript, "sing a song");

    dispatcher.handle_event(ServerEvent::TurnComplete);
    dispatcher.handle_event(ServerEvent::AudioDelta(codec::encode_for_transport(
        &vec![0i16; 4800],
    )));
    dispatcher.poll_drained();

    // The final resting state after the full cycle is Listening again, and
    // the sealed turn text stays visible in the display transcript.
    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.state, ConversationState::Listening);
    assert_eq!(snapshot.user_transcript, "sing a song ");
}

#[test]
fn state_sequence_is_greeting_connecting_listening_thinking_talking() {
    let (publisher, _rx) = SnapshotPublisher::new();
    let mut dispatcher = Dispatcher::headless(Arc::new(publisher));
    let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
    dispatcher.attach_outbound(outbound_tx);

    let mut observed = Vec::new();

    dispatcher.apply_state(StateEvent::Start);
    observed.push(dispatcher.state());
    dispatcher.apply_state(StateEvent::GreetingFinished);
    observed.push(dispatcher.state());
    dispatcher.apply_state(StateEvent::TransportOpen);
    observed.push(dispatcher.state());

    dispatcher.handle_event(ServerEvent::InputTextDelta("hello".to_string()));
    dispatcher.handle_event(ServerEvent::TurnComplete);
    observed.push(dispatcher.state());

    dispatcher.handle_event(ServerEvent::AudioDelta(codec::encode_for_transport(
        &vec![0i16; 2400],
    )));
    observed.push(dispatcher.state());

    dispatcher.poll_drained();
    observed.push(dispatcher.state());

    assert_eq!(
        observed,
        vec![
            ConversationState::Greeting,
            ConversationState::Connecting,
            ConversationState::Listening,
            ConversationState::Thinking,
            ConversationState::Talking,
            ConversationState::Listening,
        ]
    );
}

#[test]
fn unrecognized_reaction_is_acked_but_leaves_state_unchanged() {
    let (publisher, _rx) = SnapshotPublisher::new();
    let mut dispatcher = Dispatcher::headless(Arc::new(publisher));
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    dispatcher.attach_outbound(outbound_tx);

    dispatcher.apply_state(StateEvent::Start);
    dispatcher.apply_state(StateEvent::GreetingFinished);
    dispatcher.apply_state(StateEvent::TransportOpen);
    let before = dispatcher.reaction();

    let flow = dispatcher.handle_event(ServerEvent::ToolInvocation {
        id: "call_7".to_string(),
        name: "set_reaction".to_string(),
        reaction: "zoomies".to_string(),
    });

    assert_eq!(flow, Flow::Continue);
    assert_eq!(dispatcher.reaction(), before);
    assert!(outbound_rx.try_recv().is_ok());
    assert!(outbound_rx.try_recv().is_err());
}

#[test]
fn stop_from_listening_resets_reaction_and_transcripts() {
    let (publisher, rx) = SnapshotPublisher::new();
    let mut dispatcher = Dispatcher::headless(Arc::new(publisher));
    let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
    dispatcher.attach_outbound(outbound_tx);

    dispatcher.apply_state(StateEvent::Start);
    dispatcher.apply_state(StateEvent::GreetingFinished);
    dispatcher.apply_state(StateEvent::TransportOpen);
    dispatcher.handle_event(ServerEvent::ToolInvocation {
        id: "call_1".to_string(),
        name: "set_reaction".to_string(),
        reaction: "laughing".to_string(),
    });
    dispatcher.handle_event(ServerEvent::InputTextDelta("knock knock".to_string()));
    assert_eq!(dispatcher.reaction(), Reaction::Laughing);

    dispatcher.shutdown();

    assert_eq!(dispatcher.state(), ConversationState::Idle);
    assert_eq!(dispatcher.reaction(), Reaction::Idle);
    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.user_transcript, "");
    assert_eq!(snapshot.character_transcript, "");
}

#[test]
fn exit_clears_identity_and_returns_to_pregame() {
    let mut manager = VoiceSessionManager::new();
    manager.exit();
    assert!(!manager.is_active());
    let rx = manager.subscribe();
    assert_eq!(rx.borrow().state, ConversationState::PreGame);
    assert_eq!(rx.borrow().error, None);
}

#[tokio::test]
#[ignore] // Requires a microphone, an output device and a live service key
async fn full_conversation_lifecycle() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut manager = VoiceSessionManager::new();
    manager
        .start_conversation(identity(), ConversationMode::Assistant)
        .expect("failed to start conversation");
    assert!(manager.is_active());

    tokio::time::sleep(Duration::from_secs(2)).await;

    // Toggle while live stops the conversation and releases the microphone.
    manager.toggle_conversation().expect("toggle failed");
    assert!(!manager.is_active());

    let rx = manager.subscribe();
    assert_eq!(rx.borrow().state, ConversationState::Idle);

    manager.exit();
    assert_eq!(rx.borrow().state, ConversationState::PreGame);
}
