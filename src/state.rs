//! Conversation state machine and the observable snapshot stream.
//!
//! The state machine is the single source of truth for "what is happening
//! right now". It only moves along the transitions below; any other
//! (state, event) pair is ignored rather than treated as an error.

use crate::reaction::Reaction;
use tokio::sync::watch;

/// What the UI should present right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    /// No active session; identity/mode not yet confirmed.
    #[default]
    PreGame,
    /// One-shot greeting utterance playing before the main session.
    Greeting,
    /// Transport being established.
    Connecting,
    /// Microphone live, waiting for the user.
    Listening,
    /// User turn committed, response not yet audible.
    Thinking,
    /// Character audio playing.
    Talking,
    /// Stopped or failed; may be restarted.
    Idle,
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// User confirmed identity/mode and asked to start.
    Start,
    /// Greeting played fully, failed, or completed; all outcomes proceed.
    GreetingFinished,
    /// Transport reported open.
    TransportOpen,
    /// Turn completed with non-empty pending user text.
    UserTurnCommitted,
    /// First audio delta of a response arrived.
    AudioArrived,
    /// Playback active set drained.
    PlaybackDrained,
    /// User stop intent, transport error, or transport close.
    Stop,
    /// User re-starts a stopped conversation.
    Restart,
    /// Explicit exit back to the pre-game screen.
    Exit,
}

/// The finite state machine of the conversation lifecycle.
#[derive(Debug, Default)]
pub struct ConversationStateMachine {
    state: ConversationState,
}

impl ConversationStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume at a known state, e.g. `Idle` when restarting a stopped
    /// conversation on a fresh conversation thread.
    pub fn resuming_at(state: ConversationState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Apply an event. Returns the new state when a transition was taken,
    /// `None` when the event does not match the current state.
    pub fn apply(&mut self, event: StateEvent) -> Option<ConversationState> {
        use ConversationState::*;
        use StateEvent::*;

        let next = match (self.state, event) {
            (PreGame, Start) => Greeting,
            (Greeting, GreetingFinished) => Connecting,
            (Connecting, TransportOpen) => Listening,
            (Listening, UserTurnCommitted) => Thinking,
            (Listening, AudioArrived) | (Thinking, AudioArrived) => Talking,
            (Talking, PlaybackDrained) => Listening,
            (Idle, Restart) => Connecting,
            (s, Stop) if s != Idle && s != PreGame => Idle,
            (_, Exit) => PreGame,
            _ => return None,
        };
        self.state = next;
        Some(next)
    }
}

/// Read-only view published to the renderer and sound-effect player on
/// every state change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub state: ConversationState,
    pub reaction: Reaction,
    pub user_transcript: String,
    pub character_transcript: String,
    pub error: Option<String>,
}

/// Single-writer snapshot channel; any number of observers may subscribe.
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<Snapshot>,
}

impl SnapshotPublisher {
    pub fn new() -> (Self, watch::Receiver<Snapshot>) {
        let (tx, rx) = watch::channel(Snapshot::default());
        (Self { tx }, rx)
    }

    pub fn publish(&self, snapshot: Snapshot) {
        // Observers may all be gone; that is fine.
        let _ = self.tx.send(snapshot);
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversationState::*;
    use StateEvent::*;

    #[test]
    fn normal_flow_reaches_listening_then_talking() {
        let mut m = ConversationStateMachine::new();
        assert_eq!(m.apply(Start), Some(Greeting));
        assert_eq!(m.apply(GreetingFinished), Some(Connecting));
        assert_eq!(m.apply(TransportOpen), Some(Listening));
        assert_eq!(m.apply(UserTurnCommitted), Some(Thinking));
        assert_eq!(m.apply(AudioArrived), Some(Talking));
        assert_eq!(m.apply(PlaybackDrained), Some(Listening));
    }

    #[test]
    fn talking_is_only_reachable_from_listening_or_thinking() {
        let mut m = ConversationStateMachine::new();
        // audio deltas before the session is live are ignored
        assert_eq!(m.apply(AudioArrived), None);
        m.apply(Start);
        assert_eq!(m.apply(AudioArrived), None);
        m.apply(GreetingFinished);
        assert_eq!(m.apply(AudioArrived), None);
        m.apply(TransportOpen);
        assert_eq!(m.apply(AudioArrived), Some(Talking));
    }

    #[test]
    fn audio_can_arrive_without_thinking() {
        let mut m = ConversationStateMachine::new();
        m.apply(Start);
        m.apply(GreetingFinished);
        m.apply(TransportOpen);
        // response may begin before any user transcript was committed
        assert_eq!(m.apply(AudioArrived), Some(Talking));
    }

    #[test]
    fn stop_is_accepted_from_any_live_state() {
        for seed in [
            vec![Start],
            vec![Start, GreetingFinished],
            vec![Start, GreetingFinished, TransportOpen],
            vec![Start, GreetingFinished, TransportOpen, UserTurnCommitted],
            vec![Start, GreetingFinished, TransportOpen, AudioArrived],
        ] {
            let mut m = ConversationStateMachine::new();
            for e in seed {
                m.apply(e);
            }
            assert_eq!(m.apply(Stop), Some(Idle));
        }
    }

    #[test]
    fn stop_is_ignored_when_already_idle_or_pregame() {
        let mut m = ConversationStateMachine::new();
        assert_eq!(m.apply(Stop), None);
        m.apply(Start);
        m.apply(GreetingFinished);
        m.apply(TransportOpen);
        m.apply(Stop);
        assert_eq!(m.apply(Stop), None);
        assert_eq!(m.state(), Idle);
    }

    #[test]
    fn idle_restarts_into_connecting() {
        let mut m = ConversationStateMachine::new();
        m.apply(Start);
        m.apply(GreetingFinished);
        m.apply(TransportOpen);
        m.apply(Stop);
        assert_eq!(m.apply(Restart), Some(Connecting));
    }

    #[test]
    fn exit_returns_to_pregame_from_anywhere() {
        let mut m = ConversationStateMachine::new();
        m.apply(Start);
        m.apply(GreetingFinished);
        m.apply(TransportOpen);
        m.apply(AudioArrived);
        assert_eq!(m.apply(Exit), Some(PreGame));
    }

    #[test]
    fn unmatched_events_leave_state_unchanged() {
        let mut m = ConversationStateMachine::new();
        m.apply(Start);
        assert_eq!(m.apply(TransportOpen), None);
        assert_eq!(m.apply(PlaybackDrained), None);
        assert_eq!(m.state(), Greeting);
    }

    #[tokio::test]
    async fn snapshots_reach_subscribers() {
        let (publisher, mut rx) = SnapshotPublisher::new();
        publisher.publish(Snapshot {
            state: Listening,
            ..Snapshot::default()
        });
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, Listening);
    }
}
