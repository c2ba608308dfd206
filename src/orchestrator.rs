//! The top-level session orchestrator.
//!
//! Owns the one live conversation: the capture pipeline, the playback
//! scheduler, the transcript buffers, the protocol session, and the state
//! machine. All inbound work funnels through a single `Dispatcher` running
//! on a dedicated conversation thread, so event handling is strictly
//! single-consumer and ordered per source.

use crate::capture::{AudioChunk, CaptureConfig, MicCapture};
use crate::codec;
use crate::error::{SessionError, SessionResult};
use crate::greeting;
use crate::playback::{NullPlayback, PlaybackOut, PlaybackScheduler, RodioPlayback};
use crate::protocol::{Outbound, ServerEvent, Session, SessionConfig};
use crate::reaction::Reaction;
use crate::state::{ConversationState, ConversationStateMachine, Snapshot, SnapshotPublisher, StateEvent};
use crate::transcript::TranscriptBuffer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Who the character is talking to. Captured on the intro form.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub age_band: String,
}

/// How the character behaves, fixed before session creation. Selects the
/// system instruction; no further runtime effect inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationMode {
    /// Answers questions and adds personality.
    Assistant,
    /// Echoes the user verbatim.
    Mimic,
}

impl ConversationMode {
    pub fn instructions(&self, identity: &Identity) -> String {
        match self {
            ConversationMode::Assistant => format!(
                "You are a cheerful companion character talking with {name}, \
                 age {age}. Answer their questions in short, playful sentences \
                 suited to their age. When something is funny, surprising, sad, \
                 or clever, call set_reaction with the matching reaction.",
                name = identity.name,
                age = identity.age_band,
            ),
            ConversationMode::Mimic => format!(
                "You are a mimic character playing with {name}. Repeat exactly \
                 what they say, word for word, and nothing else. Call \
                 set_reaction with \"mimicking\" while you repeat.",
                name = identity.name,
            ),
        }
    }

    pub fn voice(&self) -> &'static str {
        match self {
            ConversationMode::Assistant => "shimmer",
            ConversationMode::Mimic => "echo",
        }
    }
}

/// Whether the event loop should keep running after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// The single-consumer dispatch core.
///
/// Translates inbound protocol events into actions on the transcript,
/// reaction, playback scheduler and state machine, and publishes a snapshot
/// after every change. Separated from the transport so the dispatch table
/// is exercisable without a network or audio hardware.
pub struct Dispatcher {
    machine: ConversationStateMachine,
    transcript: TranscriptBuffer,
    scheduler: PlaybackScheduler,
    reaction: Reaction,
    playback: Box<dyn PlaybackOut>,
    publisher: Arc<SnapshotPublisher>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    error: Option<String>,
    /// Origin of the output device's time domain.
    clock: Instant,
    output_sample_rate: u32,
    output_channels: u16,
}

impl Dispatcher {
    pub fn new(
        publisher: Arc<SnapshotPublisher>,
        playback: Box<dyn PlaybackOut>,
        output_sample_rate: u32,
        output_channels: u16,
    ) -> Self {
        Self {
            machine: ConversationStateMachine::new(),
            transcript: TranscriptBuffer::new(),
            scheduler: PlaybackScheduler::new(),
            reaction: Reaction::Idle,
            playback,
            publisher,
            outbound: None,
            error: None,
            clock: Instant::now(),
            output_sample_rate,
            output_channels,
        }
    }

    /// Dispatcher with no audio output, for driving the dispatch table in
    /// tests and headless environments.
    pub fn headless(publisher: Arc<SnapshotPublisher>) -> Self {
        Self::new(publisher, Box::new(NullPlayback::default()), 24_000, 1)
    }

    /// Attach the outbound queue of the open session (for tool acks).
    pub fn attach_outbound(&mut self, outbound: mpsc::UnboundedSender<Outbound>) {
        self.outbound = Some(outbound);
    }

    pub fn state(&self) -> ConversationState {
        self.machine.state()
    }

    pub fn reaction(&self) -> Reaction {
        self.reaction
    }

    /// Drive a lifecycle event through the state machine and publish.
    pub fn apply_state(&mut self, event: StateEvent) {
        if self.machine.apply(event).is_some() {
            self.publish();
        }
    }

    fn publish(&self) {
        self.publisher.publish(Snapshot {
            state: self.machine.state(),
            reaction: self.reaction,
            user_transcript: self.transcript.display_user().to_string(),
            character_transcript: self.transcript.display_character().to_string(),
            error: self.error.clone(),
        });
    }

    /// Handle one inbound protocol event, per the dispatch table.
    pub fn handle_event(&mut self, event: ServerEvent) -> Flow {
        match event {
            ServerEvent::ToolInvocation { id, name, reaction } => {
                if name == "set_reaction" {
                    match Reaction::from_wire(&reaction) {
                        Some(r) => {
                            info!("🎭 Reaction -> {}", r);
                            self.reaction = r;
                            self.publish();
                        }
                        None => debug!("Ignoring unrecognized reaction: {}", reaction),
                    }
                } else {
                    debug!("Ignoring unrecognized tool: {}", name);
                }
                // Exactly one acknowledgment per invocation, queued before
                // the next inbound event is processed.
                if let Some(ref outbound) = self.outbound {
                    let _ = outbound.send(Outbound::ToolAck { id });
                }
                Flow::Continue
            }
            ServerEvent::OutputTextDelta(fragment) => {
                self.transcript.append_character(&fragment);
                self.publish();
                Flow::Continue
            }
            ServerEvent::InputTextDelta(fragment) => {
                self.transcript.append_user(&fragment);
                self.publish();
                Flow::Continue
            }
            ServerEvent::TurnComplete => {
                if self.transcript.has_pending_user()
                    && self.machine.apply(StateEvent::UserTurnCommitted).is_some()
                {
                    self.reaction = Reaction::Thinking;
                }
                self.transcript.complete_turn();
                self.publish();
                Flow::Continue
            }
            ServerEvent::AudioDelta(text) => {
                let decoded = codec::decode_from_transport(&text).and_then(|bytes| {
                    let buffer = codec::to_playable(
                        &bytes,
                        self.output_sample_rate,
                        self.output_channels,
                    )?;
                    Ok((bytes.len() / 2, buffer))
                });
                match decoded {
                    Ok((sample_count, buffer)) => {
                        let secs = codec::pcm16_duration_secs(
                            sample_count,
                            self.output_sample_rate,
                            self.output_channels,
                        );
                        let unit = self
                            .scheduler
                            .schedule(Duration::from_secs_f64(secs), self.clock.elapsed());
                        debug!("Scheduled unit {} at {:?}", unit.id, unit.start);
                        if let Err(e) = self.playback.play(buffer) {
                            warn!("Playback rejected buffer: {}", e);
                            self.scheduler.complete(unit.id);
                        }
                        self.apply_state(StateEvent::AudioArrived);
                    }
                    Err(e) => warn!("Dropping malformed audio delta: {}", e),
                }
                Flow::Continue
            }
            ServerEvent::Interrupted => {
                self.scheduler.interrupt();
                self.playback.stop();
                Flow::Continue
            }
            ServerEvent::Error(message) => {
                warn!("Transport error: {}", message);
                self.fail(SessionError::Connection(message));
                Flow::Shutdown
            }
            ServerEvent::Closed => {
                info!("🛑 Transport closed");
                self.shutdown();
                Flow::Shutdown
            }
            ServerEvent::Unknown(_) => Flow::Continue,
        }
    }

    /// Playback-drained check; drives Talking back to Listening once the
    /// active set empties.
    pub fn poll_drained(&mut self) {
        if self.machine.state() == ConversationState::Talking && !self.playback.is_playing() {
            self.scheduler.complete_all();
            self.apply_state(StateEvent::PlaybackDrained);
        }
    }

    /// Tear down component state. Idempotent, safe on partially-initialized
    /// state; capture and transport handles are released by the caller.
    fn teardown(&mut self) {
        self.scheduler.interrupt();
        self.playback.stop();
        self.reaction = Reaction::Idle;
        self.transcript.clear();
        self.outbound = None;
    }

    /// Orderly shutdown (user stop or remote close).
    pub fn shutdown(&mut self) {
        self.teardown();
        self.apply_state(StateEvent::Stop);
        self.publish();
    }

    /// Shutdown after a failure, surfacing a user-visible message.
    pub fn fail(&mut self, err: SessionError) {
        self.error = Some(err.to_string());
        self.teardown();
        self.apply_state(StateEvent::Stop);
        self.publish();
    }
}

struct ConversationHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ConversationHandle {
    /// Stop the conversation thread and wait for its teardown to finish.
    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Whether the conversation thread already exited on its own, e.g.
    /// after a transport error or remote close.
    fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }
}

/// Public entry point: the three UI intents and the snapshot stream.
pub struct VoiceSessionManager {
    publisher: Arc<SnapshotPublisher>,
    snapshot_rx: watch::Receiver<Snapshot>,
    capture_config: CaptureConfig,
    identity: Option<(Identity, ConversationMode)>,
    conversation: Option<ConversationHandle>,
}

impl VoiceSessionManager {
    pub fn new() -> Self {
        let (publisher, snapshot_rx) = SnapshotPublisher::new();
        Self {
            publisher: Arc::new(publisher),
            snapshot_rx,
            capture_config: CaptureConfig::default(),
            identity: None,
            conversation: None,
        }
    }

    /// Observe `(state, reaction, transcripts, error)` snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// User confirmed the intro form: greet, then connect.
    ///
    /// Fails with `Config` before any resource is acquired when the service
    /// key is absent; the published state stays `PreGame` in that case.
    pub fn start_conversation(
        &mut self,
        identity: Identity,
        mode: ConversationMode,
    ) -> SessionResult<()> {
        let config = match SessionConfig::from_env(
            mode.instructions(&identity),
            mode.voice().to_string(),
        ) {
            Ok(c) => c,
            Err(e) => {
                self.publisher.publish(Snapshot {
                    state: ConversationState::PreGame,
                    error: Some(e.to_string()),
                    ..Snapshot::default()
                });
                return Err(e);
            }
        };

        // One live session at a time; fully close the old one first.
        self.stop_active();
        self.identity = Some((identity.clone(), mode));
        self.spawn_conversation(config, identity, true);
        Ok(())
    }

    /// Stop a running conversation, or restart a stopped one.
    pub fn toggle_conversation(&mut self) -> SessionResult<()> {
        // A thread that exited on its own (transport error, remote close)
        // is not a live conversation; reap it and fall through to restart.
        if self.is_active() {
            self.stop_active();
            return Ok(());
        }
        self.stop_active();
        let (identity, mode) = self
            .identity
            .clone()
            .ok_or_else(|| SessionError::Config("no identity selected".to_string()))?;
        let config =
            SessionConfig::from_env(mode.instructions(&identity), mode.voice().to_string())?;
        // Restart skips the greeting: Idle -> Connecting.
        self.spawn_conversation(config, identity, false);
        Ok(())
    }

    /// Back to the intro screen: full teardown plus identity reset.
    pub fn exit(&mut self) {
        self.stop_active();
        self.identity = None;
        self.publisher.publish(Snapshot::default());
    }

    pub fn is_active(&self) -> bool {
        self.conversation
            .as_ref()
            .is_some_and(|conversation| !conversation.is_finished())
    }

    fn stop_active(&mut self) {
        if let Some(mut conversation) = self.conversation.take() {
            conversation.stop();
        }
    }

    /// Run the conversation on a dedicated thread with its own
    /// current-thread runtime; the capture stream and output sink are not
    /// `Send` on every platform and must live where they were created.
    fn spawn_conversation(&mut self, config: SessionConfig, identity: Identity, greet: bool) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let publisher = Arc::clone(&self.publisher);
        let capture_config = self.capture_config.clone();

        let thread = std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    warn!("Conversation runtime failed to start: {}", e);
                    return;
                }
            };
            runtime.block_on(conversation_task(
                config,
                identity,
                capture_config,
                publisher,
                greet,
                stop_rx,
            ));
        });

        self.conversation = Some(ConversationHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        });
    }
}

impl Default for VoiceSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VoiceSessionManager {
    fn drop(&mut self) {
        self.stop_active();
    }
}

/// The conversation body: greeting, session open, capture start, event loop.
async fn conversation_task(
    config: SessionConfig,
    identity: Identity,
    capture_config: CaptureConfig,
    publisher: Arc<SnapshotPublisher>,
    greet: bool,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let playback: Box<dyn PlaybackOut> = match RodioPlayback::new() {
        Ok(p) => Box::new(p),
        Err(e) => {
            warn!("No output device, playback disabled: {}", e);
            Box::new(NullPlayback::default())
        }
    };
    let mut dispatcher = Dispatcher::new(
        publisher,
        playback,
        config.output_sample_rate,
        config.output_channels,
    );

    if greet {
        dispatcher.apply_state(StateEvent::Start);
        // A stop intent must take effect mid-greeting, not after it.
        let fetched = tokio::select! {
            _ = &mut stop_rx => {
                dispatcher.shutdown();
                return;
            }
            fetched = fetch_greeting(&config, &identity) => fetched,
        };
        if let Some((buffer, length)) = fetched {
            if let Err(e) = dispatcher.playback.play(buffer) {
                warn!("Greeting playback failed: {}", e);
            } else {
                // Let the utterance finish before connecting, unless stopped.
                tokio::select! {
                    _ = &mut stop_rx => {
                        dispatcher.shutdown();
                        return;
                    }
                    _ = tokio::time::sleep(length) => {}
                }
            }
        }
        dispatcher.apply_state(StateEvent::GreetingFinished);
    } else {
        // Restarted after a stop; the previous conversation left us Idle.
        dispatcher.machine = ConversationStateMachine::resuming_at(ConversationState::Idle);
        dispatcher.apply_state(StateEvent::Restart);
    }

    // Likewise cancellable while the handshake is in flight; no transport
    // may be left open after the user asked to stop.
    let opened = tokio::select! {
        _ = &mut stop_rx => {
            dispatcher.shutdown();
            return;
        }
        opened = Session::open(config) => opened,
    };
    let (session, mut events) = match opened {
        Ok(open) => open,
        Err(e) => {
            dispatcher.fail(e);
            return;
        }
    };
    dispatcher.attach_outbound(session.outbound());

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<AudioChunk>();
    let capture_stream = match MicCapture::new(capture_config).and_then(|c| c.start(chunk_tx)) {
        Ok(stream) => stream,
        Err(e) => {
            session.close();
            dispatcher.fail(e);
            return;
        }
    };

    dispatcher.apply_state(StateEvent::TransportOpen);
    info!("✅ Conversation live for {}", identity.name);

    let mut drain_tick = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                dispatcher.shutdown();
                break;
            }
            Some(chunk) = chunk_rx.recv() => {
                session.send_audio(&chunk);
            }
            event = events.recv() => {
                let event = event.unwrap_or(ServerEvent::Closed);
                if dispatcher.handle_event(event) == Flow::Shutdown {
                    break;
                }
            }
            _ = drain_tick.tick() => {
                dispatcher.poll_drained();
            }
        }
    }

    // Release the microphone and transport; both are no-ops if already gone.
    drop(capture_stream);
    session.close();
}

/// Synthesize the one-shot greeting and prepare it for playback. Failure is
/// non-fatal; `None` means the conversation proceeds straight to connecting.
async fn fetch_greeting(
    config: &SessionConfig,
    identity: &Identity,
) -> Option<(rodio::buffer::SamplesBuffer<i16>, Duration)> {
    let text = greeting::greeting_text(&identity.name);
    let bytes = match greeting::synthesize_greeting(&config.api_key, &config.voice, &text).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Greeting synthesis failed, continuing: {}", e);
            return None;
        }
    };
    match codec::to_playable(&bytes, config.output_sample_rate, config.output_channels) {
        Ok(buffer) => {
            let secs = codec::pcm16_duration_secs(
                bytes.len() / 2,
                config.output_sample_rate,
                config.output_channels,
            );
            Some((buffer, Duration::from_secs_f64(secs)))
        }
        Err(e) => {
            warn!("Greeting payload malformed: {}", e);
            None
        }
    }
}
