//! Session protocol handler: the sole translator between the remote
//! conversational service and local components.
//!
//! The transport is a WebSocket carrying JSON events both ways. Inbound
//! frames are parsed into the closed `ServerEvent` vocabulary on a dedicated
//! reader task and delivered on a single-consumer channel, so the event loop
//! sees them strictly in arrival order. Outbound intents are queued on a
//! writer task; transmission is asynchronous but queue order is send order.

use crate::capture::AudioChunk;
use crate::codec;
use crate::error::{SessionError, SessionResult};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Environment variable holding the service access key.
pub const API_KEY_ENV: &str = "COMPANION_API_KEY";

const DEFAULT_ENDPOINT: &str = "wss://api.openai.com/v1/realtime?model=gpt-realtime";

/// Immutable configuration snapshot fixed at session creation.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api_key: String,
    pub endpoint: String,
    /// System instruction text selected by the conversation mode.
    pub instructions: String,
    pub voice: String,
    /// Sample rate of inbound synthesized audio.
    pub output_sample_rate: u32,
    pub output_channels: u16,
}

impl SessionConfig {
    /// Resolve the credential from the process environment. Fails with a
    /// `Config` error before any resource is acquired.
    pub fn from_env(instructions: String, voice: String) -> SessionResult<Self> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            SessionError::Config(format!("{} is not set", API_KEY_ENV))
        })?;
        if api_key.trim().is_empty() {
            return Err(SessionError::Config(format!("{} is empty", API_KEY_ENV)));
        }
        let endpoint =
            std::env::var("COMPANION_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Ok(Self {
            api_key,
            endpoint,
            instructions,
            voice,
            output_sample_rate: 24_000,
            output_channels: 1,
        })
    }
}

/// The inbound event vocabulary, as a closed set of tagged variants.
///
/// Shapes that do not match any variant parse to `Unknown` and are ignored
/// downstream rather than propagated untyped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Reaction command; must be acknowledged exactly once, keyed to `id`.
    ToolInvocation { id: String, name: String, reaction: String },
    /// Fragment of the character's speech transcript.
    OutputTextDelta(String),
    /// Fragment of the user's speech transcript.
    InputTextDelta(String),
    /// One user-utterance-to-response cycle finished.
    TurnComplete,
    /// Transport-encoded synthesized audio.
    AudioDelta(String),
    /// The user barged in over ongoing playback.
    Interrupted,
    /// Fatal transport-level error reported by the service.
    Error(String),
    /// Transport closed by the remote end.
    Closed,
    /// Unrecognized event shape; ignored.
    Unknown(String),
}

/// Parse one inbound text frame. Never fails; unrecognized shapes become
/// `ServerEvent::Unknown` so a malformed frame cannot stall the session.
pub fn parse_server_event(text: &str) -> ServerEvent {
    let v: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return ServerEvent::Unknown(format!("unparseable frame: {}", e)),
    };
    let typ = v.get("type").and_then(|s| s.as_str()).unwrap_or("");

    match typ {
        "tool.call" => {
            let id = v.get("id").and_then(|s| s.as_str()).unwrap_or("").to_string();
            let name = v.get("name").and_then(|s| s.as_str()).unwrap_or("").to_string();
            let reaction = v
                .get("arguments")
                .and_then(|a| a.get("reaction"))
                .and_then(|s| s.as_str())
                .unwrap_or("")
                .to_string();
            ServerEvent::ToolInvocation { id, name, reaction }
        }
        "response.output_text.delta" | "response.audio_transcript.delta" => {
            match v.get("delta").and_then(|s| s.as_str()) {
                Some(delta) => ServerEvent::OutputTextDelta(delta.to_string()),
                None => ServerEvent::Unknown(typ.to_string()),
            }
        }
        "input_audio_buffer.transcription.delta" => {
            match v.get("delta").and_then(|s| s.as_str()) {
                Some(delta) => ServerEvent::InputTextDelta(delta.to_string()),
                None => ServerEvent::Unknown(typ.to_string()),
            }
        }
        "response.done" => ServerEvent::TurnComplete,
        "response.audio.delta" => {
            // Accept either {audio:"..."} or {delta:"..."}
            match v
                .get("audio")
                .and_then(|s| s.as_str())
                .or_else(|| v.get("delta").and_then(|s| s.as_str()))
            {
                Some(audio) => ServerEvent::AudioDelta(audio.to_string()),
                None => ServerEvent::Unknown(typ.to_string()),
            }
        }
        "input_audio_buffer.speech_started" => ServerEvent::Interrupted,
        "error" => {
            let msg = v
                .get("error")
                .and_then(|e| e.get("message").and_then(|m| m.as_str()))
                .or_else(|| v.get("message").and_then(|m| m.as_str()))
                .unwrap_or("unspecified service error");
            ServerEvent::Error(msg.to_string())
        }
        other => ServerEvent::Unknown(other.to_string()),
    }
}

/// Outbound messages queued to the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Transport-encoded microphone audio.
    Audio(String),
    /// Acknowledgment for one tool invocation, keyed to its id.
    ToolAck { id: String },
    /// Orderly shutdown of the transport.
    Close,
}

impl Outbound {
    pub fn to_frame(&self) -> Option<String> {
        match self {
            Outbound::Audio(b64) => Some(
                serde_json::json!({"type": "input_audio_buffer.append", "audio": b64}).to_string(),
            ),
            Outbound::ToolAck { id } => Some(
                serde_json::json!({"type": "tool.output", "id": id, "output": {"ok": true}})
                    .to_string(),
            ),
            Outbound::Close => None,
        }
    }
}

fn setup_frame(config: &SessionConfig) -> String {
    serde_json::json!({
        "type": "session.update",
        "session": {
            "instructions": config.instructions,
            "voice": config.voice,
            "modalities": ["audio", "text"],
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "turn_detection": { "type": "server_vad" },
            "tools": [{
                "type": "function",
                "name": "set_reaction",
                "description": "Set the character's expressive reaction",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "reaction": {
                            "type": "string",
                            "enum": ["idle", "mimicking", "smart", "laughing",
                                     "thinking", "surprised", "sad"]
                        }
                    },
                    "required": ["reaction"]
                }
            }]
        }
    })
    .to_string()
}

/// The single live conversational connection to the remote service.
///
/// At most one may be open at a time; the orchestrator enforces that by
/// fully closing the previous one before opening another.
pub struct Session {
    config: SessionConfig,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Establish the transport and send the session setup frame.
    ///
    /// Returns the session handle together with the single-consumer inbound
    /// event stream. Fails with `Connection` when the handshake fails.
    pub async fn open(
        config: SessionConfig,
    ) -> SessionResult<(Self, mpsc::UnboundedReceiver<ServerEvent>)> {
        info!("🚀 Connecting to {}", config.endpoint);

        let mut request = config
            .endpoint
            .clone()
            .into_client_request()
            .map_err(|e| SessionError::Connection(format!("bad endpoint: {}", e)))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| SessionError::Config(format!("invalid key: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws, _resp) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        info!("✅ Transport open");

        let (mut ws_sink, mut ws_stream) = ws.split();

        ws_sink
            .send(Message::Text(setup_frame(&config)))
            .await
            .map_err(|e| SessionError::Connection(format!("setup frame: {}", e)))?;

        let open = Arc::new(AtomicBool::new(true));

        // Writer: drains the outbound queue in send order.
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let writer_open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(out) = outbound_rx.recv().await {
                match out.to_frame() {
                    Some(frame) => {
                        if let Err(e) = ws_sink.send(Message::Text(frame)).await {
                            warn!("Outbound send failed: {}", e);
                            writer_open.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    None => {
                        let _ = ws_sink.close().await;
                        break;
                    }
                }
            }
        });

        // Reader: one typed event per frame, in arrival order.
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let reader_open = Arc::clone(&open);
        tokio::spawn(async move {
            loop {
                match ws_stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let event = parse_server_event(&text);
                        if let ServerEvent::Unknown(ref what) = event {
                            debug!("Ignoring unrecognized event: {}", what);
                        }
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(ServerEvent::Closed);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(ServerEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                config,
                outbound_tx,
                open,
                started_at: Utc::now(),
            },
            event_rx,
        ))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Clone of the outbound queue, for callers that acknowledge tool
    /// invocations as part of event dispatch.
    pub fn outbound(&self) -> mpsc::UnboundedSender<Outbound> {
        self.outbound_tx.clone()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Forward one captured chunk. Fire-and-forget; a no-op once closed.
    pub fn send_audio(&self, chunk: &AudioChunk) {
        if !self.is_open() {
            return;
        }
        let encoded = codec::encode_for_transport(&chunk.samples);
        let _ = self.outbound_tx.send(Outbound::Audio(encoded));
    }

    /// Acknowledge one tool invocation. Queued before the dispatcher moves
    /// on to the next inbound event.
    pub fn ack_tool(&self, id: &str) {
        let _ = self.outbound_tx.send(Outbound::ToolAck { id: id.to_string() });
    }

    /// Release the transport. Idempotent.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound_tx.send(Outbound::Close);
            info!("🛑 Session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
