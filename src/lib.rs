//! # Companion Voice — Real-Time Voice Session Orchestration
//!
//! Real-time, duplex voice conversation with a simulated character, backed
//! by a remote conversational-AI service. This crate owns the bidirectional
//! audio pipeline, the session lifecycle, transcript accumulation, and the
//! conversation state machine; rendering and sound effects are external
//! observers of the published snapshot stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Voice Session Manager                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │   Mic In     │→ │   Session    │→ │  Dispatcher  │       │
//! │  │   (cpal)     │  │ (WebSocket)  │  │ (state/turns)│       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │         ↓                                      ↓              │
//! │  ┌──────────────┐                    ┌──────────────┐       │
//! │  │  Playback    │←───────────────────│ Interruption │       │
//! │  │   (rodio)    │    Flush Signal    │   Handling   │       │
//! │  └──────────────┘                    └──────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod codec;
pub mod error;
pub mod greeting;
pub mod orchestrator;
pub mod playback;
pub mod protocol;
pub mod reaction;
pub mod state;
pub mod transcript;

pub use capture::{AudioChunk, CaptureConfig, MicCapture};
pub use error::{SessionError, SessionResult};
pub use orchestrator::{
    ConversationMode, Dispatcher, Flow, Identity, VoiceSessionManager,
};
pub use playback::{NullPlayback, PlaybackOut, PlaybackScheduler, PlaybackUnit, RodioPlayback};
pub use protocol::{parse_server_event, Outbound, ServerEvent, Session, SessionConfig, API_KEY_ENV};
pub use reaction::Reaction;
pub use state::{
    ConversationState, ConversationStateMachine, Snapshot, SnapshotPublisher, StateEvent,
};
pub use transcript::TranscriptBuffer;
