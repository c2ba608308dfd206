//! Error types for the voice session orchestrator

use thiserror::Error;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur in the voice session orchestrator
#[derive(Error, Debug)]
pub enum SessionError {
    /// Missing or invalid credential/configuration. Fatal to the start attempt.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Microphone unavailable or access denied. Fatal to the start attempt.
    #[error("Media access error: {0}")]
    MediaAccess(String),

    /// Transport could not open or dropped. Returns the session to idle.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed transport payload. The offending unit is dropped.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A buffer failed to decode or play. Dropped, playback continues.
    #[error("Playback error: {0}")]
    Playback(String),

    /// Unexpected inbound event shape. Ignored, processing continues.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for SessionError {
    fn from(err: cpal::DevicesError) -> Self {
        SessionError::MediaAccess(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for SessionError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        SessionError::MediaAccess(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for SessionError {
    fn from(err: cpal::BuildStreamError) -> Self {
        SessionError::MediaAccess(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for SessionError {
    fn from(err: cpal::PlayStreamError) -> Self {
        SessionError::MediaAccess(err.to_string())
    }
}
