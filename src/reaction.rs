//! The character's expressive state, set only by remote tool invocations.

use std::fmt;

/// Closed set of expressive states the remote service may request.
///
/// Consumed by the external renderer and sound-effect player; defaults to
/// `Idle` at session start and on every teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reaction {
    #[default]
    Idle,
    Mimicking,
    Smart,
    Laughing,
    Thinking,
    Surprised,
    Sad,
}

impl Reaction {
    /// Parse a wire-level reaction name. Unrecognized names yield `None`
    /// so the caller can ignore them rather than propagate untyped values.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "idle" => Some(Reaction::Idle),
            "mimicking" => Some(Reaction::Mimicking),
            "smart" => Some(Reaction::Smart),
            "laughing" => Some(Reaction::Laughing),
            "thinking" => Some(Reaction::Thinking),
            "surprised" => Some(Reaction::Surprised),
            "sad" => Some(Reaction::Sad),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::Idle => "idle",
            Reaction::Mimicking => "mimicking",
            Reaction::Smart => "smart",
            Reaction::Laughing => "laughing",
            Reaction::Thinking => "thinking",
            Reaction::Surprised => "surprised",
            Reaction::Sad => "sad",
        }
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
