//! Transcript accumulation for the two speech channels.
//!
//! Fragments arrive as deltas mid-turn and are mirrored into the display
//! transcripts immediately so partial text is visible while someone speaks.
//! On turn completion the pending accumulators are sealed with a separator
//! and cleared, ready for the next turn's first fragment.

/// Append-only accumulators for user and character speech.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    pending_user: String,
    pending_character: String,
    display_user: String,
    display_character: String,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment of user speech. Visible in the display immediately.
    pub fn append_user(&mut self, fragment: &str) {
        self.pending_user.push_str(fragment);
        self.display_user.push_str(fragment);
    }

    /// Append a fragment of character speech. Visible in the display immediately.
    pub fn append_character(&mut self, fragment: &str) {
        self.pending_character.push_str(fragment);
        self.display_character.push_str(fragment);
    }

    /// Seal the current turn: one trailing separator on each display
    /// transcript, both pending accumulators cleared.
    pub fn complete_turn(&mut self) {
        self.display_user.push(' ');
        self.display_character.push(' ');
        self.pending_user.clear();
        self.pending_character.clear();
    }

    /// Whether any user speech has accumulated this turn.
    pub fn has_pending_user(&self) -> bool {
        !self.pending_user.is_empty()
    }

    pub fn display_user(&self) -> &str {
        &self.display_user
    }

    pub fn display_character(&self) -> &str {
        &self.display_character
    }

    /// Reset everything, for teardown.
    pub fn clear(&mut self) {
        self.pending_user.clear();
        self.pending_character.clear();
        self.display_user.clear();
        self.display_character.clear();
    }
}
