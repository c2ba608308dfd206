//! Gapless playback scheduling for synthesized speech.
//!
//! Two halves: `PlaybackScheduler` is the pure bookkeeping core that assigns
//! back-to-back start times and tracks in-flight units in an id-keyed arena,
//! and `RodioPlayback` is the device half that actually queues decoded
//! buffers on a `rodio::Sink`. The split keeps the ordering guarantees
//! testable without audio hardware.

use crate::error::{SessionError, SessionResult};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// One decoded, scheduled block of synthesized audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackUnit {
    /// Identity token, unique per scheduler for its lifetime.
    pub id: u64,
    /// Scheduled start in the output device's time domain.
    pub start: Duration,
    pub duration: Duration,
}

/// Assigns gapless, non-overlapping start times to arriving buffers.
///
/// `next_start` is monotonically non-decreasing except on an explicit
/// interruption reset, which discards the queued schedule and returns the
/// clock to the device-time origin.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start: Duration,
    next_id: u64,
    active: HashMap<u64, PlaybackUnit>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a buffer of the given duration, arriving at device time `now`.
    ///
    /// The unit starts at `max(next_start, now)` so buffers never overlap and
    /// never leave a gap when they arrive on time.
    pub fn schedule(&mut self, duration: Duration, now: Duration) -> PlaybackUnit {
        let start = self.next_start.max(now);
        self.next_start = start + duration;
        let id = self.next_id;
        self.next_id += 1;
        let unit = PlaybackUnit {
            id,
            start,
            duration,
        };
        self.active.insert(id, unit);
        unit
    }

    /// Remove a unit whose playback ended. Returns true when the active set
    /// drained with this removal.
    pub fn complete(&mut self, id: u64) -> bool {
        self.active.remove(&id);
        self.active.is_empty()
    }

    /// Remove every unit at once, after the device reported its queue empty.
    /// Unlike `interrupt`, the clock keeps its position.
    pub fn complete_all(&mut self) {
        self.active.clear();
    }

    /// Interruption flush: drop every in-flight unit and reset the clock to
    /// the device-time origin.
    pub fn interrupt(&mut self) {
        let dropped = self.active.len();
        self.active.clear();
        self.next_start = Duration::ZERO;
        if dropped > 0 {
            info!("⚡ Playback interrupted: {} unit(s) flushed", dropped);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_drained(&self) -> bool {
        self.active.is_empty()
    }

    pub fn next_start(&self) -> Duration {
        self.next_start
    }
}

/// Device output seam. The real implementation wraps rodio; tests substitute
/// a recorder so the orchestration loop can run without hardware.
pub trait PlaybackOut {
    /// Queue one decoded buffer for playback. A buffer that fails to play
    /// is dropped with a `Playback` error; the caller logs and continues.
    fn play(&mut self, buffer: SamplesBuffer<i16>) -> SessionResult<()>;

    /// Stop everything queued, immediately. Idempotent.
    fn stop(&mut self);

    /// Whether any queued samples remain (playing or pending).
    fn is_playing(&self) -> bool;
}

/// Device playback on the default output via rodio. Not `Send` on every
/// platform; keep it on the conversation thread.
pub struct RodioPlayback {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Sink,
}

impl RodioPlayback {
    pub fn new() -> SessionResult<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| SessionError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| SessionError::Playback(e.to_string()))?;
        info!("🔊 Playback sink ready");
        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
        })
    }
}

impl PlaybackOut for RodioPlayback {
    fn play(&mut self, buffer: SamplesBuffer<i16>) -> SessionResult<()> {
        // Sink order is arrival order; appended buffers play back-to-back.
        self.sink.append(buffer);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.stop();
    }

    fn is_playing(&self) -> bool {
        !self.sink.empty()
    }
}

/// Discards all audio; used where no output device is wanted (tests, CI).
#[derive(Debug, Default)]
pub struct NullPlayback {
    queued: usize,
}

impl PlaybackOut for NullPlayback {
    fn play(&mut self, _buffer: SamplesBuffer<i16>) -> SessionResult<()> {
        self.queued += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.queued = 0;
    }

    fn is_playing(&self) -> bool {
        false
    }
}
