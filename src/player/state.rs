//! Pump state and statistics tracking
//!
//! `PumpState` is owned by the worker thread. Callers only ever see copies of
//! it through a [`SessionSnapshot`], and read counters through
//! [`PlaybackCounters`].

use crate::player::{PlaybackState, PlaybackStats};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session pump flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpState {
    /// End-of-stream has been submitted to the decoder
    pub input_exhausted: bool,

    /// The decoder has emitted its end-of-stream buffer
    pub output_exhausted: bool,

    /// Playback is running
    pub is_playing: bool,

    /// Render a single frame and stop stepping
    pub render_once: bool,

    /// Monotonic time (ns) corresponding to presentation time zero
    pub render_anchor_ns: Option<i64>,
}

impl PumpState {
    /// State a session starts in: paused, ready to present one frame
    pub fn initial() -> Self {
        Self {
            render_once: true,
            ..Self::default()
        }
    }

    /// Whether the decode step still has input or output to move
    pub fn has_pending_work(&self) -> bool {
        !self.input_exhausted || !self.output_exhausted
    }

    /// Whether another decode step should be queued: work is left and either
    /// playback runs or the single-frame paint is still owed
    pub fn should_step(&self) -> bool {
        self.has_pending_work() && (self.is_playing || self.render_once)
    }

    /// Reposition at stream start: clear the anchor and both exhaustion flags
    pub fn reset_for_seek(&mut self) {
        self.render_anchor_ns = None;
        self.input_exhausted = false;
        self.output_exhausted = false;
    }
}

/// Read-only view of a session published after every dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Derived control state
    pub playback: PlaybackState,

    /// Pump flags at the end of the last dispatch
    pub pump: PumpState,
}

/// Statistics counters shared between the worker and callers
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    steps: AtomicU64,
    samples_queued: AtomicU64,
    frames_released: AtomicU64,
    frames_rendered: AtomicU64,
}

impl PlaybackCounters {
    pub fn record_step(&self) {
        self.steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample(&self) {
        self.samples_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self, rendered: bool) {
        self.frames_released.fetch_add(1, Ordering::Relaxed);
        if rendered {
            self.frames_rendered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current counter values
    pub fn snapshot(&self) -> PlaybackStats {
        PlaybackStats {
            steps: self.steps.load(Ordering::Relaxed),
            samples_queued: self.samples_queued.load(Ordering::Relaxed),
            frames_released: self.frames_released.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
        }
    }
}
