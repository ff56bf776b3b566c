//! Player module for codec-pump
//!
//! This module holds the per-session pump: the state owned by the worker
//! thread, the decode step that moves samples through the decoder, the
//! control handlers, and the caller-facing session handle and registry.

mod controller;
mod decode_step;
mod media_player;
mod registry;
mod state;

pub use controller::{Pump, PumpMessage};
pub use decode_step::{run_step, StepReport, StepTiming};
pub use media_player::{Session, SessionBuilder};
pub use registry::SessionRegistry;
pub use state::{PlaybackCounters, PumpState, SessionSnapshot};

use crossbeam_channel::Sender;
use serde::Serialize;
use std::fmt;

/// Identifier handed out by the session registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Control state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PlaybackState {
    /// Built but not started
    #[default]
    Idle,

    /// Decoding and presenting frames
    Running,

    /// Started but not playing
    Paused,

    /// Shut down; terminal
    ShuttingDown,
}

/// Session event for external event handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Decoder started and the first step was posted
    Started,

    /// A decoded frame was released for rendering
    FrameRendered { pts_us: i64 },

    /// The end-of-stream buffer was submitted to the decoder
    InputExhausted,

    /// The decoder emitted its end-of-stream buffer
    OutputExhausted,

    /// Playback resumed
    Resumed,

    /// Playback paused
    Paused,

    /// The pause flushed all queued work
    PauseAcknowledged,

    /// Repositioned at the start of the stream
    Seeked,

    /// The decoder was bound to a new render target
    RenderTargetChanged,

    /// A failure absorbed by the worker
    Error { message: String },

    /// Decoder and demuxer released, worker stopping
    ShutDown,
}

/// Session event handler trait
///
/// Called on the worker thread after the state snapshot for the dispatch
/// that produced the event has been published.
pub trait SessionEventHandler: Send {
    /// Handle session event
    fn handle_event(&mut self, event: SessionEvent);
}

impl SessionEventHandler for Sender<SessionEvent> {
    fn handle_event(&mut self, event: SessionEvent) {
        // Receiver may be gone; events are advisory
        let _ = self.send(event);
    }
}

/// Playback statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    /// Decode steps executed
    pub steps: u64,

    /// Samples submitted to the decoder, end-of-stream excluded
    pub samples_queued: u64,

    /// Output buffers released
    pub frames_released: u64,

    /// Output buffers released with render set
    pub frames_rendered: u64,
}
