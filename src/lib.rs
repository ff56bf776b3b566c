//! codec-pump: a real-time decode pump
//!
//! Drives a slot-based video decoder from a dedicated worker thread: samples
//! go from a demuxer into decoder input slots, decoded output is released at
//! its presentation time, and pause, resume, seek and shutdown are applied
//! between steps without racing the decode loop.
//!
//! The demuxer, the decoder and the render target are collaborators behind
//! the traits in [`decoder`]; [`decoder::synthetic`] provides an in-memory
//! implementation of all three.

pub mod decoder;
pub mod player;
pub mod scheduler;
pub mod utils;

pub use decoder::{Decoder, DecoderFactory, Demuxer, MediaBackend, RenderTarget};
pub use player::{
    PlaybackState, PlaybackStats, Session, SessionBuilder, SessionEvent, SessionEventHandler,
    SessionId, SessionRegistry, SessionSnapshot,
};
pub use utils::{Config, PumpConfig, PumpError, Result};
