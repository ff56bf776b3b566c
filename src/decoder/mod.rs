//! Decoder module for codec-pump
//!
//! This module defines the capability interfaces the pump consumes: the
//! demuxer that yields compressed samples, the decoder that turns them into
//! output buffers, and the opaque render target the decoder writes into.
//! Container parsing and the codec itself live behind these traits.

mod stream_info;
pub mod synthetic;

pub use stream_info::{select_decodable_track, SelectedTrack};

use crate::utils::error::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Demuxer over one opened media container
///
/// Track discovery (`track_count`, `track_format`, `select_track`) is used
/// once at session construction. The sample methods are driven by the pump
/// thread, one sample per decode step.
#[cfg_attr(test, mockall::automock)]
pub trait Demuxer: Send {
    /// Number of tracks in the container
    fn track_count(&self) -> usize;

    /// Format of the track at `index`, if it exists
    fn track_format(&self, index: usize) -> Option<TrackFormat>;

    /// Restrict sample reads to the track at `index`
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Copy the current sample into `buf`
    ///
    /// Returns the number of bytes written, or `None` once the selected
    /// track has no more samples. Does not move to the next sample.
    fn read_sample(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Presentation time of the current sample in microseconds
    ///
    /// Only meaningful right after a successful `read_sample`.
    fn sample_time_us(&self) -> i64;

    /// Move to the next sample. Returns false when there is none.
    fn advance(&mut self) -> bool;

    /// Reposition at the first sync sample at or after the start of the stream
    fn seek_to_start(&mut self) -> Result<()>;
}

/// Decoder with slot-based input and output queues
pub trait Decoder: Send {
    /// Configure the decoder for a track, optionally bound to a render target
    fn configure(
        &mut self,
        format: &TrackFormat,
        target: Option<Arc<dyn RenderTarget>>,
    ) -> Result<()>;

    /// Begin accepting input
    fn start(&mut self) -> Result<()>;

    /// Wait up to `timeout` for a free input slot
    fn dequeue_input_slot(&mut self, timeout: Duration) -> Option<usize>;

    /// Writable region of a dequeued input slot
    fn input_buffer(&mut self, slot: usize) -> &mut [u8];

    /// Hand a filled input slot back to the decoder
    fn submit_input(
        &mut self,
        slot: usize,
        len: usize,
        pts_us: i64,
        end_of_stream: bool,
    ) -> Result<()>;

    /// Wait up to `timeout` for decoded output
    fn dequeue_output(&mut self, timeout: Duration) -> OutputStatus;

    /// Return an output buffer, rendering it to the target when `render` is set
    fn release_output(&mut self, slot: usize, render: bool) -> Result<()>;

    /// Swap the output render target
    fn set_render_target(&mut self, target: Arc<dyn RenderTarget>) -> Result<()>;

    /// Discard all queued input and pending output
    fn flush(&mut self) -> Result<()>;

    /// Stop decoding. Resources are released when the decoder is dropped.
    fn stop(&mut self) -> Result<()>;
}

/// Creates decoders by track type
pub trait DecoderFactory: Send + Sync {
    /// Create an unconfigured decoder able to handle `format`
    fn create_decoder(&self, format: &TrackFormat) -> Result<Box<dyn Decoder>>;
}

/// A platform media stack: opens streams and creates decoders for them
pub trait MediaBackend: DecoderFactory {
    /// Open the stream identified by `source`
    fn open_stream(&self, source: &str) -> Result<Box<dyn Demuxer>>;
}

/// Opaque sink the decoder renders into
///
/// Supplied by the embedder and only passed through to decoder
/// configuration; the pump never calls into it.
pub trait RenderTarget: Send + Sync + fmt::Debug {
    /// Accept one rendered frame
    fn present(&self, frame: RenderedFrame);
}

/// Frame handed to a render target by a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedFrame {
    /// Presentation timestamp in microseconds
    pub pts_us: i64,

    /// Decoded payload size in bytes
    pub size: usize,
}

/// Track format as reported by the demuxer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackFormat {
    /// MIME type, e.g. "video/avc"
    pub mime: Option<String>,

    /// Frame width for video tracks
    pub width: u32,

    /// Frame height for video tracks
    pub height: u32,

    /// Track duration in microseconds, if known
    pub duration_us: Option<i64>,

    /// Largest sample the track carries, if known
    pub max_input_size: Option<usize>,
}

impl TrackFormat {
    /// Build a video track format
    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        Self {
            mime: Some(mime.to_string()),
            width,
            height,
            ..Self::default()
        }
    }

    /// Build an audio track format
    pub fn audio(mime: &str) -> Self {
        Self {
            mime: Some(mime.to_string()),
            ..Self::default()
        }
    }

    /// Whether this track's MIME type starts with `prefix`
    pub fn matches(&self, prefix: &str) -> bool {
        self.mime.as_deref().is_some_and(|m| m.starts_with(prefix))
    }
}

impl fmt::Display for TrackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mime: {}", self.mime.as_deref().unwrap_or("<none>"))?;
        if self.width > 0 && self.height > 0 {
            write!(f, ", {}x{}", self.width, self.height)?;
        }
        if let Some(duration_us) = self.duration_us {
            write!(f, ", duration: {}us", duration_us)?;
        }
        if let Some(max_input_size) = self.max_input_size {
            write!(f, ", max-input-size: {}", max_input_size)?;
        }
        Ok(())
    }
}

/// Decoded output buffer metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBuffer {
    /// Output slot to release
    pub slot: usize,

    /// Presentation timestamp in microseconds
    pub pts_us: i64,

    /// Payload size in bytes; zero means nothing to render
    pub size: usize,

    /// Last buffer of the stream
    pub end_of_stream: bool,
}

/// Result of polling the decoder for output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus {
    /// A decoded buffer is ready
    Buffer(OutputBuffer),

    /// The output format changed
    FormatChanged(TrackFormat),

    /// No output available yet
    TryAgainLater,

    /// The set of output buffers changed
    BuffersChanged,

    /// Platform-specific status code
    Other(i32),
}
