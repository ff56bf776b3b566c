//! Shared fixtures for the session integration tests
//!
//! Provides a synthetic backend preloaded with test clips, a recording
//! render target and helpers for waiting on session events.

#![allow(dead_code)]

use anyhow::{Context, Result};
use codec_pump::decoder::synthetic::{
    RecordingTarget, SyntheticBackend, SyntheticDecoderConfig, SyntheticSample, SyntheticStream,
};
use codec_pump::decoder::{MediaBackend, TrackFormat};
use codec_pump::{PumpConfig, Session, SessionBuilder, SessionEvent};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Audio track first, video track second
pub const TWO_TRACK_CLIP: &str = "two-track";

/// Five video frames, 1ms apart
pub const SHORT_CLIP: &str = "short";

/// Sixty video frames, 2ms apart
pub const LONG_CLIP: &str = "long";

/// Audio only
pub const AUDIO_CLIP: &str = "audio-only";

/// Four video frames, one stamped absurdly far in the future
pub const FAR_PTS_CLIP: &str = "far-pts";

pub const FAR_PTS: [i64; 4] = [0, 1_000, i64::MAX / 2, 3_000];

pub const SHORT_CLIP_FRAMES: usize = 5;

/// Generous bound for anything the worker should do promptly
pub const PATIENCE: Duration = Duration::from_secs(5);

/// Test fixture for integration tests
pub struct TestFixture {
    pub backend: Arc<SyntheticBackend>,
    pub target: Arc<RecordingTarget>,
}

impl TestFixture {
    /// Create a fixture with the default decoder
    pub fn new() -> Self {
        Self::with_decoder_config(SyntheticDecoderConfig::default())
    }

    /// Create a fixture whose decoders use `config`
    pub fn with_decoder_config(config: SyntheticDecoderConfig) -> Self {
        init_logging();

        let backend = SyntheticBackend::new(config);
        backend.register(
            TWO_TRACK_CLIP,
            SyntheticStream::new()
                .with_audio_track("audio/mp4a-latm", 30, 2_000)
                .with_video_track("video/avc", 30, 2_000),
        );
        backend.register(
            SHORT_CLIP,
            SyntheticStream::new().with_video_track("video/avc", SHORT_CLIP_FRAMES, 1_000),
        );
        backend.register(
            LONG_CLIP,
            SyntheticStream::new().with_video_track("video/avc", 60, 2_000),
        );
        backend.register(
            AUDIO_CLIP,
            SyntheticStream::new().with_audio_track("audio/opus", 10, 20_000),
        );
        let samples = FAR_PTS
            .iter()
            .map(|&pts_us| SyntheticSample {
                pts_us,
                data: vec![1; 512],
            })
            .collect();
        backend.register(
            FAR_PTS_CLIP,
            SyntheticStream::new().with_track(TrackFormat::video("video/avc", 320, 240), samples),
        );

        Self {
            backend: Arc::new(backend),
            target: Arc::new(RecordingTarget::new()),
        }
    }

    /// Build a started session on `source`, with its event stream
    pub fn session(&self, source: &str) -> Result<(Session, Receiver<SessionEvent>)> {
        let (tx, rx) = crossbeam_channel::unbounded::<SessionEvent>();
        let demuxer = self.backend.open_stream(source)?;
        let session = SessionBuilder::new(demuxer, &*self.backend)
            .with_config(PumpConfig::default())
            .with_render_target(self.target.clone())
            .with_event_handler(Box::new(tx))
            .build()?;
        Ok((session, rx))
    }
}

/// Collect events until one matches `predicate`; the match is the last element
pub fn wait_for_event<F>(
    events: &Receiver<SessionEvent>,
    predicate: F,
) -> Result<Vec<SessionEvent>>
where
    F: Fn(&SessionEvent) -> bool,
{
    let deadline = Instant::now() + PATIENCE;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(remaining)
            .with_context(|| format!("timed out, saw {:?}", seen))?;
        let matched = predicate(&event);
        seen.push(event);
        if matched {
            return Ok(seen);
        }
    }
}

/// Drain whatever events are already queued
pub fn drain_events(events: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
    events.try_iter().collect()
}

pub fn is_frame(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::FrameRendered { .. })
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
