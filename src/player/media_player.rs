//! Session handle and builder
//!
//! A [`Session`] is one playback attempt: one selected track, one decoder,
//! one worker thread. The builder does everything that can fail before the
//! worker is spawned, so creation errors are reported synchronously.

use crate::decoder::{
    select_decodable_track, DecoderFactory, Demuxer, RenderTarget, SelectedTrack,
};
use crate::player::controller::{Pump, PumpMessage};
use crate::player::decode_step::StepTiming;
use crate::player::{
    PlaybackCounters, PlaybackState, PlaybackStats, SessionEventHandler, SessionId,
    SessionSnapshot,
};
use crate::scheduler::Scheduler;
use crate::utils::config::PumpConfig;
use crate::utils::error::{PumpError, Result};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Builder for a [`Session`]
pub struct SessionBuilder<'a> {
    id: SessionId,
    demuxer: Box<dyn Demuxer>,
    factory: &'a dyn DecoderFactory,
    config: PumpConfig,
    render_target: Option<Arc<dyn RenderTarget>>,
    event_handlers: Vec<Box<dyn SessionEventHandler>>,
}

impl<'a> SessionBuilder<'a> {
    /// Create a builder over an opened demuxer
    pub fn new(demuxer: Box<dyn Demuxer>, factory: &'a dyn DecoderFactory) -> Self {
        Self {
            id: SessionId(0),
            demuxer,
            factory,
            config: PumpConfig::default(),
            render_target: None,
            event_handlers: Vec::new(),
        }
    }

    /// Set the id used in logs and by the registry
    pub fn with_id(mut self, id: SessionId) -> Self {
        self.id = id;
        self
    }

    /// Set pump configuration
    pub fn with_config(mut self, config: PumpConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the initial render target
    pub fn with_render_target(mut self, target: Arc<dyn RenderTarget>) -> Self {
        self.render_target = Some(target);
        self
    }

    /// Add an event handler
    pub fn with_event_handler(mut self, handler: Box<dyn SessionEventHandler>) -> Self {
        self.event_handlers.push(handler);
        self
    }

    /// Select the track, create, configure and start the decoder, then start
    /// the worker
    ///
    /// The session is started and paused on its first frame when this returns.
    pub fn build(mut self) -> Result<Session> {
        self.config.validate()?;

        let prefix = &self.config.decodable_mime_prefix;
        let track = select_decodable_track(self.demuxer.as_mut(), prefix)
            .inspect_err(|e| error!("{}: track selection failed: {}", self.id, e))?;

        let mut decoder = self
            .factory
            .create_decoder(&track.format)
            .map_err(as_config_error)
            .inspect_err(|e| error!("{}: {}", self.id, e))?;
        decoder
            .configure(&track.format, self.render_target.clone())
            .map_err(as_config_error)
            .inspect_err(|e| error!("{}: {}", self.id, e))?;

        let timing = StepTiming::from_config(&self.config);
        let mut pump = Pump::new(self.id, self.demuxer, decoder, timing);
        pump
            .start_decoder()
            .map_err(as_config_error)
            .inspect_err(|e| error!("{}: failed to start decoder: {}", self.id, e))?;
        for handler in self.event_handlers {
            pump.add_event_handler(handler);
        }
        let snapshot = pump.snapshot_handle();
        let counters = pump.counters();

        let scheduler = Scheduler::spawn(&self.config.worker_thread_name, pump)?;
        scheduler.post(PumpMessage::Start);
        info!("{}: created for track {} ({})", self.id, track.index, track.format);

        Ok(Session {
            id: self.id,
            track,
            scheduler,
            snapshot,
            counters,
        })
    }
}

fn as_config_error(err: PumpError) -> PumpError {
    match err {
        PumpError::DecoderConfig(_) => err,
        other => PumpError::DecoderConfig(other.to_string()),
    }
}

/// Handle to a running session
///
/// Control methods only enqueue; they never wait for the worker. Calls made
/// after shutdown are ignored.
pub struct Session {
    id: SessionId,
    track: SelectedTrack,
    scheduler: Scheduler<PumpMessage>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
    counters: Arc<PlaybackCounters>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The track being decoded
    pub fn track(&self) -> &SelectedTrack {
        &self.track
    }

    /// Resume when `playing`, pause otherwise
    pub fn set_playing(&self, playing: bool) {
        if playing {
            self.resume();
        } else {
            self.pause();
        }
    }

    pub fn resume(&self) {
        self.post(PumpMessage::Resume);
    }

    pub fn pause(&self) {
        self.post(PumpMessage::Pause);
    }

    /// Seek to the start of the stream
    pub fn seek(&self) {
        self.post(PumpMessage::Seek);
    }

    /// Bind the decoder to a different render target
    pub fn set_render_target(&self, target: Arc<dyn RenderTarget>) {
        self.post(PumpMessage::SetRenderTarget(target));
    }

    fn post(&self, message: PumpMessage) {
        if !self.scheduler.post(message) {
            debug!("{}: worker stopped, message dropped", self.id);
        }
    }

    /// State published after the last dispatch
    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.lock()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.snapshot().playback
    }

    pub fn stats(&self) -> PlaybackStats {
        self.counters.snapshot()
    }

    /// Poll the published snapshot until `predicate` holds or `timeout` passes
    pub fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.snapshot()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Whether the worker has been joined
    pub fn is_shut_down(&self) -> bool {
        self.scheduler.is_joined()
    }

    /// Release decoder and demuxer, then join the worker
    ///
    /// Shutdown is flush-posted, so queued steps are discarded. Idempotent.
    pub fn shutdown(&mut self) {
        if self.scheduler.is_joined() {
            return;
        }
        self.scheduler.post_flush(PumpMessage::Shutdown);
        self.scheduler.join();
        info!("{}: worker joined", self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::synthetic::{RecordingTarget, SyntheticBackend, SyntheticStream};
    use crate::decoder::MediaBackend;

    fn backend() -> SyntheticBackend {
        let backend = SyntheticBackend::default();
        backend.register(
            "clip",
            SyntheticStream::new()
                .with_audio_track("audio/mp4a-latm", 10, 20_000)
                .with_video_track("video/avc", 10, 1_000),
        );
        backend.register(
            "audio-only",
            SyntheticStream::new().with_audio_track("audio/opus", 3, 20_000),
        );
        backend
    }

    #[test]
    fn test_build_starts_paused_on_first_frame() {
        let backend = backend();
        let target = Arc::new(RecordingTarget::new());
        let mut session = SessionBuilder::new(backend.open_stream("clip").unwrap(), &backend)
            .with_id(SessionId(5))
            .with_render_target(target.clone())
            .build()
            .unwrap();

        assert_eq!(session.track().index, 1);
        assert!(session.wait_until(Duration::from_secs(2), |s| !s.pump.render_once
            && s.playback == PlaybackState::Paused));
        assert_eq!(target.pts_list(), vec![0]);

        session.shutdown();
        assert!(session.is_shut_down());
        assert_eq!(session.playback_state(), PlaybackState::ShuttingDown);
        session.shutdown();
    }

    #[test]
    fn test_build_without_video_track() {
        let backend = backend();
        let err = SessionBuilder::new(backend.open_stream("audio-only").unwrap(), &backend)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PumpError::NoDecodableTrack));
        assert_eq!(err.code(), -2);
    }

    #[test]
    fn test_build_with_rejected_decoder() {
        let backend = backend().with_supported_mime_prefixes(&["video/hevc"]);
        let err = SessionBuilder::new(backend.open_stream("clip").unwrap(), &backend)
            .build()
            .err()
            .unwrap();
        assert_eq!(err.code(), -3);
    }

    #[test]
    fn test_build_with_decoder_that_will_not_start() {
        let backend = SyntheticBackend::new(crate::decoder::synthetic::SyntheticDecoderConfig {
            fail_start: true,
            ..Default::default()
        });
        backend.register("clip", SyntheticStream::new().with_video_track("video/avc", 3, 1_000));

        let err = SessionBuilder::new(backend.open_stream("clip").unwrap(), &backend)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PumpError::DecoderConfig(_)));
        assert_eq!(err.code(), -3);
        let probe = backend.last_probe().unwrap();
        assert!(probe.destroyed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let backend = backend();
        let config = PumpConfig {
            input_slot_timeout_us: 0,
            ..PumpConfig::default()
        };
        let result = SessionBuilder::new(backend.open_stream("clip").unwrap(), &backend)
            .with_config(config)
            .build();
        assert!(matches!(result, Err(PumpError::Config(_))));
    }

    #[test]
    fn test_drop_shuts_down() {
        let backend = backend();
        let session = SessionBuilder::new(backend.open_stream("clip").unwrap(), &backend)
            .build()
            .unwrap();
        session.resume();
        let probe = backend.last_probe().unwrap();
        drop(session);

        assert!(probe.stopped.load(std::sync::atomic::Ordering::SeqCst));
        assert!(probe.destroyed.load(std::sync::atomic::Ordering::SeqCst));
    }
}
