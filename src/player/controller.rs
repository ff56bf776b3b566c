//! Pump controller for codec-pump
//!
//! The [`Pump`] is the handler the session's worker thread dispatches to. It
//! owns the demuxer, the decoder and the pump state, validates each control
//! message against that state, and keeps the decode step chain going by
//! re-posting `CodecBuffer` while there is work left.

use crate::decoder::{Decoder, Demuxer, RenderTarget};
use crate::player::decode_step::{run_step, StepTiming};
use crate::player::{
    PlaybackCounters, PlaybackState, PumpState, SessionEvent, SessionEventHandler, SessionId,
    SessionSnapshot,
};
use crate::scheduler::{Handler, TaskQueue};
use crate::utils::error::{PumpError, Result};
use crate::utils::format_pts;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Messages dispatched to the pump
#[derive(Debug, Clone)]
pub enum PumpMessage {
    /// Run one decode step
    CodecBuffer,

    /// Start the decoder and present the first frame
    Start,

    /// Start playing
    Resume,

    /// Stop playing; flush-posts `PauseAck`
    Pause,

    /// Marks that queued steps were discarded by a pause
    PauseAck,

    /// Reposition at the start of the stream
    Seek,

    /// Bind the decoder to a new render target
    SetRenderTarget(Arc<dyn RenderTarget>),

    /// Release decoder and demuxer and stop the worker
    Shutdown,
}

/// Per-session message handler
pub struct Pump {
    id: SessionId,
    demuxer: Option<Box<dyn Demuxer>>,
    decoder: Option<Box<dyn Decoder>>,
    state: PumpState,
    decoder_started: bool,
    started: bool,
    shut_down: bool,
    timing: StepTiming,

    snapshot: Arc<Mutex<SessionSnapshot>>,
    counters: Arc<PlaybackCounters>,
    event_handlers: Vec<Box<dyn SessionEventHandler>>,
    pending_events: Vec<SessionEvent>,
}

impl Pump {
    /// Create a pump over a track-selected demuxer and a configured decoder
    pub fn new(
        id: SessionId,
        demuxer: Box<dyn Demuxer>,
        decoder: Box<dyn Decoder>,
        timing: StepTiming,
    ) -> Self {
        Self {
            id,
            demuxer: Some(demuxer),
            decoder: Some(decoder),
            state: PumpState::default(),
            decoder_started: false,
            started: false,
            shut_down: false,
            timing,
            snapshot: Arc::new(Mutex::new(SessionSnapshot::default())),
            counters: Arc::new(PlaybackCounters::default()),
            event_handlers: Vec::new(),
            pending_events: Vec::new(),
        }
    }

    /// Register an event handler
    pub fn add_event_handler(&mut self, handler: Box<dyn SessionEventHandler>) {
        self.event_handlers.push(handler);
    }

    /// Shared snapshot cell updated after every dispatch
    pub fn snapshot_handle(&self) -> Arc<Mutex<SessionSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    /// Shared statistics counters
    pub fn counters(&self) -> Arc<PlaybackCounters> {
        Arc::clone(&self.counters)
    }

    /// Current pump flags
    pub fn state(&self) -> &PumpState {
        &self.state
    }

    /// Start the decoder unless it is already running
    ///
    /// Called by the session builder so a codec that refuses to start is a
    /// creation error; `Start` only starts it if that did not happen.
    pub fn start_decoder(&mut self) -> Result<()> {
        if self.decoder_started {
            return Ok(());
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(PumpError::decoder_error("decoder already released"));
        };
        decoder.start()?;
        self.decoder_started = true;
        Ok(())
    }

    /// Control state derived from the pump flags
    pub fn playback_state(&self) -> PlaybackState {
        if self.shut_down {
            PlaybackState::ShuttingDown
        } else if !self.started {
            PlaybackState::Idle
        } else if self.state.is_playing {
            PlaybackState::Running
        } else {
            PlaybackState::Paused
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        self.pending_events.push(event);
    }

    fn fail(&mut self, what: &str, err: impl std::fmt::Display) {
        warn!("{}: {} failed: {}", self.id, what, err);
        self.emit(SessionEvent::Error {
            message: format!("{} failed: {}", what, err),
        });
    }

    /// Publish the snapshot, then deliver the events of this dispatch
    fn publish(&mut self) {
        *self.snapshot.lock() = SessionSnapshot {
            playback: self.playback_state(),
            pump: self.state,
        };

        let events = std::mem::take(&mut self.pending_events);
        for event in events {
            for handler in self.event_handlers.iter_mut() {
                handler.handle_event(event.clone());
            }
        }
    }

    fn handle_codec_buffer(&mut self, queue: &TaskQueue<PumpMessage>) {
        let (Some(demuxer), Some(decoder)) =
            (self.demuxer.as_deref_mut(), self.decoder.as_deref_mut())
        else {
            debug!("{}: no decoder, dropping step", self.id);
            return;
        };

        let report = run_step(&mut self.state, demuxer, decoder, &self.timing);

        self.counters.record_step();
        if report.sample_queued_us.is_some() {
            self.counters.record_sample();
        }
        if report.input_eos_queued {
            self.emit(SessionEvent::InputExhausted);
        }
        if let Some(pts_us) = report.released_us {
            self.counters.record_release(report.rendered);
            if report.rendered {
                self.emit(SessionEvent::FrameRendered { pts_us });
            }
        }
        if report.output_eos {
            info!("{}: reached end of stream", self.id);
            self.emit(SessionEvent::OutputExhausted);
        }
        for message in report.failures {
            self.emit(SessionEvent::Error { message });
        }

        if report.reschedule {
            queue.post(PumpMessage::CodecBuffer);
        }
    }

    fn handle_start(&mut self, queue: &TaskQueue<PumpMessage>) {
        if self.started {
            debug!("{}: already started", self.id);
            return;
        }

        if let Err(e) = self.start_decoder() {
            error!("{}: failed to start decoder: {}", self.id, e);
            self.emit(SessionEvent::Error {
                message: e.to_string(),
            });
            self.release(queue);
            self.emit(SessionEvent::ShutDown);
            return;
        }

        self.state = PumpState::initial();
        self.started = true;
        queue.post(PumpMessage::CodecBuffer);
        info!("{}: started", self.id);
        self.emit(SessionEvent::Started);
    }

    fn handle_resume(&mut self, queue: &TaskQueue<PumpMessage>) {
        if !self.started {
            warn!("{}: resume before start ignored", self.id);
            return;
        }
        if self.state.is_playing {
            return;
        }

        self.state.render_anchor_ns = None;
        self.state.is_playing = true;
        queue.post(PumpMessage::CodecBuffer);
        debug!("{}: resumed", self.id);
        self.emit(SessionEvent::Resumed);
    }

    fn handle_pause(&mut self, queue: &TaskQueue<PumpMessage>) {
        if !self.state.is_playing {
            return;
        }

        self.state.is_playing = false;
        queue.post_flush(PumpMessage::PauseAck);
        debug!("{}: paused", self.id);
        self.emit(SessionEvent::Paused);
    }

    fn handle_seek(&mut self, queue: &TaskQueue<PumpMessage>) {
        if !self.started {
            warn!("{}: seek before start ignored", self.id);
            return;
        }
        let (Some(demuxer), Some(decoder)) = (self.demuxer.as_mut(), self.decoder.as_mut()) else {
            return;
        };

        let seek = demuxer.seek_to_start();
        let flush = decoder.flush();
        if let Err(e) = seek {
            self.fail("seek", e);
        }
        if let Err(e) = flush {
            self.fail("flush", e);
        }

        self.state.reset_for_seek();
        if !self.state.is_playing {
            self.state.render_once = true;
            queue.post(PumpMessage::CodecBuffer);
        }
        debug!("{}: seeked to {}", self.id, format_pts(0));
        self.emit(SessionEvent::Seeked);
    }

    fn handle_set_render_target(&mut self, target: Arc<dyn RenderTarget>) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };

        match decoder.set_render_target(target) {
            Ok(()) => {
                debug!("{}: render target changed", self.id);
                self.emit(SessionEvent::RenderTargetChanged);
            }
            Err(e) => self.fail("render target swap", e),
        }
    }

    fn handle_shutdown(&mut self, queue: &TaskQueue<PumpMessage>) {
        self.release(queue);
        info!("{}: shut down", self.id);
        self.emit(SessionEvent::ShutDown);
    }

    /// Stop and drop the decoder, drop the demuxer and stop the worker
    fn release(&mut self, queue: &TaskQueue<PumpMessage>) {
        if let Some(mut decoder) = self.decoder.take() {
            if let Err(e) = decoder.stop() {
                warn!("{}: failed to stop decoder: {}", self.id, e);
            }
        }
        self.demuxer = None;

        self.state.input_exhausted = true;
        self.state.output_exhausted = true;
        self.shut_down = true;
        queue.stop();
    }
}

impl Handler<PumpMessage> for Pump {
    fn handle(&mut self, message: PumpMessage, queue: &TaskQueue<PumpMessage>) {
        if self.shut_down {
            debug!("{}: dropping {:?} after shutdown", self.id, message);
            return;
        }

        match message {
            PumpMessage::CodecBuffer => self.handle_codec_buffer(queue),
            PumpMessage::Start => self.handle_start(queue),
            PumpMessage::Resume => self.handle_resume(queue),
            PumpMessage::Pause => self.handle_pause(queue),
            PumpMessage::PauseAck => self.emit(SessionEvent::PauseAcknowledged),
            PumpMessage::Seek => self.handle_seek(queue),
            PumpMessage::SetRenderTarget(target) => self.handle_set_render_target(target),
            PumpMessage::Shutdown => self.handle_shutdown(queue),
        }

        self.publish();
    }

    fn on_panic(&mut self, queue: &TaskQueue<PumpMessage>) {
        self.pending_events.clear();
        self.emit(SessionEvent::Error {
            message: "pump handler panicked".to_string(),
        });
        self.release(queue);
        self.emit(SessionEvent::ShutDown);
        self.publish();
    }
}
