//! In-memory media backend
//!
//! Provides a demuxer over pre-built sample lists, a slot-based decoder that
//! models input back-pressure, decode latency and output status codes, and a
//! render target that records what was presented. Used by the demo binary
//! and the test suites to drive the pump without a platform media stack.

use crate::decoder::{
    Decoder, DecoderFactory, Demuxer, MediaBackend, OutputBuffer, OutputStatus, RenderTarget,
    RenderedFrame, TrackFormat,
};
use crate::utils::clock::monotonic_now_ns;
use crate::utils::error::{PumpError, Result};
use log::{trace, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One compressed sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticSample {
    /// Presentation timestamp in microseconds
    pub pts_us: i64,

    /// Sample payload
    pub data: Vec<u8>,
}

/// One track of a synthetic stream
#[derive(Debug, Clone)]
pub struct SyntheticTrack {
    /// Track format
    pub format: TrackFormat,

    /// Samples in decode order
    pub samples: Vec<SyntheticSample>,
}

/// A container of synthetic tracks
#[derive(Debug, Clone, Default)]
pub struct SyntheticStream {
    tracks: Vec<SyntheticTrack>,
}

impl SyntheticStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a track with explicit samples
    pub fn with_track(mut self, format: TrackFormat, samples: Vec<SyntheticSample>) -> Self {
        self.tracks.push(SyntheticTrack { format, samples });
        self
    }

    /// Add a video track of `frames` evenly spaced samples starting at pts 0
    pub fn with_video_track(self, mime: &str, frames: usize, frame_interval_us: i64) -> Self {
        let mut format = TrackFormat::video(mime, 320, 240);
        format.duration_us = Some(frames as i64 * frame_interval_us);
        format.max_input_size = Some(4096);
        let samples = Self::make_samples(frames, frame_interval_us, 512);
        self.with_track(format, samples)
    }

    /// Add an audio track of `packets` evenly spaced samples starting at pts 0
    pub fn with_audio_track(self, mime: &str, packets: usize, packet_interval_us: i64) -> Self {
        let format = TrackFormat::audio(mime);
        let samples = Self::make_samples(packets, packet_interval_us, 128);
        self.with_track(format, samples)
    }

    /// Tracks in container order
    pub fn tracks(&self) -> &[SyntheticTrack] {
        &self.tracks
    }

    fn make_samples(count: usize, interval_us: i64, size: usize) -> Vec<SyntheticSample> {
        (0..count)
            .map(|i| SyntheticSample {
                pts_us: i as i64 * interval_us,
                data: vec![(i % 251) as u8; size],
            })
            .collect()
    }
}

/// Demuxer over a [`SyntheticStream`]
pub struct SyntheticDemuxer {
    stream: Arc<SyntheticStream>,
    selected: Option<usize>,
    cursor: usize,
}

impl SyntheticDemuxer {
    /// Open a demuxer over `stream`
    pub fn new(stream: Arc<SyntheticStream>) -> Self {
        Self {
            stream,
            selected: None,
            cursor: 0,
        }
    }

    fn current(&self) -> Option<&SyntheticSample> {
        let track = self.stream.tracks.get(self.selected?)?;
        track.samples.get(self.cursor)
    }
}

impl Demuxer for SyntheticDemuxer {
    fn track_count(&self) -> usize {
        self.stream.tracks.len()
    }

    fn track_format(&self, index: usize) -> Option<TrackFormat> {
        self.stream.tracks.get(index).map(|t| t.format.clone())
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.stream.tracks.len() {
            return Err(PumpError::Demuxer(format!("track {} out of range", index)));
        }
        self.selected = Some(index);
        self.cursor = 0;
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut [u8]) -> Option<usize> {
        let sample = self.current()?;
        let len = sample.data.len().min(buf.len());
        if len < sample.data.len() {
            warn!(
                "sample at {}us is {} bytes, truncated to the {} byte input buffer",
                sample.pts_us,
                sample.data.len(),
                buf.len()
            );
        }
        buf[..len].copy_from_slice(&sample.data[..len]);
        Some(len)
    }

    fn sample_time_us(&self) -> i64 {
        self.current().map(|s| s.pts_us).unwrap_or(-1)
    }

    fn advance(&mut self) -> bool {
        if self.current().is_some() {
            self.cursor += 1;
        }
        self.current().is_some()
    }

    fn seek_to_start(&mut self) -> Result<()> {
        // Every synthetic sample is a sync sample
        self.cursor = 0;
        Ok(())
    }
}

/// Tunables for [`SyntheticDecoder`]
#[derive(Debug, Clone)]
pub struct SyntheticDecoderConfig {
    /// Number of input slots
    pub input_slots: usize,

    /// Input slot size when the format carries no max input size
    pub slot_capacity: usize,

    /// Decoded buffers that may be outstanding before input is refused
    pub output_capacity: usize,

    /// Submitted samples held back before the oldest one is decoded
    pub latency: usize,

    /// Statuses reported before any decoded output after start
    pub startup_statuses: Vec<OutputStatus>,

    /// Make `configure` fail
    pub fail_configure: bool,

    /// Make `start` fail
    pub fail_start: bool,
}

impl Default for SyntheticDecoderConfig {
    fn default() -> Self {
        Self {
            input_slots: 4,
            slot_capacity: 64 * 1024,
            output_capacity: 4,
            latency: 2,
            startup_statuses: Vec::new(),
            fail_configure: false,
            fail_start: false,
        }
    }
}

/// Counters describing what a [`SyntheticDecoder`] was asked to do
#[derive(Debug, Default)]
pub struct DecoderProbe {
    /// Track the decoder was configured for
    pub configured_format: Mutex<Option<TrackFormat>>,

    /// Input buffers submitted, end-of-stream included
    pub inputs_submitted: AtomicU64,

    /// End-of-stream input buffers submitted
    pub eos_submitted: AtomicU64,

    /// Output buffers released
    pub outputs_released: AtomicU64,

    /// Output buffers released with render set
    pub outputs_rendered: AtomicU64,

    /// Flush calls
    pub flushes: AtomicU64,

    /// Render target swaps
    pub target_swaps: AtomicU64,

    /// Set once `start` succeeded
    pub started: AtomicBool,

    /// Set once `stop` was called
    pub stopped: AtomicBool,

    /// Set when the decoder was dropped
    pub destroyed: AtomicBool,
}

impl DecoderProbe {
    /// Read a counter
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct PendingOutput {
    pts_us: i64,
    size: usize,
    end_of_stream: bool,
}

/// Slot-based decoder that "decodes" by forwarding sample metadata
pub struct SyntheticDecoder {
    config: SyntheticDecoderConfig,
    state: DecoderState,
    format: Option<TrackFormat>,
    target: Option<Arc<dyn RenderTarget>>,
    inputs: Vec<Vec<u8>>,
    free_slots: VecDeque<usize>,
    decoding: VecDeque<PendingOutput>,
    ready: VecDeque<PendingOutput>,
    held: HashMap<usize, OutputBuffer>,
    next_output_slot: usize,
    statuses: VecDeque<OutputStatus>,
    format_reported: bool,
    probe: Arc<DecoderProbe>,
}

impl SyntheticDecoder {
    /// Create an unconfigured decoder
    pub fn new(config: SyntheticDecoderConfig) -> Self {
        Self {
            config,
            state: DecoderState::Unconfigured,
            format: None,
            target: None,
            inputs: Vec::new(),
            free_slots: VecDeque::new(),
            decoding: VecDeque::new(),
            ready: VecDeque::new(),
            held: HashMap::new(),
            next_output_slot: 0,
            statuses: VecDeque::new(),
            format_reported: false,
            probe: Arc::new(DecoderProbe::default()),
        }
    }

    /// Shared view of this decoder's counters
    pub fn probe(&self) -> Arc<DecoderProbe> {
        Arc::clone(&self.probe)
    }

    fn outstanding(&self) -> usize {
        self.decoding.len() + self.ready.len() + self.held.len()
    }

    fn decoded_size(&self, len: usize) -> usize {
        match &self.format {
            Some(f) if f.width > 0 && f.height > 0 => (f.width * f.height * 3 / 2) as usize,
            _ => len,
        }
    }

    /// Move samples whose decode latency has elapsed to the ready queue
    fn promote(&mut self) {
        let flushing = self.decoding.iter().any(|p| p.end_of_stream);
        while self.decoding.len() > self.config.latency || (flushing && !self.decoding.is_empty()) {
            if let Some(pending) = self.decoding.pop_front() {
                self.ready.push_back(pending);
            }
        }
    }

    fn reset_queues(&mut self) {
        self.free_slots = (0..self.inputs.len()).collect();
        self.decoding.clear();
        self.ready.clear();
        self.held.clear();
    }
}

impl Decoder for SyntheticDecoder {
    fn configure(
        &mut self,
        format: &TrackFormat,
        target: Option<Arc<dyn RenderTarget>>,
    ) -> Result<()> {
        if self.config.fail_configure {
            return Err(PumpError::DecoderConfig(format!("rejected format ({})", format)));
        }
        if matches!(self.state, DecoderState::Running) {
            return Err(PumpError::DecoderConfig("decoder is running".to_string()));
        }

        let capacity = format.max_input_size.unwrap_or(self.config.slot_capacity);
        self.inputs = vec![vec![0; capacity]; self.config.input_slots];
        self.format = Some(format.clone());
        self.target = target;
        self.reset_queues();
        self.state = DecoderState::Configured;
        *self.probe.configured_format.lock() = Some(format.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.config.fail_start {
            return Err(PumpError::decoder_error("codec refused to start"));
        }
        if self.state != DecoderState::Configured {
            return Err(PumpError::decoder_error(format!(
                "cannot start from {:?}",
                self.state
            )));
        }
        self.state = DecoderState::Running;
        self.statuses = self.config.startup_statuses.iter().cloned().collect();
        self.probe.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn dequeue_input_slot(&mut self, timeout: Duration) -> Option<usize> {
        if self.state == DecoderState::Running && self.outstanding() < self.config.output_capacity {
            if let Some(slot) = self.free_slots.pop_front() {
                return Some(slot);
            }
        }
        std::thread::sleep(timeout);
        None
    }

    fn input_buffer(&mut self, slot: usize) -> &mut [u8] {
        &mut self.inputs[slot]
    }

    fn submit_input(
        &mut self,
        slot: usize,
        len: usize,
        pts_us: i64,
        end_of_stream: bool,
    ) -> Result<()> {
        if self.state != DecoderState::Running {
            return Err(PumpError::decoder_error("submit on a decoder that is not running"));
        }
        if slot >= self.inputs.len() || self.free_slots.contains(&slot) {
            return Err(PumpError::decoder_error(format!("input slot {} was not dequeued", slot)));
        }

        let size = if len == 0 { 0 } else { self.decoded_size(len) };
        self.decoding.push_back(PendingOutput {
            pts_us,
            size,
            end_of_stream,
        });
        self.free_slots.push_back(slot);
        self.probe.inputs_submitted.fetch_add(1, Ordering::SeqCst);
        if end_of_stream {
            self.probe.eos_submitted.fetch_add(1, Ordering::SeqCst);
        }
        trace!(
            "queued input slot {} ({} bytes, pts {}us, eos {})",
            slot,
            len,
            pts_us,
            end_of_stream
        );

        self.promote();
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> OutputStatus {
        if self.state != DecoderState::Running {
            return OutputStatus::TryAgainLater;
        }
        if let Some(status) = self.statuses.pop_front() {
            return status;
        }

        if !self.ready.is_empty() && !self.format_reported {
            self.format_reported = true;
            if let Some(format) = &self.format {
                return OutputStatus::FormatChanged(format.clone());
            }
        }

        match self.ready.pop_front() {
            Some(pending) => {
                let slot = self.next_output_slot;
                self.next_output_slot = self.next_output_slot.wrapping_add(1);
                let buffer = OutputBuffer {
                    slot,
                    pts_us: pending.pts_us,
                    size: pending.size,
                    end_of_stream: pending.end_of_stream,
                };
                self.held.insert(slot, buffer);
                OutputStatus::Buffer(buffer)
            }
            None => {
                if !timeout.is_zero() {
                    std::thread::sleep(timeout);
                }
                OutputStatus::TryAgainLater
            }
        }
    }

    fn release_output(&mut self, slot: usize, render: bool) -> Result<()> {
        let buffer = self
            .held
            .remove(&slot)
            .ok_or_else(|| PumpError::decoder_error(format!("output slot {} is not held", slot)))?;

        self.probe.outputs_released.fetch_add(1, Ordering::SeqCst);
        if render {
            self.probe.outputs_rendered.fetch_add(1, Ordering::SeqCst);
            if let Some(target) = &self.target {
                target.present(RenderedFrame {
                    pts_us: buffer.pts_us,
                    size: buffer.size,
                });
            }
        }
        Ok(())
    }

    fn set_render_target(&mut self, target: Arc<dyn RenderTarget>) -> Result<()> {
        self.target = Some(target);
        self.probe.target_swaps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.state != DecoderState::Running {
            return Err(PumpError::decoder_error("flush on a decoder that is not running"));
        }
        self.reset_queues();
        self.probe.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.reset_queues();
        self.state = DecoderState::Stopped;
        self.probe.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for SyntheticDecoder {
    fn drop(&mut self) {
        self.probe.destroyed.store(true, Ordering::SeqCst);
    }
}

/// Render target that records every presented frame with its wall-clock time
#[derive(Debug, Default)]
pub struct RecordingTarget {
    frames: Mutex<Vec<(RenderedFrame, i64)>>,
}

impl RecordingTarget {
    /// Create an empty recording target
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames presented
    pub fn count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Presentation timestamps of the presented frames, in order
    pub fn pts_list(&self) -> Vec<i64> {
        self.frames.lock().iter().map(|(f, _)| f.pts_us).collect()
    }

    /// Presented frames with the monotonic time (ns) they arrived
    pub fn frames(&self) -> Vec<(RenderedFrame, i64)> {
        self.frames.lock().clone()
    }
}

impl RenderTarget for RecordingTarget {
    fn present(&self, frame: RenderedFrame) {
        self.frames.lock().push((frame, monotonic_now_ns()));
    }
}

/// Backend serving registered synthetic streams
pub struct SyntheticBackend {
    streams: Mutex<HashMap<String, Arc<SyntheticStream>>>,
    decoder_config: SyntheticDecoderConfig,
    supported_mime_prefixes: Vec<String>,
    probes: Mutex<Vec<Arc<DecoderProbe>>>,
}

impl SyntheticBackend {
    /// Create a backend that decodes any video MIME type
    pub fn new(decoder_config: SyntheticDecoderConfig) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            decoder_config,
            supported_mime_prefixes: vec!["video/".to_string()],
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Restrict the MIME types decoders can be created for
    pub fn with_supported_mime_prefixes(mut self, prefixes: &[&str]) -> Self {
        self.supported_mime_prefixes = prefixes.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Make `stream` available under `source`
    pub fn register(&self, source: &str, stream: SyntheticStream) {
        self.streams.lock().insert(source.to_string(), Arc::new(stream));
    }

    /// Probe of the most recently created decoder
    pub fn last_probe(&self) -> Option<Arc<DecoderProbe>> {
        self.probes.lock().last().cloned()
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new(SyntheticDecoderConfig::default())
    }
}

impl DecoderFactory for SyntheticBackend {
    fn create_decoder(&self, format: &TrackFormat) -> Result<Box<dyn Decoder>> {
        let supported = self
            .supported_mime_prefixes
            .iter()
            .any(|prefix| format.matches(prefix));
        if !supported {
            return Err(PumpError::DecoderConfig(format!("no decoder for {}", format)));
        }

        let decoder = SyntheticDecoder::new(self.decoder_config.clone());
        self.probes.lock().push(decoder.probe());
        Ok(Box::new(decoder))
    }
}

impl MediaBackend for SyntheticBackend {
    fn open_stream(&self, source: &str) -> Result<Box<dyn Demuxer>> {
        let stream = self
            .streams
            .lock()
            .get(source)
            .cloned()
            .ok_or_else(|| PumpError::StreamOpen(format!("failed to open {}", source)))?;
        Ok(Box::new(SyntheticDemuxer::new(stream)))
    }
}
