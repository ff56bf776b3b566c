//! One iteration of the decode pump
//!
//! A step makes at most one feed attempt (demuxer sample into a decoder input
//! slot) and at most one drain attempt (decoder output released at its
//! presentation time), then reports whether another step should be queued.

use crate::decoder::{Decoder, Demuxer, OutputStatus};
use crate::player::PumpState;
use crate::utils::clock::{monotonic_now_ns, us_to_ns};
use crate::utils::config::PumpConfig;
use crate::utils::format_pts;
use log::{debug, trace, warn};
use std::time::Duration;

/// Longest a single frame may hold the worker waiting for its presentation time
pub const MAX_PACING_DELAY: Duration = Duration::from_secs(10);

/// Decoded output is polled, never waited for
const OUTPUT_POLL_TIMEOUT: Duration = Duration::ZERO;

/// Decoder wait bounds used by a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTiming {
    /// Longest wait for a free input slot; must be non-zero
    pub input_slot_timeout: Duration,
}

impl StepTiming {
    pub fn from_config(config: &PumpConfig) -> Self {
        Self {
            input_slot_timeout: config.input_slot_timeout(),
        }
    }
}

impl Default for StepTiming {
    fn default() -> Self {
        Self::from_config(&PumpConfig::default())
    }
}

/// What a single step did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Pts of the sample submitted this step
    pub sample_queued_us: Option<i64>,

    /// The end-of-stream input buffer was submitted this step
    pub input_eos_queued: bool,

    /// Pts of the output buffer released this step
    pub released_us: Option<i64>,

    /// The released buffer was rendered
    pub rendered: bool,

    /// The released buffer carried the end-of-stream flag
    pub output_eos: bool,

    /// Failures absorbed during the step
    pub failures: Vec<String>,

    /// Another step should be queued
    pub reschedule: bool,
}

/// Run one decode step against `state`
pub fn run_step(
    state: &mut PumpState,
    demuxer: &mut dyn Demuxer,
    decoder: &mut dyn Decoder,
    timing: &StepTiming,
) -> StepReport {
    let mut report = StepReport::default();

    if !state.is_playing && !state.render_once {
        // Paused with the single-frame paint already done: a leftover step
        trace!("paused, dropping step");
        return report;
    }

    if !state.input_exhausted {
        feed(state, demuxer, decoder, timing.input_slot_timeout, &mut report);
    }

    if !state.output_exhausted && !drain(state, decoder, &mut report) {
        // render_once consumed: hold here until the next control message
        return report;
    }

    report.reschedule = state.should_step();
    report
}

fn feed(
    state: &mut PumpState,
    demuxer: &mut dyn Demuxer,
    decoder: &mut dyn Decoder,
    timeout: Duration,
    report: &mut StepReport,
) {
    let Some(slot) = decoder.dequeue_input_slot(timeout) else {
        trace!("no input slot available");
        return;
    };

    match demuxer.read_sample(decoder.input_buffer(slot)) {
        None => {
            state.input_exhausted = true;
            debug!("input exhausted, queueing end of stream");
            match decoder.submit_input(slot, 0, 0, true) {
                Ok(()) => report.input_eos_queued = true,
                Err(e) => {
                    warn!("failed to queue end of stream: {}", e);
                    report.failures.push(e.to_string());
                }
            }
        }
        Some(len) => {
            let pts_us = demuxer.sample_time_us();
            match decoder.submit_input(slot, len, pts_us, false) {
                Ok(()) => {
                    trace!("queued sample {} ({} bytes)", format_pts(pts_us), len);
                    report.sample_queued_us = Some(pts_us);
                    demuxer.advance();
                }
                Err(e) => {
                    warn!("failed to queue sample at {}: {}", format_pts(pts_us), e);
                    report.failures.push(e.to_string());
                }
            }
        }
    }
}

/// Returns false when the step must stop without rescheduling
fn drain(state: &mut PumpState, decoder: &mut dyn Decoder, report: &mut StepReport) -> bool {
    match decoder.dequeue_output(OUTPUT_POLL_TIMEOUT) {
        OutputStatus::Buffer(buffer) => {
            if buffer.end_of_stream {
                debug!("output exhausted");
                state.output_exhausted = true;
                report.output_eos = true;
            }

            pace(state, buffer.pts_us);

            let render = buffer.size != 0;
            match decoder.release_output(buffer.slot, render) {
                Ok(()) => {
                    trace!("released {} (render: {})", format_pts(buffer.pts_us), render);
                    report.released_us = Some(buffer.pts_us);
                    report.rendered = render;
                }
                Err(e) => {
                    warn!("failed to release output {}: {}", buffer.slot, e);
                    report.failures.push(e.to_string());
                }
            }

            if state.render_once {
                state.render_once = false;
                return false;
            }
        }
        OutputStatus::FormatChanged(format) => debug!("output format changed to: {}", format),
        OutputStatus::TryAgainLater => trace!("no output buffer right now"),
        OutputStatus::BuffersChanged => debug!("output buffers changed"),
        OutputStatus::Other(code) => warn!("unexpected decoder status: {}", code),
    }
    true
}

/// Block until the frame at `pts_us` is due, anchoring the run on its first frame
fn pace(state: &mut PumpState, pts_us: i64) {
    let presentation_ns = us_to_ns(pts_us);
    let now = monotonic_now_ns();
    let anchor = *state
        .render_anchor_ns
        .get_or_insert(now.saturating_sub(presentation_ns));
    let delay = anchor.saturating_add(presentation_ns).saturating_sub(now);
    if delay <= 0 {
        return;
    }

    let delay = Duration::from_nanos(delay as u64);
    if delay > MAX_PACING_DELAY {
        warn!(
            "frame at {} is due in {:?}, presenting without waiting",
            format_pts(pts_us),
            delay
        );
        return;
    }
    std::thread::sleep(delay);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{MockDemuxer, OutputBuffer, RenderTarget, TrackFormat};
    use crate::utils::error::{PumpError, Result};
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Decoder with scripted slots and outputs
    #[derive(Default)]
    struct StubDecoder {
        slot: Option<usize>,
        buffer: Vec<u8>,
        reject_submit: bool,
        input_polls: usize,
        submitted: Vec<(usize, i64, bool)>,
        output_waits: Vec<Duration>,
        outputs: VecDeque<OutputStatus>,
        released: Vec<(usize, bool)>,
    }

    impl StubDecoder {
        fn with_slot() -> Self {
            Self {
                slot: Some(0),
                buffer: vec![0; 64],
                ..Self::default()
            }
        }

        fn output(mut self, status: OutputStatus) -> Self {
            self.outputs.push_back(status);
            self
        }
    }

    impl Decoder for StubDecoder {
        fn configure(
            &mut self,
            _format: &TrackFormat,
            _target: Option<Arc<dyn RenderTarget>>,
        ) -> Result<()> {
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn dequeue_input_slot(&mut self, _timeout: Duration) -> Option<usize> {
            self.input_polls += 1;
            self.slot
        }

        fn input_buffer(&mut self, _slot: usize) -> &mut [u8] {
            &mut self.buffer
        }

        fn submit_input(
            &mut self,
            _slot: usize,
            len: usize,
            pts_us: i64,
            end_of_stream: bool,
        ) -> Result<()> {
            if self.reject_submit {
                return Err(PumpError::decoder_error("rejected"));
            }
            self.submitted.push((len, pts_us, end_of_stream));
            Ok(())
        }

        fn dequeue_output(&mut self, timeout: Duration) -> OutputStatus {
            self.output_waits.push(timeout);
            self.outputs.pop_front().unwrap_or(OutputStatus::TryAgainLater)
        }

        fn release_output(&mut self, slot: usize, render: bool) -> Result<()> {
            self.released.push((slot, render));
            Ok(())
        }

        fn set_render_target(&mut self, _target: Arc<dyn RenderTarget>) -> Result<()> {
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn buffer(slot: usize, pts_us: i64, size: usize, end_of_stream: bool) -> OutputStatus {
        OutputStatus::Buffer(OutputBuffer {
            slot,
            pts_us,
            size,
            end_of_stream,
        })
    }

    fn playing() -> PumpState {
        PumpState {
            is_playing: true,
            ..PumpState::default()
        }
    }

    #[test]
    fn test_feed_submits_then_advances() {
        let mut demuxer = MockDemuxer::new();
        demuxer.expect_read_sample().times(1).returning(|_| Some(12));
        demuxer.expect_sample_time_us().return_const(40_000i64);
        demuxer.expect_advance().times(1).return_const(true);
        let mut decoder = StubDecoder::with_slot();
        let mut state = playing();

        let report = run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
        assert_eq!(decoder.submitted, vec![(12, 40_000, false)]);
        assert_eq!(report.sample_queued_us, Some(40_000));
        assert!(!state.input_exhausted);
        assert!(report.reschedule);
    }

    #[test]
    fn test_end_of_stream_is_not_advanced() {
        let mut demuxer = MockDemuxer::new();
        demuxer.expect_read_sample().times(1).returning(|_| None);
        demuxer.expect_advance().times(0);
        let mut decoder = StubDecoder::with_slot();
        let mut state = playing();

        let report = run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
        assert!(state.input_exhausted);
        assert!(report.input_eos_queued);
        assert_eq!(decoder.submitted, vec![(0, 0, true)]);
        assert!(report.reschedule);
    }

    #[test]
    fn test_rejected_sample_is_not_advanced() {
        let mut demuxer = MockDemuxer::new();
        demuxer.expect_read_sample().times(1).returning(|_| Some(8));
        demuxer.expect_sample_time_us().return_const(0i64);
        demuxer.expect_advance().times(0);
        let mut decoder = StubDecoder {
            reject_submit: true,
            ..StubDecoder::with_slot()
        };
        let mut state = playing();

        let report = run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.sample_queued_us, None);
        assert!(report.reschedule);
    }

    #[test]
    fn test_no_slot_skips_read() {
        let mut demuxer = MockDemuxer::new();
        demuxer.expect_read_sample().times(0);
        let mut decoder = StubDecoder::default();
        let mut state = playing();

        let report = run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
        assert_eq!(decoder.input_polls, 1);
        assert!(report.reschedule);
    }

    #[test]
    fn test_exhausted_input_skips_feed() {
        let mut demuxer = MockDemuxer::new();
        let mut decoder = StubDecoder::with_slot();
        let mut state = PumpState {
            input_exhausted: true,
            ..playing()
        };

        run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
        assert_eq!(decoder.input_polls, 0);
    }

    #[test]
    fn test_render_once_stops_rescheduling() {
        let mut demuxer = MockDemuxer::new();
        let mut decoder = StubDecoder::default()
            .output(buffer(3, 0, 100, false))
            .output(buffer(4, 10, 100, false));
        let mut state = PumpState {
            input_exhausted: true,
            ..PumpState::initial()
        };

        let report = run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
        assert_eq!(decoder.released, vec![(3, true)]);
        assert!(!state.render_once);
        assert!(!report.reschedule);
        assert!(state.render_anchor_ns.is_some());
    }

    #[test]
    fn test_pacing_waits_for_presentation_time() {
        let mut demuxer = MockDemuxer::new();
        let mut decoder = StubDecoder::default()
            .output(buffer(0, 0, 100, false))
            .output(buffer(1, 30_000, 100, false));
        let mut state = PumpState {
            input_exhausted: true,
            ..playing()
        };
        let timing = StepTiming::default();

        run_step(&mut state, &mut demuxer, &mut decoder, &timing);
        let anchor = state.render_anchor_ns.unwrap();
        run_step(&mut state, &mut demuxer, &mut decoder, &timing);

        assert!(monotonic_now_ns() >= anchor + 30_000_000);
        assert_eq!(state.render_anchor_ns, Some(anchor));
        assert_eq!(decoder.released.len(), 2);
    }

    #[test]
    fn test_output_eos_sets_flag_and_skips_render() {
        let mut demuxer = MockDemuxer::new();
        let mut decoder = StubDecoder::default().output(buffer(7, 0, 0, true));
        let mut state = PumpState {
            input_exhausted: true,
            ..playing()
        };

        let report = run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
        assert!(state.output_exhausted);
        assert!(report.output_eos);
        assert_eq!(decoder.released, vec![(7, false)]);
        assert!(!report.reschedule);
    }

    #[test]
    fn test_informational_statuses_do_not_mutate() {
        let statuses = [
            OutputStatus::FormatChanged(TrackFormat::video("video/avc", 2, 2)),
            OutputStatus::TryAgainLater,
            OutputStatus::BuffersChanged,
            OutputStatus::Other(-1000),
        ];
        for status in statuses {
            let mut demuxer = MockDemuxer::new();
            let mut decoder = StubDecoder::default().output(status);
            let before = PumpState {
                input_exhausted: true,
                ..PumpState::initial()
            };
            let mut state = before;

            let report = run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
            assert_eq!(state, before);
            assert!(report.failures.is_empty());
            assert!(report.reschedule);
        }
    }

    #[test]
    fn test_drain_never_waits_for_output() {
        let mut demuxer = MockDemuxer::new();
        let mut decoder = StubDecoder::default();
        let mut state = PumpState {
            input_exhausted: true,
            ..playing()
        };
        let timing = StepTiming {
            input_slot_timeout: Duration::from_millis(100),
        };

        for _ in 0..3 {
            run_step(&mut state, &mut demuxer, &mut decoder, &timing);
        }
        assert_eq!(decoder.output_waits, vec![Duration::ZERO; 3]);
    }

    #[test]
    fn test_paused_step_without_paint_does_nothing() {
        let mut demuxer = MockDemuxer::new();
        demuxer.expect_read_sample().times(0);
        let mut decoder = StubDecoder::with_slot().output(buffer(0, 0, 100, false));
        let mut state = PumpState::default();

        let report = run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
        assert!(!report.reschedule);
        assert_eq!(decoder.input_polls, 0);
        assert!(decoder.released.is_empty());
        assert_eq!(state, PumpState::default());
    }

    #[test]
    fn test_paint_then_leftover_step_stops() {
        let mut demuxer = MockDemuxer::new();
        let mut decoder = StubDecoder::default()
            .output(buffer(0, 0, 100, false))
            .output(buffer(1, 10, 100, false));
        let mut state = PumpState {
            input_exhausted: true,
            ..PumpState::initial()
        };
        let timing = StepTiming::default();

        // Two chains were queued; only the first may present
        let first = run_step(&mut state, &mut demuxer, &mut decoder, &timing);
        let second = run_step(&mut state, &mut demuxer, &mut decoder, &timing);
        assert!(!first.reschedule);
        assert!(!second.reschedule);
        assert_eq!(second.released_us, None);
        assert_eq!(decoder.released, vec![(0, true)]);
    }

    #[test]
    fn test_extreme_timestamps_do_not_stall() {
        let mut demuxer = MockDemuxer::new();
        let mut decoder = StubDecoder::default()
            .output(buffer(0, 0, 100, false))
            .output(buffer(1, i64::MAX / 2, 100, false))
            .output(buffer(2, i64::MIN, 100, false))
            .output(buffer(3, 3_000, 100, false));
        let mut state = PumpState {
            input_exhausted: true,
            ..playing()
        };
        let timing = StepTiming::default();

        let started = std::time::Instant::now();
        for _ in 0..4 {
            let report = run_step(&mut state, &mut demuxer, &mut decoder, &timing);
            assert!(report.failures.is_empty());
            assert!(report.reschedule);
        }
        assert!(started.elapsed() < MAX_PACING_DELAY);
        assert_eq!(decoder.released.len(), 4);
    }

    #[test]
    fn test_extreme_first_timestamp_anchors_without_overflow() {
        let mut demuxer = MockDemuxer::new();
        let mut decoder = StubDecoder::default().output(buffer(0, i64::MIN, 100, false));
        let mut state = PumpState {
            input_exhausted: true,
            ..playing()
        };

        run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
        assert_eq!(state.render_anchor_ns, Some(i64::MAX));
        assert_eq!(decoder.released, vec![(0, true)]);
    }

    #[test]
    fn test_fully_exhausted_does_nothing() {
        let mut demuxer = MockDemuxer::new();
        let mut decoder = StubDecoder::with_slot().output(buffer(0, 0, 1, false));
        let mut state = PumpState {
            input_exhausted: true,
            output_exhausted: true,
            ..playing()
        };

        let report = run_step(&mut state, &mut demuxer, &mut decoder, &StepTiming::default());
        assert!(!report.reschedule);
        assert_eq!(decoder.input_polls, 0);
        assert_eq!(decoder.outputs.len(), 1);
    }
}
