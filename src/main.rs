use anyhow::{bail, Context, Result};
use clap::Parser;
use codec_pump::decoder::synthetic::{
    RecordingTarget, SyntheticBackend, SyntheticDecoderConfig, SyntheticStream,
};
use codec_pump::decoder::OutputStatus;
use codec_pump::utils::format_pts;
use codec_pump::{Config, PlaybackStats, SessionEvent, SessionId, SessionRegistry};
use crossbeam_channel::Receiver;
use env_logger::Env;
use log::{debug, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEMO_SOURCE: &str = "synthetic://demo";

/// codec-pump - plays a synthetic clip through the decode pump
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of video frames in the clip
    #[arg(long, default_value = "90")]
    frames: usize,

    /// Clip frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Seek back to the start halfway through
    #[arg(long)]
    seek: bool,

    /// Report an unexpected decoder status code once after start
    #[arg(long, value_name = "CODE", allow_negative_numbers = true)]
    inject_status: Option<i32>,

    /// Configuration file to use instead of the system and user files
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print statistics as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    session: SessionId,
    frames_presented: usize,
    elapsed_ms: u128,
    stats: PlaybackStats,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load().context("loading configuration")?,
    };

    let log_level = if args.debug { "debug" } else { config.general.log_level.as_str() };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting codec-pump v{}", env!("CARGO_PKG_VERSION"));

    if args.fps == 0 || args.frames == 0 {
        bail!("--frames and --fps must be positive");
    }
    let frame_interval_us = 1_000_000 / args.fps as i64;

    let decoder_config = SyntheticDecoderConfig {
        startup_statuses: args.inject_status.map(OutputStatus::Other).into_iter().collect(),
        ..SyntheticDecoderConfig::default()
    };
    let backend = SyntheticBackend::new(decoder_config);
    backend.register(
        DEMO_SOURCE,
        SyntheticStream::new()
            .with_audio_track("audio/mp4a-latm", args.frames, frame_interval_us)
            .with_video_track("video/avc", args.frames, frame_interval_us),
    );

    let registry = SessionRegistry::new(Arc::new(backend), config.pump.clone());
    let target = Arc::new(RecordingTarget::new());
    let (events_tx, events) = crossbeam_channel::unbounded::<SessionEvent>();

    let id = registry
        .create_session_with_handler(DEMO_SOURCE, Some(target.clone()), Some(Box::new(events_tx)))
        .with_context(|| format!("creating session for {}", DEMO_SOURCE))?;

    let clip_length = Duration::from_micros((args.frames as i64 * frame_interval_us) as u64);
    let patience = clip_length * 2 + Duration::from_secs(5);

    wait_for(&events, Duration::from_secs(5), |e| matches!(e, SessionEvent::FrameRendered { .. }))
        .context("waiting for the first frame")?;
    info!("First frame presented, starting playback");

    let started = Instant::now();
    registry.set_playing(id, true)?;

    if args.seek {
        let halfway = args.frames as i64 / 2 * frame_interval_us;
        wait_for(&events, patience, |e| {
            matches!(e, SessionEvent::FrameRendered { pts_us } if *pts_us >= halfway)
        })
        .context("waiting for the halfway frame")?;
        info!("Seeking to start from {}", format_pts(halfway));
        registry.seek(id)?;
    }

    wait_for(&events, patience, |e| *e == SessionEvent::OutputExhausted)
        .context("waiting for end of stream")?;
    let elapsed = started.elapsed();

    let stats = registry.shutdown(id)?;
    let report = Report {
        session: id,
        frames_presented: target.count(),
        elapsed_ms: elapsed.as_millis(),
        stats,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: {} frames presented in {} ms",
            report.session, report.frames_presented, report.elapsed_ms
        );
        println!("  steps:           {}", stats.steps);
        println!("  samples queued:  {}", stats.samples_queued);
        println!("  frames released: {}", stats.frames_released);
        println!("  frames rendered: {}", stats.frames_rendered);
    }

    Ok(())
}

/// Log session events until one matches `predicate`
fn wait_for<F>(events: &Receiver<SessionEvent>, timeout: Duration, predicate: F) -> Result<()>
where
    F: Fn(&SessionEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(remaining)
            .context("no matching session event before timeout")?;
        log_event(&event);
        if predicate(&event) {
            return Ok(());
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::FrameRendered { pts_us } => {
            // Per-frame events only at debug level to avoid spam
            debug!("Frame {}", format_pts(*pts_us));
        }
        SessionEvent::Error { message } => warn!("Session error: {}", message),
        SessionEvent::ShutDown => info!("Session shut down"),
        other => debug!("Event: {:?}", other),
    }
}
