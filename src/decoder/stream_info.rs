//! Track discovery and selection
//!
//! Walks the tracks of an opened demuxer and binds it to the first track
//! whose MIME type the pump can decode.

use crate::decoder::{Demuxer, TrackFormat};
use crate::utils::error::{PumpError, Result};
use log::{debug, info, warn};

/// The track a session decodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedTrack {
    /// Track index within the container
    pub index: usize,

    /// Track format as reported by the demuxer
    pub format: TrackFormat,
}

/// Select the first track whose MIME type starts with `mime_prefix`.
///
/// Tracks without a MIME type are skipped. Only the chosen track is
/// selected on the demuxer; fails with `NoDecodableTrack` when nothing
/// matches.
pub fn select_decodable_track(
    demuxer: &mut dyn Demuxer,
    mime_prefix: &str,
) -> Result<SelectedTrack> {
    let track_count = demuxer.track_count();
    info!("input has {} tracks", track_count);

    let mut selected = None;
    for index in 0..track_count {
        let Some(format) = demuxer.track_format(index) else {
            warn!("track {} has no format", index);
            continue;
        };
        debug!("track {} format: {}", index, format);

        if format.mime.is_none() {
            warn!("track {} has no mime type, skipping", index);
            continue;
        }

        if selected.is_none() && format.matches(mime_prefix) {
            selected = Some(SelectedTrack { index, format });
        }
    }

    let track = selected.ok_or(PumpError::NoDecodableTrack)?;
    demuxer.select_track(track.index)?;
    info!("selected track {} ({})", track.index, track.format);

    Ok(track)
}
