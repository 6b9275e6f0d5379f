//! Transcoded-variant acquisition
//!
//! When no original file is obtainable the track is fetched from its best
//! HLS variant. Variant choice follows a fixed preference order; the engine
//! pulls the segmented stream itself and remuxes it into a single file, so
//! the pipeline never re-encodes audio here.

use tracing::debug;

use crate::error::{Error, Result};
use crate::limits::SizeBounds;
use crate::progress::ProgressReporter;
use crate::transcode::{TranscodeInput, TranscodeRequest};
use crate::types::{PlaylistContext, StreamProtocol, TrackDescriptor, Variant};

use super::{Acquisition, Downloader};

/// Download the best available transcoded variant
///
/// `audio: None` inside the acquisition means the target file already
/// existed.
pub(crate) async fn download_transcoded(
    dl: &Downloader,
    track: &TrackDescriptor,
    playlist: Option<&PlaylistContext>,
    reporter: &ProgressReporter,
) -> Result<Acquisition> {
    let preferences = dl.options.transcode_preferences();
    let Some((variant, prefix, ext)) = select_variant(&track.variants, &preferences) else {
        return Err(Error::NoTranscodingAvailable {
            available: track.variants.iter().map(|v| v.preset.clone()).collect(),
        });
    };
    debug!(track_id = track.id.0, preset = %variant.preset, "selected variant");

    let filename = dl.namer.filename(track, Some(ext), None, playlist);
    if dl.check_existing(track, &filename).await? {
        return Ok(Acquisition {
            filename,
            audio: None,
        });
    }

    SizeBounds::from_options(&dl.options)
        .check(estimated_size(&variant.preset, track.duration_ms))?;

    let url = dl.catalog.stream_url(variant).await?;
    // The mp4 container cannot be remuxed to a pipe, hence the ipod codec
    // detour for aac; the engine handles the temp file internally.
    let codec = if prefix == "aac" { "ipod" } else { prefix };
    let audio = dl
        .engine
        .transcode(TranscodeRequest {
            input: TranscodeInput::Url(url),
            codec: codec.to_string(),
            copy_codec: true,
            duration_ms: track.duration_ms,
            reporter: reporter.clone(),
        })
        .await?;

    Ok(Acquisition {
        filename,
        audio: Some(audio),
    })
}

/// Pick the first variant matching the preference list
///
/// Preferences are tried in order; within one preference the first matching
/// HLS variant wins. Progressive variants are never selected — the engine
/// consumes segmented streams only.
pub(crate) fn select_variant<'a>(
    variants: &'a [Variant],
    preferences: &[(&'static str, &'static str)],
) -> Option<(&'a Variant, &'static str, &'static str)> {
    for &(prefix, ext) in preferences {
        if let Some(variant) = variants
            .iter()
            .find(|v| v.protocol == StreamProtocol::Hls && v.preset.starts_with(prefix))
        {
            return Some((variant, prefix, ext));
        }
    }
    None
}

/// Rough output size from the preset's nominal bitrate
///
/// aac variants run at 256 kbps, everything else at 128 kbps. One kbps is one
/// bit per millisecond, so bytes = duration_ms * kbps / 8.
pub(crate) fn estimated_size(preset: &str, duration_ms: u64) -> u64 {
    let kbps: u64 = if preset.contains("aac") { 256 } else { 128 };
    duration_ms * kbps / 8
}
