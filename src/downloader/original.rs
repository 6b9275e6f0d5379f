//! Original-file acquisition
//!
//! When the owner allows it, the catalog exposes the originally uploaded
//! file. This is the highest-fidelity source, so it is tried before any
//! transcoded variant. The server names the file through Content-Disposition;
//! lossless uploads can optionally be converted to FLAC on the way in.

use futures::TryStreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap};
use tracing::debug;

use crate::error::{Error, Result};
use crate::limits::SizeBounds;
use crate::naming;
use crate::progress::ProgressReporter;
use crate::stream_copy::copy_stream;
use crate::transcode::{TranscodeInput, TranscodeRequest};
use crate::types::{PlaylistContext, TrackDescriptor};

use super::{Acquisition, Downloader};

/// Header carrying the uploaded file's type when the content type is generic
const AMZ_FILE_TYPE: &str = "x-amz-meta-file-type";

/// Attempt to download the track's original file
///
/// Returns `Ok(None)` when no original is obtainable (no locator, or the
/// locator expired with 401/404); the caller falls through to the transcoded
/// path. `audio: None` inside the acquisition means the target file already
/// existed.
pub(crate) async fn try_download_original(
    dl: &Downloader,
    track: &TrackDescriptor,
    playlist: Option<&PlaylistContext>,
    reporter: &ProgressReporter,
) -> Result<Option<Acquisition>> {
    let Some(url) = dl
        .catalog
        .original_download_url(track.id, track.secret_token.as_deref())
        .await?
    else {
        return Ok(None);
    };

    let response = dl.http.get(&url).send().await?;
    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
            debug!(track_id = track.id.0, status = %response.status(), "original download link expired");
            return Ok(None);
        }
        status if !status.is_success() => {
            return Err(Error::Protocol(format!(
                "original download failed with status {status}"
            )));
        }
        _ => {}
    }

    let server_filename = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_disposition_filename)
        .ok_or_else(|| {
            Error::Protocol("could not determine original filename from headers".to_string())
        })?;
    let server_filename = ensure_extension(server_filename, response.headers())?;

    let to_flac = dl.options.convert_to_flac && can_convert(&server_filename);

    let mut filename = if dl.options.original_name {
        let (stem, ext) = split_name(&server_filename);
        naming::sanitize(stem, ext)
    } else {
        dl.namer
            .filename(track, None, Some(&server_filename), playlist)
    };
    if to_flac {
        let (stem, _) = split_name(&filename);
        filename = format!("{stem}.flac");
    }

    if dl.check_existing(track, &filename).await? {
        return Ok(Some(Acquisition {
            filename,
            audio: None,
        }));
    }

    let declared_len = response
        .content_length()
        .ok_or_else(|| Error::Protocol("original download has no content length".to_string()))?;
    SizeBounds::from_options(&dl.options).check(declared_len)?;

    let stream: crate::transcode::ByteStream =
        Box::pin(response.bytes_stream().map_err(std::io::Error::other));
    let audio = if to_flac {
        dl.engine
            .transcode(TranscodeRequest {
                input: TranscodeInput::Stream {
                    stream,
                    declared_len,
                },
                codec: "flac".to_string(),
                copy_codec: false,
                duration_ms: track.duration_ms,
                reporter: reporter.clone(),
            })
            .await?
    } else {
        let mut buffer = Vec::with_capacity(declared_len as usize);
        copy_stream(stream, declared_len, &mut buffer, reporter).await?;
        buffer
    };

    Ok(Some(Acquisition {
        filename,
        audio: Some(audio),
    }))
}

/// Whether a lossless original of this name can be converted to FLAC
pub(crate) fn can_convert(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.ends_with(".wav") || lower.ends_with(".aif") || lower.ends_with(".aiff")
}

/// Extract the filename from a Content-Disposition header value
///
/// Handles both the quoted and bare forms and percent-decodes the result.
fn parse_disposition_filename(value: &str) -> Option<String> {
    let idx = value.find("filename=")?;
    let rest = &value[idx + "filename=".len()..];
    let raw = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next()?
    } else {
        rest.split(';').next()?.trim()
    };
    let decoded = urlencoding::decode(raw).ok()?;
    let decoded = decoded.trim();
    (!decoded.is_empty()).then(|| decoded.to_string())
}

/// Make sure the filename carries an extension
///
/// Falls back to the response content type, then to the uploader-recorded
/// file type header.
fn ensure_extension(filename: String, headers: &HeaderMap) -> Result<String> {
    if !split_name(&filename).1.is_empty() {
        return Ok(filename);
    }
    if let Some(ext) = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(extension_for_content_type)
    {
        return Ok(format!("{filename}{ext}"));
    }
    if let Some(file_type) = headers.get(AMZ_FILE_TYPE).and_then(|v| v.to_str().ok()) {
        return Ok(format!("{filename}.{file_type}"));
    }
    Err(Error::Protocol(format!(
        "could not determine an extension for {filename:?}"
    )))
}

/// Split into (stem, extension-with-dot); a lone leading dot is not an extension
fn split_name(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(0) | None => (filename, ""),
        Some(dot) => (&filename[..dot], &filename[dot..]),
    }
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next()?.trim();
    match essence {
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some(".wav"),
        "audio/aiff" | "audio/x-aiff" => Some(".aif"),
        "audio/flac" | "audio/x-flac" => Some(".flac"),
        "audio/mpeg" => Some(".mp3"),
        "audio/mp4" | "audio/x-m4a" => Some(".m4a"),
        "audio/ogg" => Some(".ogg"),
        _ => None,
    }
}
