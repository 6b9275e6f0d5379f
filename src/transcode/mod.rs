//! Transcoding through an external engine process
//!
//! The engine is a subprocess reached through pipes: optionally fed on stdin
//! from a network stream, optionally drained on stdout into memory, and always
//! observed on stderr where it reports progress as `key=value` lines. The
//! [`TranscodeEngine`] trait keeps the pipeline testable and the concrete
//! binary swappable.

mod ffmpeg;
mod progress;

pub use ffmpeg::FfmpegEngine;

use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use crate::stream_copy::copy_stream;

use progress::{split_progress_line, ProgressTracker};

/// A network byte stream ready to be piped into the engine
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Where the engine reads its input from
pub enum TranscodeInput {
    /// Feed these bytes over stdin; the engine sees `-` as its input
    Stream {
        /// The bytes to feed
        stream: ByteStream,
        /// Content length declared by the source, for truncation detection
        declared_len: u64,
    },
    /// Let the engine fetch the input itself
    Url(String),
}

impl std::fmt::Debug for TranscodeInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream { declared_len, .. } => f
                .debug_struct("Stream")
                .field("declared_len", declared_len)
                .finish_non_exhaustive(),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// One transcode operation
#[derive(Debug)]
pub struct TranscodeRequest {
    /// Input source
    pub input: TranscodeInput,
    /// Target codec name as the engine knows it (e.g. `ipod`, `mp3`, `flac`)
    pub codec: String,
    /// Pass the audio through without re-encoding (container remux only)
    pub copy_codec: bool,
    /// Track duration, for clamping progress reports
    pub duration_ms: u64,
    /// Progress sink for this track
    pub reporter: ProgressReporter,
}

/// Trait for the external transcoding engine
///
/// Implementations run the actual engine binary; tests substitute an
/// in-process fake. The output is always returned in memory so metadata can
/// be assembled before anything touches the destination filename.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Run one transcode operation to completion and return the encoded bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transcode`] when the engine exits non-zero,
    /// [`Error::TruncatedStream`] when the input stream ended early, or
    /// [`Error::Io`] on pipe failures.
    async fn transcode(&self, request: TranscodeRequest) -> Result<Vec<u8>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Drive a configured engine command to completion
///
/// Spawns the process, then runs up to three concurrent legs: a feed task
/// writing the input stream to stdin, a drain task collecting stdout, and the
/// progress loop on the calling task reading stderr line by line. Lines that
/// are not recognized progress reports are kept as diagnostics for the error
/// path.
pub(crate) async fn run_pipeline(
    mut cmd: Command,
    input: TranscodeInput,
    capture_stdout: bool,
    duration_ms: u64,
    reporter: &ProgressReporter,
) -> Result<Vec<u8>> {
    let feed_source = match input {
        TranscodeInput::Stream {
            stream,
            declared_len,
        } => Some((stream, declared_len)),
        TranscodeInput::Url(_) => None,
    };

    cmd.stdin(if feed_source.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(if capture_stdout {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;

    let feed_task = match feed_source {
        Some((stream, declared_len)) => {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| std::io::Error::other("engine stdin pipe missing"))?;
            let reporter = reporter.clone();
            Some(tokio::spawn(async move {
                // Closing stdin on completion is what signals end of input
                copy_stream(stream, declared_len, &mut stdin, &reporter).await
            }))
        }
        None => None,
    };

    let drain_task = if capture_stdout {
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("engine stdout pipe missing"))?;
        Some(tokio::spawn(async move {
            let mut encoded = Vec::new();
            stdout.read_to_end(&mut encoded).await.map(|_| encoded)
        }))
    } else {
        None
    };

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("engine stderr pipe missing"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut tracker = ProgressTracker::new(duration_ms);
    let mut diagnostics = String::new();
    while let Some(line) = lines.next_line().await? {
        match split_progress_line(&line) {
            Some(("out_time_ms", value)) => {
                let (position_secs, delta_secs) = tracker.advance(value);
                reporter.transcode_progress(position_secs, delta_secs);
            }
            Some(_) => {}
            None => {
                diagnostics.push_str(&line);
                diagnostics.push('\n');
            }
        }
    }

    let feed_result = match feed_task {
        Some(handle) => Some(
            handle
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))?,
        ),
        None => None,
    };
    let drain_result = match drain_task {
        Some(handle) => Some(
            handle
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))?,
        ),
        None => None,
    };

    let status = child.wait().await?;

    // A truncated input explains any engine failure better than the engine's
    // own exit status does, so it wins.
    match feed_result.and_then(std::result::Result::err) {
        Some(err @ Error::TruncatedStream { .. }) => return Err(err),
        feed_err => {
            if !status.success() {
                warn!(code = ?status.code(), "transcoding engine failed");
                return Err(Error::Transcode {
                    code: status.code(),
                    diagnostics,
                });
            }
            if let Some(err) = feed_err {
                return Err(err);
            }
        }
    }

    let encoded = match drain_result {
        Some(collected) => collected?,
        None => Vec::new(),
    };
    debug!(bytes = encoded.len(), "transcoding engine finished");
    Ok(encoded)
}
