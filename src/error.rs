//! Error types for soundfetch
//!
//! This module provides the error taxonomy for the acquisition pipeline:
//! - Per-track failures (size bounds, truncated streams, transcode exits)
//! - Policy and availability failures (geo-blocked, no transcoding, no original)
//! - Resource contention (lock timeouts, treated as a silent skip by callers)
//! - The batch-abort policy (`Error::aborts_batch`)

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for soundfetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for soundfetch
///
/// Each variant carries the context a batch driver needs to decide whether to
/// continue with the next track or stop; see [`Error::aborts_batch`].
#[derive(Debug, Error)]
pub enum Error {
    /// Declared content length falls outside the configured size bounds
    #[error("declared length {length} bytes outside bounds [{min}, {max:?}]")]
    SizeBounds {
        /// Header-declared content length in bytes
        length: u64,
        /// Configured minimum size in bytes
        min: u64,
        /// Configured maximum size in bytes (None = unbounded)
        max: Option<u64>,
    },

    /// Network stream ended before the declared number of bytes arrived
    #[error("connection closed prematurely: received {received} of {expected} bytes")]
    TruncatedStream {
        /// Bytes the source declared it would deliver
        expected: u64,
        /// Bytes actually received before end of stream
        received: u64,
    },

    /// The external transcoding engine exited with a non-zero status
    #[error("transcode engine error ({code:?}): {diagnostics}")]
    Transcode {
        /// Process exit code, if one was reported
        code: Option<i32>,
        /// Diagnostic text captured from the engine's stderr
        diagnostics: String,
    },

    /// Track is not available in the caller's region
    #[error("\"{title}\" is not available in your location")]
    Blocked {
        /// Display title of the blocked track
        title: String,
    },

    /// No transcoded variant matched the preference list
    #[error("no valid transcoding found; available: {available:?}")]
    NoTranscodingAvailable {
        /// Preset names of the variants the catalog offered
        available: Vec<String>,
    },

    /// Caller required the original file but none could be obtained
    #[error("track \"{url}\" does not have an original file available")]
    OriginalUnavailable {
        /// Canonical link of the track
        url: String,
    },

    /// Target file already exists and no override flag was given
    ///
    /// This aborts the whole invocation, not just the current track; run with
    /// the continue/overwrite/force-metadata options to proceed past it.
    #[error("\"{filename}\" already exists (pass an override option to continue)")]
    ExistingFile {
        /// The pre-existing target filename
        filename: String,
    },

    /// Could not acquire a resource lock within the timeout
    ///
    /// Another worker owns the resource; callers skip the track instead of
    /// treating this as a hard failure.
    #[error("could not acquire lock on {path:?}")]
    LockTimeout {
        /// Path the lock file derives from
        path: PathBuf,
    },

    /// Output file missing after a supposedly successful download
    #[error("an error occurred downloading {filename}: output file missing")]
    PostDownloadVerification {
        /// The filename that should have existed
        filename: String,
    },

    /// Download archive ledger could not be read or written
    #[error("archive error: {0}")]
    Archive(String),

    /// Remote endpoint violated the expected protocol (missing headers, bad payloads)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Catalog collaborator failure
    #[error("catalog error: {0}")]
    Catalog(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl Error {
    /// Whether this error should terminate the whole batch
    ///
    /// `ExistingFile` always aborts (pre-existing output is an explicit stop
    /// condition). Policy and availability failures abort only in strict mode.
    /// Lock timeouts never abort; callers convert them to a skip before they
    /// reach the batch driver.
    #[must_use]
    pub fn aborts_batch(&self, strict: bool) -> bool {
        match self {
            Error::ExistingFile { .. } => true,
            Error::LockTimeout { .. } => false,
            _ => strict,
        }
    }
}
