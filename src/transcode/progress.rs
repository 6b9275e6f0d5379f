//! Parsing of the transcoding engine's diagnostic stream
//!
//! The engine writes `key=value` lines to its diagnostic channel when asked
//! for progress. `out_time_ms` carries the output position in microseconds;
//! everything that is not a recognized progress key is engine diagnostics and
//! is preserved verbatim for error reporting.

/// Keys the engine emits on its progress channel
const PROGRESS_KEYS: &[&str] = &[
    "progress",
    "speed",
    "drop_frames",
    "dup_frames",
    "out_time",
    "out_time_ms",
    "out_time_us",
    "total_size",
    "bitrate",
];

/// Split a diagnostic line into a recognized progress key/value pair
///
/// Returns `None` for anything that is not a progress line, which callers
/// accumulate as diagnostic text.
pub(crate) fn split_progress_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    PROGRESS_KEYS.contains(&key).then_some((key, value))
}

/// Converts `out_time_ms` values into clamped, monotonic progress reports
///
/// Positions are clamped to the track's known duration and deltas never
/// regress, so observers see a non-decreasing position and non-negative
/// increments within one transcode operation.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    total_secs: f64,
    last_secs: f64,
}

impl ProgressTracker {
    pub(crate) fn new(duration_ms: u64) -> Self {
        Self {
            total_secs: duration_ms as f64 / 1000.0,
            last_secs: 0.0,
        }
    }

    /// Advance from an `out_time_ms` value (microseconds); returns (position, delta) in seconds
    pub(crate) fn advance(&mut self, value: &str) -> (f64, f64) {
        // The engine occasionally emits N/A before the first frame
        let seconds = value.trim().parse::<i64>().unwrap_or(0) as f64 / 1_000_000.0;
        let seconds = seconds.min(self.total_secs);
        let delta = (seconds - self.last_secs).max(0.0);
        self.last_secs = self.last_secs.max(seconds);
        (self.last_secs, delta)
    }
}
