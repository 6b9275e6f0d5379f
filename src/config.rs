//! Configuration types for soundfetch

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Options controlling one download invocation
///
/// Mirrors the flag surface of the original tool for the parts the pipeline
/// consumes. All fields have serde defaults so a partial config file works.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Continue when a downloaded file already exists instead of aborting
    #[serde(default)]
    pub continue_on_existing: bool,

    /// Re-apply metadata to an already-downloaded file without re-fetching audio
    #[serde(default)]
    pub force_metadata: bool,

    /// Overwrite existing files
    #[serde(default)]
    pub overwrite: bool,

    /// Track produced files so stale siblings can be removed afterwards
    #[serde(default)]
    pub remove_stale: bool,

    /// Restrict transcoded downloads to mp3
    #[serde(default)]
    pub only_mp3: bool,

    /// Prefer opus variants over mp3
    #[serde(default)]
    pub prefer_opus: bool,

    /// Never fetch the original file, even when available
    #[serde(default)]
    pub no_original: bool,

    /// Only download tracks whose original file is available
    #[serde(default)]
    pub only_original: bool,

    /// Fetch original-resolution artwork instead of the 500x500 rendition
    #[serde(default)]
    pub original_art: bool,

    /// Keep the original filename of original-file downloads
    #[serde(default)]
    pub original_name: bool,

    /// Keep the original metadata of downloads (skip tag assembly)
    #[serde(default)]
    pub original_metadata: bool,

    /// Derive the artist tag from the title instead of the username
    #[serde(default)]
    pub extract_artist: bool,

    /// Suppress album tags even when downloading within a playlist
    #[serde(default)]
    pub no_album_tag: bool,

    /// Convert lossless originals (wav/aiff) to FLAC
    #[serde(default)]
    pub convert_to_flac: bool,

    /// Skip tracks smaller than this many bytes
    #[serde(default)]
    pub min_size: u64,

    /// Skip tracks larger than this many bytes (None or 0 = unbounded)
    #[serde(default)]
    pub max_size: Option<u64>,

    /// Download archive ledger path; enables skip-if-present and sync
    #[serde(default)]
    pub archive_path: Option<PathBuf>,

    /// Suppress progress events
    #[serde(default)]
    pub hide_progress: bool,

    /// Abort the whole batch when any track fails
    #[serde(default)]
    pub strict: bool,

    /// Whether an authenticated session is available
    ///
    /// Gates original-file downloads; set by the catalog driver.
    #[serde(default)]
    pub authenticated: bool,

    /// Lock acquisition timeout in seconds (default: 10)
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            continue_on_existing: false,
            force_metadata: false,
            overwrite: false,
            remove_stale: false,
            only_mp3: false,
            prefer_opus: false,
            no_original: false,
            only_original: false,
            original_art: false,
            original_name: false,
            original_metadata: false,
            extract_artist: false,
            no_album_tag: false,
            convert_to_flac: false,
            min_size: 0,
            max_size: None,
            archive_path: None,
            hide_progress: false,
            strict: false,
            authenticated: false,
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl DownloadOptions {
    /// Lock acquisition timeout as a [`Duration`]
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Whether a pre-existing file may be passed over instead of aborting
    #[must_use]
    pub fn allows_existing(&self) -> bool {
        self.continue_on_existing || self.remove_stale || self.force_metadata
    }

    /// Transcoded-variant preference list, best first, as (preset prefix, extension)
    ///
    /// `only_mp3` restricts to mp3; otherwise aac leads, with opus slotted
    /// ahead of mp3 when preferred.
    #[must_use]
    pub fn transcode_preferences(&self) -> Vec<(&'static str, &'static str)> {
        let mut presets = vec![("mp3", ".mp3")];
        if !self.only_mp3 {
            if self.prefer_opus {
                presets.insert(0, ("opus", ".opus"));
            }
            presets.insert(0, ("aac", ".m4a"));
        }
        presets
    }
}

fn default_lock_timeout_secs() -> u64 {
    10
}

/// Parse a size string with an optional k/m/g suffix into bytes
///
/// # Examples
///
/// ```
/// use soundfetch::config::parse_size;
///
/// assert_eq!(parse_size("500").unwrap(), 500);
/// assert_eq!(parse_size("10m").unwrap(), 10 * 1024 * 1024);
/// ```
///
/// # Errors
///
/// Returns [`Error::Protocol`] when the string is empty, has an unknown
/// suffix, or the numeric part does not parse.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Protocol("empty size string".to_string()));
    }
    let (digits, multiplier) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1024u64),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (s, 1),
        _ => return Err(Error::Protocol(format!("unknown size suffix in {s:?}"))),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid size {s:?}")))?;
    Ok(value * multiplier)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        let opts = DownloadOptions::default();
        assert_eq!(opts.min_size, 0);
        assert!(opts.max_size.is_none());
        assert_eq!(opts.lock_timeout(), Duration::from_secs(10));
        assert!(!opts.allows_existing());
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let opts: DownloadOptions =
            serde_json::from_str(r#"{ "only_mp3": true, "min_size": 1000 }"#).unwrap();
        assert!(opts.only_mp3);
        assert_eq!(opts.min_size, 1000);
        assert_eq!(opts.lock_timeout_secs, 10);
    }

    #[test]
    fn preference_order_defaults_to_aac_then_mp3() {
        let opts = DownloadOptions::default();
        assert_eq!(
            opts.transcode_preferences(),
            vec![("aac", ".m4a"), ("mp3", ".mp3")]
        );
    }

    #[test]
    fn preference_order_slots_opus_before_mp3() {
        let opts = DownloadOptions {
            prefer_opus: true,
            ..Default::default()
        };
        assert_eq!(
            opts.transcode_preferences(),
            vec![("aac", ".m4a"), ("opus", ".opus"), ("mp3", ".mp3")]
        );
    }

    #[test]
    fn only_mp3_restricts_preferences() {
        let opts = DownloadOptions {
            only_mp3: true,
            prefer_opus: true,
            ..Default::default()
        };
        assert_eq!(opts.transcode_preferences(), vec![("mp3", ".mp3")]);
    }

    #[test]
    fn parse_size_accepts_plain_and_suffixed_values() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("500k").unwrap(), 500 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("10x").is_err());
        assert!(parse_size("m").is_err());
    }
}
