//! Core types for soundfetch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a track
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl TrackId {
    /// Create a new TrackId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TrackId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TrackId> for u64 {
    fn from(id: TrackId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TrackId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Download policy attached to a track by the catalog
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DownloadPolicy {
    /// Track is geo-blocked for the caller
    Block,
    /// Track may be fetched
    #[default]
    #[serde(other)]
    Allow,
}

impl DownloadPolicy {
    /// Whether the policy forbids any access for the caller
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, DownloadPolicy::Block)
    }
}

/// Owning user of a track
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackUser {
    /// Numeric user id
    pub id: u64,
    /// Display name, used as the default artist tag
    pub username: String,
    /// Avatar image URL, artwork fallback when the track has none
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Delivery protocol of an encoded variant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProtocol {
    /// Segmented HLS stream, fetched by the transcoding engine directly
    Hls,
    /// Single progressive HTTP stream
    Progressive,
}

/// One available encoded form of a track (format + protocol + locator)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Codec preset name, e.g. `mp3_1_0`, `aac_160k`, `opus_0_0`
    pub preset: String,
    /// Delivery protocol
    pub protocol: StreamProtocol,
    /// Locator to resolve into a fetchable stream URL via the catalog
    pub url: String,
}

/// Immutable view of a remote track, supplied by the catalog collaborator
///
/// The only field the pipeline ever rewrites is the display title, and only
/// as the derived result of artist extraction (see
/// [`crate::metadata::MetadataRecord`]); the descriptor itself is not mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// Numeric track id
    pub id: TrackId,
    /// Track title
    pub title: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Whether the catalog marks the track streamable
    pub streamable: bool,
    /// Whether the owner allows original-file downloads
    #[serde(default)]
    pub downloadable: bool,
    /// Geo-block policy
    #[serde(default)]
    pub policy: DownloadPolicy,
    /// Owning user
    pub user: TrackUser,
    /// Artwork image URL (500x500 form; size is substituted on fetch)
    #[serde(default)]
    pub artwork_url: Option<String>,
    /// Canonical link to the track
    pub permalink_url: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Genre tag
    #[serde(default)]
    pub genre: Option<String>,
    /// Creation time, used for the album date tag and output mtime
    pub created_at: DateTime<Utc>,
    /// Secret token for private tracks
    #[serde(default)]
    pub secret_token: Option<String>,
    /// Available encoded variants
    #[serde(default)]
    pub variants: Vec<Variant>,
}

/// Playlist position data used only for album-tag metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistContext {
    /// Playlist author username
    pub author: String,
    /// Playlist id
    pub id: u64,
    /// Playlist title
    pub title: String,
    /// 1-based position of the current track, zero-padded to the digit
    /// width of the playlist size
    pub track_number: String,
}

impl PlaylistContext {
    /// Zero-pad a 1-based track position to the digit width of the playlist size
    ///
    /// ```
    /// use soundfetch::types::PlaylistContext;
    ///
    /// assert_eq!(PlaylistContext::position(3, 120), "003");
    /// assert_eq!(PlaylistContext::position(3, 9), "3");
    /// ```
    #[must_use]
    pub fn position(counter: usize, playlist_len: usize) -> String {
        let digits = playlist_len.to_string().len();
        format!("{counter:0digits$}")
    }
}

/// Why a track was skipped without an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Another invocation holds the per-track lock
    LockBusy,
}

/// Outcome of one per-track operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Audio was fetched and the file written
    Downloaded {
        /// Output filename (relative to the working directory)
        filename: String,
    },
    /// File already existed; no audio was fetched (tags may have been rewritten)
    AlreadyPresent {
        /// Existing filename
        filename: String,
    },
    /// Track was skipped without error
    Skipped(SkipReason),
}

/// Events emitted by the pipeline on the broadcast channel
///
/// Consumers subscribe via [`crate::downloader::Downloader::subscribe`]; no
/// polling required. Progress events are suppressed when the caller hides
/// progress, lifecycle events always flow.
#[derive(Clone, Debug)]
pub enum Event {
    /// Per-track operation started
    TrackStarted {
        /// Track id
        id: TrackId,
        /// Display title
        title: String,
    },
    /// Bytes received from the network source
    StreamProgress {
        /// Track id
        id: TrackId,
        /// Cumulative bytes received
        received: u64,
        /// Declared total bytes
        total: u64,
    },
    /// Transcode position advanced
    TranscodeProgress {
        /// Track id
        id: TrackId,
        /// Cumulative position in seconds, clamped to the track duration
        position_secs: f64,
        /// Non-negative advancement since the previous report
        delta_secs: f64,
    },
    /// Per-track operation finished successfully
    TrackFinished {
        /// Track id
        id: TrackId,
        /// Output filename
        filename: String,
    },
    /// Track id appended to the download archive
    ArchiveRecorded {
        /// Track id
        id: TrackId,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_id_display_and_parse_round_trip() {
        let id = TrackId::new(128034234);
        assert_eq!(id.to_string(), "128034234");
        assert_eq!("128034234".parse::<TrackId>().unwrap(), id);
    }

    #[test]
    fn policy_deserializes_block_and_tolerates_unknown() {
        let p: DownloadPolicy = serde_json::from_str("\"BLOCK\"").unwrap();
        assert!(p.is_blocked());
        let p: DownloadPolicy = serde_json::from_str("\"MONETIZE\"").unwrap();
        assert!(!p.is_blocked());
    }

    #[test]
    fn playlist_position_pads_to_playlist_width() {
        assert_eq!(PlaylistContext::position(1, 5), "1");
        assert_eq!(PlaylistContext::position(7, 42), "07");
        assert_eq!(PlaylistContext::position(42, 100), "042");
    }

    #[test]
    fn descriptor_deserializes_from_catalog_payload() {
        let payload = serde_json::json!({
            "id": 42,
            "title": "Night Drive",
            "duration_ms": 183000,
            "streamable": true,
            "downloadable": true,
            "policy": "ALLOW",
            "user": { "id": 7, "username": "citylights" },
            "permalink_url": "https://example.com/citylights/night-drive",
            "created_at": "2021-06-01T12:00:00Z",
            "variants": [
                { "preset": "mp3_1_0", "protocol": "hls", "url": "https://example.com/v/mp3" }
            ]
        });
        let track: TrackDescriptor = serde_json::from_value(payload).unwrap();
        assert_eq!(track.id, TrackId::new(42));
        assert_eq!(track.variants.len(), 1);
        assert_eq!(track.variants[0].protocol, StreamProtocol::Hls);
        assert!(track.artwork_url.is_none());
    }
}
