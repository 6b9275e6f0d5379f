//! Metadata assembly for freshly encoded audio buffers
//!
//! Collects everything known about a track into an immutable
//! [`MetadataRecord`], fetches cover artwork, and writes the tag set into the
//! in-memory audio buffer before it ever reaches the destination filename.
//! Tagging uses lofty for container detection, so the same record applies to
//! MP4, MP3, Opus, Vorbis, FLAC and WAV outputs.

use std::io::Cursor;
use std::time::Duration;

use lofty::config::WriteOptions;
use lofty::file::{FileType, TaggedFileExt};
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag, TagExt, TagType};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, redirect};
use tracing::{debug, warn};

use crate::config::DownloadOptions;
use crate::types::{PlaylistContext, TrackDescriptor};

/// Artwork fetches give up after this long
const ARTWORK_TIMEOUT: Duration = Duration::from_secs(5);

/// Title separators that indicate an embedded artist name, tried in order
const TITLE_SEPARATORS: &[&str] = &[" - ", " − ", " – ", " — ", " ― "];

/// Container families the assembler can tag
///
/// Maps a detected file type to the tag type written into it and whether the
/// family supports embedded pictures.
const ASSEMBLERS: &[(FileType, TagType, bool)] = &[
    (FileType::Mp4, TagType::Mp4Ilst, true),
    (FileType::Mpeg, TagType::Id3v2, true),
    (FileType::Opus, TagType::VorbisComments, true),
    (FileType::Vorbis, TagType::VorbisComments, true),
    (FileType::Flac, TagType::VorbisComments, true),
    // RIFF-INFO has no picture chunk; text fields only
    (FileType::Wav, TagType::RiffInfo, false),
];

/// Everything to be written into a track's tags, immutable once built
#[derive(Debug, Clone)]
pub struct MetadataRecord {
    /// Tag artist, either the uploader or extracted from the title
    pub artist: String,
    /// Tag title, with any extracted artist prefix removed
    pub title: String,
    /// Track description, written as the comment field
    pub description: Option<String>,
    /// Genre label
    pub genre: Option<String>,
    /// Cover image bytes (PNG or JPEG), when one could be fetched
    pub artwork: Option<Vec<u8>>,
    /// Public page for the track
    pub link: String,
    /// Upload timestamp, `YYYY-MM-DD HH:MM:SS`
    pub date: String,
    /// Album title, present only in playlist context
    pub album_title: Option<String>,
    /// Album artist, present only in playlist context
    pub album_author: Option<String>,
    /// Position within the playlist
    pub album_track_number: Option<u32>,
}

impl MetadataRecord {
    /// Build the record for one track
    ///
    /// Honors `extract_artist` (split the title on the first known separator)
    /// and `no_album_tag` (suppress album fields even inside a playlist).
    #[must_use]
    pub fn build(
        track: &TrackDescriptor,
        playlist: Option<&PlaylistContext>,
        options: &DownloadOptions,
        artwork: Option<Vec<u8>>,
    ) -> Self {
        let uploader = track.user.username.clone();
        let (artist, title) = if options.extract_artist {
            match split_artist_title(&track.title) {
                Some((artist, title)) => (artist.to_string(), title.to_string()),
                None => (uploader, track.title.clone()),
            }
        } else {
            (uploader, track.title.clone())
        };

        let album = playlist.filter(|_| !options.no_album_tag);

        Self {
            artist,
            title,
            description: track.description.clone(),
            genre: track.genre.clone(),
            artwork,
            link: track.permalink_url.clone(),
            date: track.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            album_title: album.map(|p| p.title.clone()),
            album_author: album.map(|p| p.author.clone()),
            album_track_number: album.and_then(|p| p.track_number.parse().ok()),
        }
    }
}

/// Split a title into (artist, title) on the first known separator
///
/// Returns `None` when no separator occurs; both halves come back trimmed.
#[must_use]
pub fn split_artist_title(title: &str) -> Option<(&str, &str)> {
    for sep in TITLE_SEPARATORS {
        if let Some((artist, rest)) = title.split_once(sep) {
            return Some((artist.trim(), rest.trim()));
        }
    }
    None
}

/// HTTP client for artwork probes: short timeout, redirects not followed
///
/// # Errors
///
/// Propagates client construction failure from reqwest.
pub fn artwork_client() -> reqwest::Result<Client> {
    Client::builder()
        .timeout(ARTWORK_TIMEOUT)
        .redirect(redirect::Policy::none())
        .build()
}

/// Candidate artwork URLs in preference order
///
/// The catalog hands out `large` (100x100) thumbnails; bigger renditions live
/// at sibling URLs. `original_art` additionally tries the uncompressed upload
/// before the 500x500 rendition. Falls back to the uploader's avatar when the
/// track has no artwork at all.
fn artwork_candidates(track: &TrackDescriptor, original_art: bool) -> Vec<String> {
    let Some(base) = track
        .artwork_url
        .as_deref()
        .or(track.user.avatar_url.as_deref())
    else {
        return Vec::new();
    };
    let sizes: &[&str] = if original_art {
        &["original", "t500x500"]
    } else {
        &["t500x500"]
    };
    sizes.iter().map(|s| base.replace("large", s)).collect()
}

/// Fetch cover artwork for a track, trying renditions in preference order
///
/// Any failure (non-2xx, redirect, wrong content type, network error) moves
/// on to the next candidate; running out of candidates means "no artwork",
/// never an error.
pub async fn fetch_artwork(
    client: &Client,
    track: &TrackDescriptor,
    original_art: bool,
) -> Option<Vec<u8>> {
    for url in artwork_candidates(track, original_art) {
        if let Some(bytes) = try_fetch(client, &url).await {
            return Some(bytes);
        }
        debug!(track_id = track.id.0, url = %url, "artwork rendition not usable");
    }
    None
}

async fn try_fetch(client: &Client, url: &str) -> Option<Vec<u8>> {
    let response = client.get(url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)?
        .to_str()
        .ok()?
        .to_ascii_lowercase();
    if !matches!(
        content_type.as_str(),
        "image/png" | "image/jpeg" | "image/jpg"
    ) {
        return None;
    }
    response.bytes().await.ok().map(|b| b.to_vec())
}

/// Result of tagging a buffer
#[derive(Debug)]
pub enum AssembleOutcome {
    /// Tags were written; the buffer has been rewritten around them
    Tagged(Vec<u8>),
    /// The container is not taggable; the buffer is returned untouched
    Unsupported(Vec<u8>),
}

impl AssembleOutcome {
    /// The audio bytes, tagged or not
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Tagged(bytes) | Self::Unsupported(bytes) => bytes,
        }
    }
}

/// Write the record's tag set into an audio buffer
///
/// Detects the container, strips every pre-existing tag, picks the matching
/// tag family and rewrites the buffer with the tags embedded. Unrecognized
/// containers and tagging failures degrade to
/// [`AssembleOutcome::Unsupported`] with a diagnostic log; the caller still
/// gets playable audio either way.
#[must_use]
pub fn assemble(buffer: Vec<u8>, record: &MetadataRecord) -> AssembleOutcome {
    let mut cursor = Cursor::new(buffer);

    let parsed = Probe::new(&mut cursor)
        .guess_file_type()
        .ok()
        .and_then(|probe| probe.read().ok());
    cursor.set_position(0);

    let file_type = parsed.as_ref().map(TaggedFileExt::file_type);
    let Some(&(_, tag_type, supports_pictures)) = file_type
        .and_then(|ft| ASSEMBLERS.iter().find(|(known, _, _)| *known == ft))
    else {
        let buffer = cursor.into_inner();
        warn!(
            link = %record.link,
            detected = ?file_type,
            fingerprint = %hex_fingerprint(&buffer),
            "container not taggable, leaving audio as-is"
        );
        return AssembleOutcome::Unsupported(buffer);
    };

    // Strip every tag already in the buffer, whatever its type, so stale
    // fields never survive a rewrite. Writing the new tag only replaces tags
    // of its own family.
    if let Some(parsed) = &parsed {
        for existing in parsed.tags() {
            let existing = existing.tag_type();
            if let Err(error) = existing.remove_from(&mut cursor) {
                warn!(link = %record.link, ?existing, %error, "could not strip existing tag");
            }
            cursor.set_position(0);
        }
    }

    let mut tag = Tag::new(tag_type);
    tag.set_artist(record.artist.clone());
    tag.set_title(record.title.clone());
    if let Some(description) = &record.description {
        tag.set_comment(description.clone());
    }
    if let Some(genre) = &record.genre {
        tag.set_genre(genre.clone());
    }
    tag.insert_text(ItemKey::AudioSourceUrl, record.link.clone());
    tag.insert_text(ItemKey::RecordingDate, record.date.clone());
    if let Some(album) = &record.album_title {
        tag.set_album(album.clone());
    }
    if let Some(author) = &record.album_author {
        tag.insert_text(ItemKey::AlbumArtist, author.clone());
    }
    if let Some(number) = record.album_track_number {
        tag.set_track(number);
    }
    if supports_pictures
        && let Some(artwork) = &record.artwork
    {
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            detect_image_mime(artwork),
            None,
            artwork.clone(),
        ));
    }

    match tag.save_to(&mut cursor, WriteOptions::default()) {
        Ok(()) => AssembleOutcome::Tagged(cursor.into_inner()),
        Err(error) => {
            let buffer = cursor.into_inner();
            warn!(
                link = %record.link,
                detected = ?file_type,
                fingerprint = %hex_fingerprint(&buffer),
                %error,
                "tag write failed, leaving audio as-is"
            );
            AssembleOutcome::Unsupported(buffer)
        }
    }
}

/// Sniff PNG/JPEG from magic bytes
fn detect_image_mime(data: &[u8]) -> Option<MimeType> {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some(MimeType::Png)
    } else if data.starts_with(&[0xFF, 0xD8]) {
        Some(MimeType::Jpeg)
    } else {
        None
    }
}

/// Hex of the first 16 bytes, for diagnosing unrecognized containers
fn hex_fingerprint(buffer: &[u8]) -> String {
    buffer
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
