//! Filename derivation for downloaded tracks
//!
//! The naming scheme is owned by the embedding application; the pipeline
//! consumes it through [`TrackNamer`]. [`DefaultNamer`] provides the
//! `"{username} - {title}"` scheme with sanitization: no path separators or
//! control characters, never a hidden (dot-prefixed) name, and a byte-bounded
//! length so the name fits any common filesystem.

use crate::types::{PlaylistContext, TrackDescriptor};

/// Replacement glyph for characters that cannot appear in a filename
const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Maximum filename length in bytes, including the extension
const MAX_FILENAME_BYTES: usize = 255;

/// Derives the output filename for a track
pub trait TrackNamer: Send + Sync {
    /// Produce a sanitized filename for `track`
    ///
    /// `original_filename` is the server-provided name of an original-file
    /// download; when present its extension wins over `ext`.
    fn filename(
        &self,
        track: &TrackDescriptor,
        ext: Option<&str>,
        original_filename: Option<&str>,
        playlist: Option<&PlaylistContext>,
    ) -> String;
}

/// `"{username} - {title}"` naming with sanitization
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultNamer;

impl TrackNamer for DefaultNamer {
    fn filename(
        &self,
        track: &TrackDescriptor,
        ext: Option<&str>,
        original_filename: Option<&str>,
        playlist: Option<&PlaylistContext>,
    ) -> String {
        let ext = original_filename
            .and_then(extension_of)
            .or(ext)
            .unwrap_or("");
        let stem = match playlist {
            Some(ctx) => format!(
                "{} - {} - {}",
                ctx.track_number, track.user.username, track.title
            ),
            None => format!("{} - {}", track.user.username, track.title),
        };
        sanitize(&stem, ext)
    }
}

/// Extension (with leading dot) of a filename, if any
fn extension_of(name: &str) -> Option<&str> {
    let dot = name.rfind('.')?;
    // A lone leading dot is a hidden-file marker, not an extension
    if dot == 0 { None } else { Some(&name[dot..]) }
}

/// Sanitize a stem and append an extension, bounding the total byte length
///
/// Dot-prefixed stems are renamed so the file is never hidden; trailing dots
/// are padded when there is no extension to absorb them.
#[must_use]
pub fn sanitize(stem: &str, ext: &str) -> String {
    let mut name: String = stem
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c == ':' || c == '*' || c == '?' || c == '"' || c == '<'
                || c == '>' || c == '|' || c == '\0' || c.is_control()
            {
                REPLACEMENT_CHAR
            } else {
                c
            }
        })
        .collect();
    if name.starts_with('.') {
        name.insert(0, '_');
    }
    if name.ends_with('.') && ext.is_empty() {
        name.push('_');
    }
    let budget = MAX_FILENAME_BYTES.saturating_sub(ext.len());
    name = truncate_bytes(&name, budget);
    name + ext
}

/// Truncate a string to at most `max` bytes without splitting a character
fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
