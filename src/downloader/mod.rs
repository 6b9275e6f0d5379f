//! Per-track download orchestration
//!
//! [`Downloader`] composes the catalog, transcoding engine, namer, ledger and
//! lock registry into the sequential per-track state machine: policy check,
//! original-file attempt, transcoded fallback, metadata assembly,
//! finalization. Batch iteration order and retries stay with the caller; each
//! call handles exactly one track.

mod original;
mod transcoded;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use reqwest::Client;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::archive::{DownloadArchive, KNOWN_EXTENSIONS};
use crate::catalog::Catalog;
use crate::config::DownloadOptions;
use crate::error::{Error, Result};
use crate::lock::{FileLock, LockRegistry};
use crate::metadata::{self, MetadataRecord};
use crate::naming::TrackNamer;
use crate::progress::ProgressReporter;
use crate::transcode::TranscodeEngine;
use crate::types::{Event, PlaylistContext, SkipReason, TrackDescriptor, TrackOutcome};

/// Capacity of the broadcast event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Result of an acquisition phase: where the audio goes and what was fetched
///
/// `audio: None` means the target already existed and nothing was fetched.
pub(crate) struct Acquisition {
    pub(crate) filename: String,
    pub(crate) audio: Option<Vec<u8>>,
}

/// Sequential per-track download pipeline
pub struct Downloader {
    options: DownloadOptions,
    http: Client,
    artwork_http: Client,
    catalog: Arc<dyn Catalog>,
    engine: Arc<dyn TranscodeEngine>,
    namer: Arc<dyn TrackNamer>,
    archive: Option<DownloadArchive>,
    locks: LockRegistry,
    event_tx: broadcast::Sender<Event>,
    files_kept: Mutex<Vec<String>>,
}

impl Downloader {
    /// Assemble a pipeline from its collaborators
    ///
    /// The archive ledger is attached when `options.archive_path` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] when an HTTP client cannot be constructed.
    pub fn new(
        options: DownloadOptions,
        catalog: Arc<dyn Catalog>,
        engine: Arc<dyn TranscodeEngine>,
        namer: Arc<dyn TrackNamer>,
    ) -> Result<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let locks = LockRegistry::new();
        let archive = options.archive_path.clone().map(|path| {
            DownloadArchive::new(path, locks.clone(), options.lock_timeout())
        });
        Ok(Self {
            http: Client::builder().build()?,
            artwork_http: metadata::artwork_client()?,
            options,
            catalog,
            engine,
            namer,
            archive,
            locks,
            event_tx,
            files_kept: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to pipeline events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The attached download archive, if any
    #[must_use]
    pub fn archive(&self) -> Option<&DownloadArchive> {
        self.archive.as_ref()
    }

    /// The lock registry, for exit-time cleanup wiring
    #[must_use]
    pub fn locks(&self) -> LockRegistry {
        self.locks.clone()
    }

    /// Remove every lock file this pipeline created
    ///
    /// Safe to call at any time, normally on interrupt.
    pub fn cleanup_locks(&self) {
        self.locks.cleanup();
    }

    /// Download one track into the working directory
    ///
    /// Tries the original file first when permitted, falling back to the best
    /// transcoded variant, then assembles metadata and finalizes. Events are
    /// emitted on the broadcast channel throughout.
    ///
    /// # Errors
    ///
    /// Per-track failures surface as the corresponding [`Error`] variant; the
    /// caller decides whether the batch continues via
    /// [`Error::aborts_batch`]. A busy per-track lock is not an error and
    /// yields [`TrackOutcome::Skipped`].
    pub async fn download_track(
        &self,
        track: &TrackDescriptor,
        playlist: Option<&PlaylistContext>,
    ) -> Result<TrackOutcome> {
        self.event_tx
            .send(Event::TrackStarted {
                id: track.id,
                title: track.title.clone(),
            })
            .ok();

        if track.policy.is_blocked() {
            return Err(Error::Blocked {
                title: track.title.clone(),
            });
        }

        // Zero timeout: a sibling invocation working on the same track is
        // expected, not exceptional.
        let id_path = track.id.to_string();
        let _track_guard =
            match FileLock::acquire(Path::new(&id_path), Duration::ZERO, &self.locks).await {
                Ok(guard) => guard,
                Err(Error::LockTimeout { .. }) => {
                    debug!(track_id = track.id.0, "track is locked by another invocation");
                    return Ok(TrackOutcome::Skipped(SkipReason::LockBusy));
                }
                Err(e) => return Err(e),
            };

        let reporter = ProgressReporter::new(
            self.event_tx.clone(),
            track.id,
            !self.options.hide_progress,
        );

        let mut acquisition = None;
        if self.wants_original(track) {
            acquisition = original::try_download_original(self, track, playlist, &reporter).await?;
        }
        let acquisition = match acquisition {
            Some(acquisition) => acquisition,
            None if self.options.only_original => {
                return Err(Error::OriginalUnavailable {
                    url: track.permalink_url.clone(),
                });
            }
            None => transcoded::download_transcoded(self, track, playlist, &reporter).await?,
        };

        let outcome = match acquisition.audio {
            Some(audio) => {
                let audio = if self.options.original_metadata {
                    audio
                } else {
                    self.apply_metadata(audio, track, playlist).await
                };
                tokio::fs::write(&acquisition.filename, &audio).await?;
                info!(track_id = track.id.0, filename = %acquisition.filename, "downloaded");
                TrackOutcome::Downloaded {
                    filename: acquisition.filename.clone(),
                }
            }
            None => {
                if self.options.force_metadata {
                    self.retag_existing(&acquisition.filename, track, playlist)
                        .await?;
                }
                info!(track_id = track.id.0, filename = %acquisition.filename, "already downloaded");
                TrackOutcome::AlreadyPresent {
                    filename: acquisition.filename.clone(),
                }
            }
        };

        let fresh = matches!(outcome, TrackOutcome::Downloaded { .. });
        self.finalize(track, &acquisition.filename, fresh).await?;
        Ok(outcome)
    }

    /// Produced filenames, in completion order
    #[must_use]
    pub fn files_kept(&self) -> Vec<String> {
        self.files_kept
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Delete audio files in the working directory that this run did not produce
    ///
    /// Only meaningful with `remove_stale`; any other configuration is a
    /// no-op. Only files with known audio extensions are considered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the working directory cannot be listed.
    pub async fn remove_unkept_files(&self) -> Result<()> {
        if !self.options.remove_stale {
            return Ok(());
        }
        let kept: HashSet<String> = self.files_kept().into_iter().collect();
        let mut entries = tokio::fs::read_dir(".").await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_audio = KNOWN_EXTENSIONS.iter().any(|ext| name.ends_with(ext));
            if !is_audio || kept.contains(&name) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => info!(filename = %name, "removed stale file"),
                Err(e) => warn!(filename = %name, error = %e, "could not remove stale file"),
            }
        }
        Ok(())
    }

    /// Whether the original-file path should be attempted for this track
    fn wants_original(&self, track: &TrackDescriptor) -> bool {
        let owned = self.catalog.user_id() == Some(track.user.id);
        (track.downloadable || owned)
            && !self.options.only_mp3
            && !self.options.no_original
            && self.options.authenticated
    }

    /// Decide whether `filename` counts as already downloaded
    ///
    /// Checks the file itself and the archive ledger. With `overwrite` the
    /// track is treated as fresh; the pre-existing file stays in place until
    /// the completed buffer is written over it, so a failed acquisition never
    /// destroys it. Without any override option a pre-existing target aborts
    /// the invocation.
    pub(crate) async fn check_existing(
        &self,
        track: &TrackDescriptor,
        filename: &str,
    ) -> Result<bool> {
        let mut present = Path::new(filename).exists();
        if !present
            && let Some(archive) = &self.archive
            && archive.contains(track.id).await
        {
            present = true;
        }
        if !present {
            return Ok(false);
        }
        if self.options.overwrite {
            debug!(%filename, "existing file will be overwritten");
            return Ok(false);
        }
        if !self.options.allows_existing() {
            return Err(Error::ExistingFile {
                filename: filename.to_string(),
            });
        }
        Ok(true)
    }

    /// Fetch artwork, build the record and tag the audio buffer
    async fn apply_metadata(
        &self,
        audio: Vec<u8>,
        track: &TrackDescriptor,
        playlist: Option<&PlaylistContext>,
    ) -> Vec<u8> {
        let artwork =
            metadata::fetch_artwork(&self.artwork_http, track, self.options.original_art).await;
        let record = MetadataRecord::build(track, playlist, &self.options, artwork);
        metadata::assemble(audio, &record).into_bytes()
    }

    /// Rewrite the tags of an already-downloaded file in place
    ///
    /// The rewrite counts as touching the file, so its mtime is re-aligned
    /// with the track creation time afterwards.
    async fn retag_existing(
        &self,
        filename: &str,
        track: &TrackDescriptor,
        playlist: Option<&PlaylistContext>,
    ) -> Result<()> {
        let audio = tokio::fs::read(filename).await?;
        let tagged = self.apply_metadata(audio, track, playlist).await;
        tokio::fs::write(filename, tagged).await?;
        if let Err(e) = set_mtime(filename, SystemTime::from(track.created_at)) {
            warn!(%filename, error = %e, "could not set file modification time");
        }
        info!(track_id = track.id.0, %filename, "metadata rewritten");
        Ok(())
    }

    /// Record, verify and timestamp a completed track
    ///
    /// Existence verification and the mtime touch-up apply to fresh downloads
    /// only; a track known solely through the ledger has no local file to
    /// inspect.
    async fn finalize(&self, track: &TrackDescriptor, filename: &str, fresh: bool) -> Result<()> {
        if let Some(archive) = &self.archive {
            archive.record(track.id).await;
            self.event_tx
                .send(Event::ArchiveRecorded { id: track.id })
                .ok();
        }

        if fresh {
            if !Path::new(filename).exists() {
                return Err(Error::PostDownloadVerification {
                    filename: filename.to_string(),
                });
            }
            if let Err(e) = set_mtime(filename, SystemTime::from(track.created_at)) {
                warn!(%filename, error = %e, "could not set file modification time");
            }
        }

        self.files_kept
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(filename.to_string());

        self.event_tx
            .send(Event::TrackFinished {
                id: track.id,
                filename: filename.to_string(),
            })
            .ok();
        Ok(())
    }
}

/// Best-effort alignment of the file's mtime with the track creation time
fn set_mtime(filename: &str, when: SystemTime) -> std::io::Result<()> {
    std::fs::File::options()
        .write(true)
        .open(filename)?
        .set_modified(when)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::DefaultNamer;
    use crate::transcode::TranscodeRequest;
    use crate::types::{TrackId, TrackUser, Variant};
    use async_trait::async_trait;
    use chrono::Utc;

    struct StubCatalog {
        user_id: Option<u64>,
    }

    #[async_trait]
    impl Catalog for StubCatalog {
        async fn track(&self, _id: TrackId) -> Result<TrackDescriptor> {
            Err(Error::Catalog("not needed".to_string()))
        }
        async fn original_download_url(
            &self,
            _id: TrackId,
            _secret_token: Option<&str>,
        ) -> Result<Option<String>> {
            Ok(None)
        }
        async fn stream_url(&self, _variant: &Variant) -> Result<String> {
            Err(Error::Catalog("not needed".to_string()))
        }
        fn user_id(&self) -> Option<u64> {
            self.user_id
        }
    }

    struct StubEngine;

    #[async_trait]
    impl TranscodeEngine for StubEngine {
        async fn transcode(&self, _request: TranscodeRequest) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn name(&self) -> &'static str {
            "stub"
        }
    }

    fn downloader(options: DownloadOptions, user_id: Option<u64>) -> Downloader {
        Downloader::new(
            options,
            Arc::new(StubCatalog { user_id }),
            Arc::new(StubEngine),
            Arc::new(DefaultNamer),
        )
        .unwrap()
    }

    fn track(downloadable: bool, owner: u64) -> TrackDescriptor {
        TrackDescriptor {
            id: TrackId::new(5),
            title: "T".to_string(),
            duration_ms: 1000,
            streamable: true,
            downloadable,
            policy: Default::default(),
            user: TrackUser {
                id: owner,
                username: "u".to_string(),
                avatar_url: None,
            },
            artwork_url: None,
            permalink_url: "https://example.com/u/t".to_string(),
            description: None,
            genre: None,
            created_at: Utc::now(),
            secret_token: None,
            variants: vec![],
        }
    }

    #[test]
    fn original_gate_requires_authentication() {
        let dl = downloader(DownloadOptions::default(), None);
        assert!(!dl.wants_original(&track(true, 1)));

        let dl = downloader(
            DownloadOptions {
                authenticated: true,
                ..Default::default()
            },
            None,
        );
        assert!(dl.wants_original(&track(true, 1)));
        assert!(!dl.wants_original(&track(false, 1)));
    }

    #[test]
    fn owned_tracks_count_as_downloadable() {
        let dl = downloader(
            DownloadOptions {
                authenticated: true,
                ..Default::default()
            },
            Some(1),
        );
        assert!(dl.wants_original(&track(false, 1)));
        assert!(!dl.wants_original(&track(false, 2)));
    }

    #[test]
    fn only_mp3_and_no_original_close_the_gate() {
        let dl = downloader(
            DownloadOptions {
                authenticated: true,
                only_mp3: true,
                ..Default::default()
            },
            None,
        );
        assert!(!dl.wants_original(&track(true, 1)));

        let dl = downloader(
            DownloadOptions {
                authenticated: true,
                no_original: true,
                ..Default::default()
            },
            None,
        );
        assert!(!dl.wants_original(&track(true, 1)));
    }

    #[tokio::test]
    async fn blocked_track_fails_before_any_io() {
        let dl = downloader(DownloadOptions::default(), None);
        let mut blocked = track(false, 1);
        blocked.policy = crate::types::DownloadPolicy::Block;
        let err = dl.download_track(&blocked, None).await.unwrap_err();
        assert!(matches!(err, Error::Blocked { .. }));
    }

    #[tokio::test]
    async fn missing_transcodings_surface_the_available_presets() {
        let dl = downloader(DownloadOptions::default(), None);
        let mut t = track(false, 1);
        // Unique id so the per-track lock cannot collide with other tests
        t.id = TrackId::new(990_001);
        t.variants = vec![Variant {
            preset: "abr_sq".to_string(),
            protocol: crate::types::StreamProtocol::Hls,
            url: "u".to_string(),
        }];
        let err = dl.download_track(&t, None).await.unwrap_err();
        match err {
            Error::NoTranscodingAvailable { available } => {
                assert_eq!(available, vec!["abr_sq".to_string()]);
            }
            other => panic!("expected NoTranscodingAvailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn only_original_without_original_fails() {
        let dl = downloader(
            DownloadOptions {
                only_original: true,
                authenticated: true,
                ..Default::default()
            },
            None,
        );
        let mut t = track(true, 1);
        t.id = TrackId::new(990_002);
        let err = dl.download_track(&t, None).await.unwrap_err();
        assert!(matches!(err, Error::OriginalUnavailable { .. }));
    }
}
