//! Download archive ledger
//!
//! A plain-text file of decimal track ids, one per line, in write order.
//! Used for skip-if-present and for set-based playlist synchronization. All
//! reads and writes happen under a [`FileLock`] on the ledger path so entries
//! are never interleaved, including across process invocations. Unreadable
//! or unwritable ledgers degrade to "no dedup" with an error log instead of
//! aborting the track.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::lock::{FileLock, LockRegistry};
use crate::naming::TrackNamer;
use crate::types::{PlaylistContext, TrackDescriptor, TrackId};

/// Extensions probed when locating a previously downloaded track on disk
pub(crate) const KNOWN_EXTENSIONS: &[&str] = &[".mp3", ".m4a", ".opus", ".flac", ".wav"];

/// Result of comparing the ledger against a playlist's current tracks
#[derive(Debug)]
pub enum SyncOutcome {
    /// Ledger and playlist agree; nothing to do
    NoChanges,
    /// Removals were applied but no new tracks need downloading
    NothingToDownload,
    /// Descriptors of the tracks to download next
    ToDownload(Vec<TrackDescriptor>),
}

/// Append-only ledger of downloaded track ids
#[derive(Clone, Debug)]
pub struct DownloadArchive {
    path: PathBuf,
    registry: LockRegistry,
    lock_timeout: Duration,
}

impl DownloadArchive {
    /// Open a ledger at `path` (the file itself may not exist yet)
    #[must_use]
    pub fn new(path: PathBuf, registry: LockRegistry, lock_timeout: Duration) -> Self {
        Self {
            path,
            registry,
            lock_timeout,
        }
    }

    /// Ledger file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `id` appears as an exact line in the ledger
    ///
    /// A missing ledger means false; read failures are logged and degrade to
    /// false rather than failing the track.
    pub async fn contains(&self, id: TrackId) -> bool {
        let _lock = match FileLock::acquire(&self.path, self.lock_timeout, &self.registry).await {
            Ok(lock) => lock,
            Err(e) => {
                error!(archive = %self.path.display(), error = %e, "could not lock download archive");
                return false;
            }
        };
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let needle = id.to_string();
                contents.lines().any(|line| line.trim() == needle)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                error!(archive = %self.path.display(), error = %e, "error reading download archive");
                false
            }
        }
    }

    /// Append `id` to the ledger, unless it is already recorded
    ///
    /// Write failures are logged, not fatal.
    pub async fn record(&self, id: TrackId) {
        let _lock = match FileLock::acquire(&self.path, self.lock_timeout, &self.registry).await {
            Ok(lock) => lock,
            Err(e) => {
                error!(archive = %self.path.display(), error = %e, "could not lock download archive");
                return;
            }
        };
        let result = async {
            let mut contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(e),
            };
            let needle = id.to_string();
            if contents.lines().any(|line| line.trim() == needle) {
                return Ok(());
            }
            contents.push_str(&format!("{id}\n"));
            tokio::fs::write(&self.path, contents).await
        }
        .await;
        if let Err(e) = result {
            error!(archive = %self.path.display(), error = %e, "error writing to download archive");
        } else {
            debug!(archive = %self.path.display(), track_id = id.0, "recorded in archive");
        }
    }

    /// Reconcile the ledger against a playlist's current tracks
    ///
    /// Computes `to_add = current − known` and `to_remove = known − current`.
    /// For every removal, looks the track up via the catalog and deletes its
    /// local file under each known audio extension; files that cannot be
    /// located are reported and skipped. When any removal occurred the ledger
    /// is atomically rewritten to `known − to_remove`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Archive`] when the ledger cannot be read or rewritten,
    /// or [`Error::LockTimeout`] when another invocation holds it.
    pub async fn sync(
        &self,
        current: &[TrackDescriptor],
        catalog: &dyn Catalog,
        namer: &dyn TrackNamer,
        playlist: Option<&PlaylistContext>,
    ) -> Result<SyncOutcome> {
        let _lock = FileLock::acquire(&self.path, self.lock_timeout, &self.registry).await?;

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Archive(format!("error reading {}: {e}", self.path.display())))?;
        let known: Vec<TrackId> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.trim()
                    .parse()
                    .map_err(|_| Error::Archive(format!("invalid track id line {line:?}")))
            })
            .collect::<Result<_>>()?;

        let known_set: HashSet<TrackId> = known.iter().copied().collect();
        let current_set: HashSet<TrackId> = current.iter().map(|t| t.id).collect();
        let to_add: HashSet<TrackId> = current_set.difference(&known_set).copied().collect();
        let to_remove: HashSet<TrackId> = known_set.difference(&current_set).copied().collect();

        if to_add.is_empty() && to_remove.is_empty() {
            return Ok(SyncOutcome::NoChanges);
        }

        if !to_remove.is_empty() {
            for &id in &to_remove {
                self.remove_local_files(id, catalog, namer, playlist).await;
            }
            // Atomic replace: old set minus removed ids, original order kept
            let remaining: String = known
                .iter()
                .filter(|id| !to_remove.contains(id))
                .map(|id| format!("{id}\n"))
                .collect();
            let tmp = self.path.with_extension("tmp");
            tokio::fs::write(&tmp, remaining)
                .await
                .map_err(|e| Error::Archive(format!("error rewriting archive: {e}")))?;
            tokio::fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| Error::Archive(format!("error rewriting archive: {e}")))?;
        }

        if to_add.is_empty() {
            return Ok(SyncOutcome::NothingToDownload);
        }
        Ok(SyncOutcome::ToDownload(
            current
                .iter()
                .filter(|t| to_add.contains(&t.id))
                .cloned()
                .collect(),
        ))
    }

    /// Delete the local file(s) for a removed track, probing known extensions
    async fn remove_local_files(
        &self,
        id: TrackId,
        catalog: &dyn Catalog,
        namer: &dyn TrackNamer,
        playlist: Option<&PlaylistContext>,
    ) {
        let track = match catalog.track(id).await {
            Ok(track) => track,
            Err(e) => {
                info!(track_id = id.0, error = %e, "could not resolve removed track");
                return;
            }
        };
        let mut removed = false;
        for ext in KNOWN_EXTENSIONS {
            let filename = namer.filename(&track, Some(ext), None, playlist);
            match tokio::fs::remove_file(&filename).await {
                Ok(()) => {
                    removed = true;
                    info!(%filename, "removed");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => info!(%filename, error = %e, "could not remove file"),
            }
        }
        if !removed {
            info!(track_id = id.0, "could not find a local file to remove");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::DefaultNamer;
    use crate::types::{TrackUser, Variant};
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    struct FakeCatalog;

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn track(&self, id: TrackId) -> Result<TrackDescriptor> {
            Ok(TrackDescriptor {
                id,
                title: format!("Track {id}"),
                duration_ms: 1000,
                streamable: true,
                downloadable: false,
                policy: Default::default(),
                user: TrackUser {
                    id: 1,
                    username: "someone".to_string(),
                    avatar_url: None,
                },
                artwork_url: None,
                permalink_url: format!("https://example.com/t/{id}"),
                description: None,
                genre: None,
                created_at: Utc::now(),
                secret_token: None,
                variants: vec![],
            })
        }

        async fn original_download_url(
            &self,
            _id: TrackId,
            _secret_token: Option<&str>,
        ) -> Result<Option<String>> {
            Ok(None)
        }

        async fn stream_url(&self, _variant: &Variant) -> Result<String> {
            Err(Error::Catalog("not implemented".to_string()))
        }

        fn user_id(&self) -> Option<u64> {
            None
        }
    }

    fn archive_in(dir: &TempDir, lines: &[u64]) -> DownloadArchive {
        let path = dir.path().join("archive.txt");
        let contents: String = lines.iter().map(|id| format!("{id}\n")).collect();
        std::fs::write(&path, contents).unwrap();
        DownloadArchive::new(path, LockRegistry::new(), Duration::from_secs(1))
    }

    fn descriptors(ids: &[u64]) -> Vec<TrackDescriptor> {
        ids.iter()
            .map(|&id| {
                futures::executor::block_on(FakeCatalog.track(TrackId::new(id))).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn contains_matches_exact_lines_only() {
        let dir = TempDir::new().unwrap();
        let archive = archive_in(&dir, &[12, 345]);
        assert!(archive.contains(TrackId::new(12)).await);
        assert!(archive.contains(TrackId::new(345)).await);
        assert!(!archive.contains(TrackId::new(1)).await);
        assert!(!archive.contains(TrackId::new(34)).await);
    }

    #[tokio::test]
    async fn missing_ledger_contains_nothing() {
        let dir = TempDir::new().unwrap();
        let archive = DownloadArchive::new(
            dir.path().join("missing.txt"),
            LockRegistry::new(),
            Duration::from_secs(1),
        );
        assert!(!archive.contains(TrackId::new(1)).await);
    }

    #[tokio::test]
    async fn record_appends_one_line_per_id() {
        let dir = TempDir::new().unwrap();
        let archive = archive_in(&dir, &[1]);
        archive.record(TrackId::new(2)).await;
        archive.record(TrackId::new(3)).await;
        let contents = std::fs::read_to_string(archive.path()).unwrap();
        assert_eq!(contents, "1\n2\n3\n");
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let archive = archive_in(&dir, &[1]);
        archive.record(TrackId::new(1)).await;
        archive.record(TrackId::new(2)).await;
        archive.record(TrackId::new(2)).await;
        let contents = std::fs::read_to_string(archive.path()).unwrap();
        assert_eq!(contents, "1\n2\n");
    }

    #[tokio::test]
    async fn record_creates_the_ledger_on_first_write() {
        let dir = TempDir::new().unwrap();
        let archive = DownloadArchive::new(
            dir.path().join("new.txt"),
            LockRegistry::new(),
            Duration::from_secs(1),
        );
        archive.record(TrackId::new(99)).await;
        assert_eq!(std::fs::read_to_string(archive.path()).unwrap(), "99\n");
    }

    #[tokio::test]
    async fn sync_with_identical_sets_reports_no_changes() {
        let dir = TempDir::new().unwrap();
        let _cwd = dir.path();
        let archive = archive_in(&dir, &[1, 2, 3]);
        let outcome = archive
            .sync(&descriptors(&[1, 2, 3]), &FakeCatalog, &DefaultNamer, None)
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::NoChanges));
        // Idempotent: the ledger is untouched
        let contents = std::fs::read_to_string(archive.path()).unwrap();
        assert_eq!(contents, "1\n2\n3\n");
    }

    #[tokio::test]
    async fn sync_computes_pure_set_difference() {
        let dir = TempDir::new().unwrap();
        let archive = archive_in(&dir, &[1, 2, 3]);
        let outcome = archive
            .sync(&descriptors(&[2, 3, 4]), &FakeCatalog, &DefaultNamer, None)
            .await
            .unwrap();
        match outcome {
            SyncOutcome::ToDownload(tracks) => {
                let ids: Vec<u64> = tracks.iter().map(|t| t.id.0).collect();
                assert_eq!(ids, vec![4]);
            }
            other => panic!("expected ToDownload, got {other:?}"),
        }
        // 1 was removed from the ledger, 4 is recorded only after download
        let contents = std::fs::read_to_string(archive.path()).unwrap();
        assert_eq!(contents, "2\n3\n");
    }

    #[tokio::test]
    async fn sync_with_only_removals_reports_nothing_to_download() {
        let dir = TempDir::new().unwrap();
        let archive = archive_in(&dir, &[1, 2]);
        let outcome = archive
            .sync(&descriptors(&[2]), &FakeCatalog, &DefaultNamer, None)
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::NothingToDownload));
        assert_eq!(std::fs::read_to_string(archive.path()).unwrap(), "2\n");
    }

    #[tokio::test]
    async fn sync_tolerates_blank_lines_at_file_boundaries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.txt");
        std::fs::write(&path, "1\n2\n\n").unwrap();
        let archive = DownloadArchive::new(path, LockRegistry::new(), Duration::from_secs(1));
        let outcome = archive
            .sync(&descriptors(&[1, 2]), &FakeCatalog, &DefaultNamer, None)
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::NoChanges));
    }

    #[tokio::test]
    async fn sync_fails_on_unparseable_ledger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.txt");
        std::fs::write(&path, "1\nnot-a-number\n").unwrap();
        let archive = DownloadArchive::new(path, LockRegistry::new(), Duration::from_secs(1));
        let err = archive
            .sync(&descriptors(&[1]), &FakeCatalog, &DefaultNamer, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }
}
