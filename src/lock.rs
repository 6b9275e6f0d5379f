//! Cross-process mutual exclusion via filesystem lock files
//!
//! A lock derives from the resource's resolved absolute path plus a
//! `.soundfetch.lock` suffix, created atomically with `create_new`. The same
//! primitive serializes per-track work and ledger writes, including across
//! separate process invocations. Every directory a lock is created in is
//! recorded in a [`LockRegistry`] so an interrupted process can sweep stale
//! lock files on exit.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Suffix appended to the resolved resource path to form the lock file name
pub const LOCK_SUFFIX: &str = ".soundfetch.lock";

/// Polling interval while waiting for a contended lock
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tracks every directory this process created lock files in
///
/// Shared by `Arc` between the downloader and the process-exit cleanup path;
/// explicit state rather than a process-wide global.
#[derive(Clone, Debug, Default)]
pub struct LockRegistry {
    dirs: Arc<Mutex<Vec<PathBuf>>>,
}

impl LockRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn remember(&self, dir: PathBuf) {
        let mut dirs = self.dirs.lock().unwrap_or_else(|e| e.into_inner());
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }

    /// Best-effort removal of all lock files in every remembered directory
    ///
    /// Idempotent; runs at process exit regardless of which locks were held
    /// at that moment. Removal errors are ignored — deleting a lock file only
    /// affects subsequent acquisitions, never an active holder's state.
    pub fn cleanup(&self) {
        let dirs = {
            let guard = self.dirs.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        for dir in dirs {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(LOCK_SUFFIX))
                {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
    }
}

/// Exclusive ownership of one lock file
///
/// Released (lock file deleted) on drop; hold it for exactly the scope of the
/// operation it guards.
#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
}

impl FileLock {
    /// Block up to `timeout` for exclusive ownership of the lock derived from `path`
    ///
    /// A zero timeout makes a single attempt and fails fast — used where a
    /// sibling invocation may legitimately hold the lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] when the lock is still held at the
    /// deadline, or [`Error::Io`] when the lock file cannot be created for
    /// any other reason.
    pub async fn acquire(path: &Path, timeout: Duration, registry: &LockRegistry) -> Result<Self> {
        let resolved = resolve(path);
        let lock_path = PathBuf::from(format!("{}{}", resolved.display(), LOCK_SUFFIX));
        if let Some(parent) = lock_path.parent() {
            registry.remember(parent.to_path_buf());
        }

        let deadline = Instant::now() + timeout;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => {
                    debug!(lock = %lock_path.display(), "lock acquired");
                    return Ok(Self { lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockTimeout {
                            path: resolved.clone(),
                        });
                    }
                    sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Path of the lock file itself
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            // The exit-time sweep will pick it up
            warn!(lock = %self.lock_path.display(), error = %e, "failed to release lock file");
        }
    }
}

/// Resolve to an absolute path without requiring the target to exist
fn resolve(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    })
}
