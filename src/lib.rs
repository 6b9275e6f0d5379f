//! # soundfetch
//!
//! Backend library for downloading tracks from a SoundCloud-style catalog.
//!
//! ## Design Philosophy
//!
//! soundfetch is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Collaborator-driven** - Catalog access and naming schemes are traits
//!   the embedding application implements
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Sequential** - One track at a time; batch policy stays with the caller
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use soundfetch::{Downloader, DownloadOptions, FfmpegEngine};
//! use soundfetch::naming::DefaultNamer;
//! # use soundfetch::catalog::Catalog;
//! # fn make_catalog() -> Arc<dyn Catalog> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = make_catalog();
//!     let engine = FfmpegEngine::from_path().expect("ffmpeg not found in PATH");
//!
//!     let downloader = Downloader::new(
//!         DownloadOptions::default(),
//!         catalog.clone(),
//!         Arc::new(engine),
//!         Arc::new(DefaultNamer),
//!     )?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let track = catalog.track(128034234.into()).await?;
//!     downloader.download_track(&track, None).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Download archive ledger
pub mod archive;
/// Catalog collaborator interface
pub mod catalog;
/// Configuration types
pub mod config;
/// Per-track download orchestration
pub mod downloader;
/// Error types
pub mod error;
/// Size bound validation
pub mod limits;
/// Filesystem lock files
pub mod lock;
/// Metadata assembly and artwork fetching
pub mod metadata;
/// Filename derivation
pub mod naming;
/// Progress reporting
pub mod progress;
/// Network stream copying
pub mod stream_copy;
/// External transcoding engine
pub mod transcode;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archive::{DownloadArchive, SyncOutcome};
pub use catalog::Catalog;
pub use config::{DownloadOptions, parse_size};
pub use downloader::Downloader;
pub use error::{Error, Result};
pub use lock::{FileLock, LockRegistry};
pub use metadata::{AssembleOutcome, MetadataRecord};
pub use naming::{DefaultNamer, TrackNamer};
pub use transcode::{FfmpegEngine, TranscodeEngine, TranscodeInput, TranscodeRequest};
pub use types::{
    DownloadPolicy, Event, PlaylistContext, SkipReason, StreamProtocol, TrackDescriptor, TrackId,
    TrackOutcome, TrackUser, Variant,
};

/// Helper function to run a closure and sweep lock files on termination.
///
/// Waits for a termination signal and then runs the registry's `cleanup()`,
/// so an interrupted batch never leaves stale `.soundfetch.lock` files behind.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use soundfetch::{LockRegistry, cleanup_on_shutdown};
///
/// #[tokio::main]
/// async fn main() {
///     let locks = LockRegistry::new();
///     // hand `locks` to the Downloader...; meanwhile:
///     tokio::spawn(cleanup_on_shutdown(locks.clone()));
/// }
/// ```
pub async fn cleanup_on_shutdown(locks: LockRegistry) {
    wait_for_signal().await;
    locks.cleanup();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
