//! Catalog collaborator interface
//!
//! The pipeline never speaks the remote catalog protocol itself; a driver
//! supplies an implementation of this trait. Expired or absent original
//! download locators are reported as `None`, not as errors.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{TrackDescriptor, TrackId, Variant};

/// Interface to the remote catalog service
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch the descriptor for a track id
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Catalog`] when the track cannot be resolved.
    async fn track(&self, id: TrackId) -> Result<TrackDescriptor>;

    /// Direct download locator for a track's original (highest-fidelity) file
    ///
    /// `None` when the track has no original download or the locator has
    /// expired (HTTP 401/404-equivalent); both mean "unavailable", never an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Catalog`] on transport failures only.
    async fn original_download_url(
        &self,
        id: TrackId,
        secret_token: Option<&str>,
    ) -> Result<Option<String>>;

    /// Resolve a variant's locator into a fetchable stream URL
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Catalog`] when the locator cannot be resolved.
    async fn stream_url(&self, variant: &Variant) -> Result<String>;

    /// Id of the authenticated user, when a session is available
    ///
    /// Tracks owned by this user are treated as downloadable regardless of
    /// their public download flag.
    fn user_id(&self) -> Option<u64>;
}
