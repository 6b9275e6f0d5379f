//! Size bound validation for declared content lengths
//!
//! Checked before any bytes are transferred, using only the header-declared
//! length. A stream with no declared length is a protocol error upstream and
//! never reaches this guard.

use crate::config::DownloadOptions;
use crate::error::{Error, Result};

/// Minimum/maximum byte bounds for a single download
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeBounds {
    /// Inclusive lower bound in bytes
    pub min: u64,
    /// Inclusive upper bound in bytes (None = unbounded)
    pub max: Option<u64>,
}

impl SizeBounds {
    /// Build bounds from download options; a configured max of 0 means unbounded
    #[must_use]
    pub fn from_options(options: &DownloadOptions) -> Self {
        Self {
            min: options.min_size,
            max: options.max_size.filter(|&m| m > 0),
        }
    }

    /// Validate a declared content length against the bounds
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeBounds`] when `length` lies outside `[min, max]`.
    pub fn check(&self, length: u64) -> Result<()> {
        let too_small = length < self.min;
        let too_large = self.max.is_some_and(|max| length > max);
        if too_small || too_large {
            return Err(Error::SizeBounds {
                length,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}
