//! Error types for integrity verification

use thiserror::Error;

/// Errors that can occur while verifying a firmware image
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Computed digest differs from the published one
    #[error("Checksum mismatch: expected {expected}, computed {actual}. Download may be corrupted.")]
    Mismatch {
        /// Digest published for the image
        expected: String,
        /// Digest computed from the bytes received
        actual: String,
    },

    /// Image could not be read for hashing
    #[error("I/O error while hashing: {0}")]
    Io(#[from] std::io::Error),
}

impl VerifyError {
    /// Check whether this error is a digest mismatch
    pub fn is_mismatch(&self) -> bool {
        matches!(self, VerifyError::Mismatch { .. })
    }
}
