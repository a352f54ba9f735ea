//! Error types for manifest parsing

use thiserror::Error;

/// Errors that can occur while loading a firmware manifest
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// Payload is not valid JSON or does not match the manifest schema
    #[error("Malformed manifest: {0}")]
    Malformed(String),

    /// A build references a file outside the manifest directory
    #[error("Invalid firmware path '{file}' for {channel}/{version}")]
    InvalidFile {
        /// Channel the build belongs to
        channel: String,
        /// Build version
        version: String,
        /// Offending path as written in the manifest
        file: String,
    },

    /// A build carries a digest that is not a SHA-256 hex string
    #[error("Invalid sha256 for {channel}/{version}: expected 64 hex characters, got '{digest}'")]
    InvalidDigest {
        /// Channel the build belongs to
        channel: String,
        /// Build version
        version: String,
        /// Digest as written in the manifest
        digest: String,
    },
}

impl ManifestError {
    /// Create a malformed-manifest error
    pub fn malformed(reason: impl Into<String>) -> Self {
        ManifestError::Malformed(reason.into())
    }
}

impl From<serde_json::Error> for ManifestError {
    fn from(e: serde_json::Error) -> Self {
        ManifestError::Malformed(e.to_string())
    }
}
