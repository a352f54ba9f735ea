//! Error types for flash orchestration

use modflash_dfu::{ConnectError, FinalizeError, SessionError, TransferError};
use modflash_manifest::ManifestError;
use modflash_verify::VerifyError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Category reported in [`ProgressEvent::Failed`](crate::ProgressEvent::Failed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Manifest could not be parsed
    Manifest,
    /// Selected build does not exist
    Selection,
    /// Image could not be obtained
    Source,
    /// Image digest does not match the manifest
    Checksum,
    /// Another flash holds the session
    Busy,
    /// Session has no claimed interface
    SessionNotReady,
    /// Device could not be opened or claimed
    Connect,
    /// Chunk transfer failed
    Transfer,
    /// Finalize handshake failed
    Finalize,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Manifest => "manifest",
            ErrorKind::Selection => "selection",
            ErrorKind::Source => "source",
            ErrorKind::Checksum => "checksum",
            ErrorKind::Busy => "busy",
            ErrorKind::SessionNotReady => "session_not_ready",
            ErrorKind::Connect => "connect",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Manifest selection did not resolve to a build
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Index out of range for the channel
    #[error("No build at index {index} in channel '{channel}' ({available} available)")]
    NotFound {
        /// Selected channel
        channel: String,
        /// Selected index
        index: usize,
        /// Builds published on the channel
        available: usize,
    },
}

/// Failures obtaining firmware bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Fetch returned an error or an unsuccessful status
    #[error("Failed to fetch {file}: {status}")]
    FetchFailed {
        /// Requested path
        file: String,
        /// Status line or I/O failure
        status: String,
    },

    /// Path is absolute or escapes the firmware root
    #[error("Invalid firmware path '{path}'")]
    InvalidPath {
        /// Offending path
        path: String,
    },

    /// Base URL cannot be used
    #[error("Invalid firmware URL '{url}': {reason}")]
    InvalidUrl {
        /// Configured URL
        url: String,
        /// Parse or client failure
        reason: String,
    },

    /// Local file could not be read
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// File path
        path: String,
        /// I/O failure
        reason: String,
    },

    /// Image has no bytes
    #[error("Firmware image '{name}' is empty")]
    EmptyImage {
        /// Image label
        name: String,
    },
}

/// Any failure of a flash operation
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Manifest parsing failed
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Selected build does not exist
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// Image could not be obtained
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Image failed verification
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// Session busy or not ready
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Device could not be opened or claimed
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Chunk transfer failed
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Finalize handshake failed
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
}

impl UpdateError {
    /// Category for event reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::Manifest(_) => ErrorKind::Manifest,
            UpdateError::Selection(_) => ErrorKind::Selection,
            UpdateError::Source(_) => ErrorKind::Source,
            UpdateError::Verify(e) if e.is_mismatch() => ErrorKind::Checksum,
            UpdateError::Verify(_) => ErrorKind::Source,
            UpdateError::Session(e)
            | UpdateError::Transfer(TransferError::Session(e))
            | UpdateError::Finalize(FinalizeError::Session(e))
            | UpdateError::Connect(ConnectError::Session(e)) => session_kind(e),
            UpdateError::Connect(_) => ErrorKind::Connect,
            UpdateError::Transfer(_) => ErrorKind::Transfer,
            UpdateError::Finalize(_) => ErrorKind::Finalize,
        }
    }
}

fn session_kind(error: &SessionError) -> ErrorKind {
    match error {
        SessionError::Busy => ErrorKind::Busy,
        SessionError::NotReady { .. } | SessionError::InvalidState { .. } => {
            ErrorKind::SessionNotReady
        }
    }
}
