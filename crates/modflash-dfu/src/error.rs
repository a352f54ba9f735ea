//! Error types for bootloader sessions

use thiserror::Error;

use crate::session::SessionState;

/// Failures reported by a transport implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Device refused the request (stall or error status)
    #[error("Device rejected request: {0}")]
    Rejected(String),

    /// Device went away
    #[error("Device disconnected")]
    Disconnected,

    /// Device answered with something the protocol does not allow
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Host-side USB failure
    #[error("USB I/O error: {0}")]
    Io(String),
}

/// Errors raised while opening a session or claiming an interface
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The device exposes no DFU-mode interface
    #[error("DFU interface not found. Is the device in DFU mode?")]
    NoBootloaderInterface,

    /// The DFU interfaces use a protocol variant this engine cannot drive
    #[error(
        "Unsupported bootloader protocol (bcdDFUVersion {version:#06x}). Only standard DFU 1.1 devices can be flashed."
    )]
    UnsupportedProtocol {
        /// `bcdDFUVersion` reported by the device
        version: u16,
    },

    /// The transport could not be opened or enumerated
    #[error("Failed to open device: {0}")]
    OpenFailed(#[source] TransportError),

    /// Claiming or configuring the interface failed
    #[error("Failed to claim interface {interface}: {reason}")]
    ClaimFailed {
        /// Index into the session's bootloader interfaces
        interface: usize,
        /// Failure reason
        reason: String,
    },

    /// Session configuration is unusable
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    /// Session is in the wrong state
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Session-level contention and state errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Another flash sequence holds the session
    #[error("Session busy: a flash is already in progress on this device")]
    Busy,

    /// Session has no claimed interface to flash through
    #[error("Session not ready: expected a claimed interface, session is {state}")]
    NotReady {
        /// State the session was in
        state: SessionState,
    },

    /// Operation called from a state that does not allow it
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },
}

/// Errors raised while writing image chunks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Device rejected the chunk starting at `offset`
    #[error("Device rejected chunk at offset {offset}: {reason}")]
    DeviceRejected {
        /// Byte offset of the rejected chunk
        offset: usize,
        /// Transport failure description
        reason: String,
    },

    /// Chunk write did not complete in time
    #[error("Chunk write at offset {offset} timed out after {timeout_ms}ms")]
    Timeout {
        /// Byte offset of the chunk
        offset: usize,
        /// Per-chunk timeout in milliseconds
        timeout_ms: u64,
    },

    /// Nothing to write
    #[error("Firmware image is empty")]
    EmptyImage,

    /// Session is in the wrong state
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl TransferError {
    /// Offset of the failed chunk, if the failure happened on the wire
    pub fn offset(&self) -> Option<usize> {
        match self {
            TransferError::DeviceRejected { offset, .. } | TransferError::Timeout { offset, .. } => {
                Some(*offset)
            }
            TransferError::EmptyImage | TransferError::Session(_) => None,
        }
    }
}

/// Errors raised by the finalize handshake
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FinalizeError {
    /// Device did not finish manifestation in time
    #[error("Finalize timed out after {timeout_ms}ms")]
    Timeout {
        /// Finalize timeout in milliseconds
        timeout_ms: u64,
    },

    /// Device reported a failure while validating the image
    #[error("Device rejected finalize: {reason}")]
    DeviceRejected {
        /// Transport failure description
        reason: String,
    },

    /// Session is in the wrong state
    #[error(transparent)]
    Session(#[from] SessionError),
}
