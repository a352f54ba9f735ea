//! Snapshot tests for operator-facing flash errors

use insta::assert_snapshot;
use modflash_dfu::{SessionError, TransferError};
use modflash_update::prelude::*;
use modflash_verify::VerifyError;

#[test]
fn test_checksum_mismatch() {
    let err = UpdateError::from(VerifyError::Mismatch {
        expected: "5f78c33274e43fa9de5659265c1d917e25c03722dcb0b8d27db8d5feaa813953".to_string(),
        actual: "a44999705f8ff5c1c57e4ac4ebe177f8f196705ff93d82ae44d1068e469d18e6".to_string(),
    });
    assert_snapshot!(
        err.to_string(),
        @"Checksum mismatch: expected 5f78c33274e43fa9de5659265c1d917e25c03722dcb0b8d27db8d5feaa813953, computed a44999705f8ff5c1c57e4ac4ebe177f8f196705ff93d82ae44d1068e469d18e6. Download may be corrupted."
    );
}

#[test]
fn test_selection_not_found() {
    let err = UpdateError::from(SelectionError::NotFound {
        channel: "beta".to_string(),
        index: 3,
        available: 1,
    });
    assert_snapshot!(err.to_string(), @"No build at index 3 in channel 'beta' (1 available)");
}

#[test]
fn test_fetch_failed() {
    let err = UpdateError::from(SourceError::FetchFailed {
        file: "stable/fw-1.2.bin".to_string(),
        status: "404 Not Found".to_string(),
    });
    assert_snapshot!(err.to_string(), @"Failed to fetch stable/fw-1.2.bin: 404 Not Found");
}

#[test]
fn test_empty_image() {
    let err = UpdateError::from(SourceError::EmptyImage {
        name: "local-file:fw.bin".to_string(),
    });
    assert_snapshot!(err.to_string(), @"Firmware image 'local-file:fw.bin' is empty");
}

#[test]
fn test_busy_passes_through() {
    assert_snapshot!(
        UpdateError::from(SessionError::Busy).to_string(),
        @"Session busy: a flash is already in progress on this device"
    );
}

#[test]
fn test_transfer_rejected() {
    let err = UpdateError::from(TransferError::DeviceRejected {
        offset: 1024,
        reason: "Device rejected request: errWRITE".to_string(),
    });
    assert_snapshot!(
        err.to_string(),
        @"Device rejected chunk at offset 1024: Device rejected request: errWRITE"
    );
}
