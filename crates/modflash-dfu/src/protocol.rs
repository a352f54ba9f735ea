//! DFU 1.1 class requests, states and status codes

use std::fmt;
use std::time::Duration;

use crate::error::TransportError;

/// Length of a DFU_GETSTATUS response
pub const STATUS_LENGTH: u16 = 6;

/// DFU class-specific requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuRequest {
    /// DFU_DETACH
    Detach = 0,
    /// DFU_DNLOAD
    Dnload = 1,
    /// DFU_UPLOAD
    Upload = 2,
    /// DFU_GETSTATUS
    GetStatus = 3,
    /// DFU_CLRSTATUS
    ClrStatus = 4,
    /// DFU_GETSTATE
    GetState = 5,
    /// DFU_ABORT
    Abort = 6,
}

impl DfuRequest {
    /// `bRequest` value
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Device state as reported in `bState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuState {
    /// appIDLE
    AppIdle,
    /// appDETACH
    AppDetach,
    /// dfuIDLE
    DfuIdle,
    /// dfuDNLOAD-SYNC
    DnloadSync,
    /// dfuDNBUSY
    DnBusy,
    /// dfuDNLOAD-IDLE
    DnloadIdle,
    /// dfuMANIFEST-SYNC
    ManifestSync,
    /// dfuMANIFEST
    Manifest,
    /// dfuMANIFEST-WAIT-RESET
    ManifestWaitReset,
    /// dfuUPLOAD-IDLE
    UploadIdle,
    /// dfuERROR
    Error,
}

impl DfuState {
    /// Decode `bState`
    pub fn from_code(code: u8) -> Option<Self> {
        let state = match code {
            0 => DfuState::AppIdle,
            1 => DfuState::AppDetach,
            2 => DfuState::DfuIdle,
            3 => DfuState::DnloadSync,
            4 => DfuState::DnBusy,
            5 => DfuState::DnloadIdle,
            6 => DfuState::ManifestSync,
            7 => DfuState::Manifest,
            8 => DfuState::ManifestWaitReset,
            9 => DfuState::UploadIdle,
            10 => DfuState::Error,
            _ => return None,
        };
        Some(state)
    }

    /// Whether the device is still working and expects to be polled again
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            DfuState::DnloadSync | DfuState::DnBusy | DfuState::ManifestSync | DfuState::Manifest
        )
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DfuState::AppIdle => "appIDLE",
            DfuState::AppDetach => "appDETACH",
            DfuState::DfuIdle => "dfuIDLE",
            DfuState::DnloadSync => "dfuDNLOAD-SYNC",
            DfuState::DnBusy => "dfuDNBUSY",
            DfuState::DnloadIdle => "dfuDNLOAD-IDLE",
            DfuState::ManifestSync => "dfuMANIFEST-SYNC",
            DfuState::Manifest => "dfuMANIFEST",
            DfuState::ManifestWaitReset => "dfuMANIFEST-WAIT-RESET",
            DfuState::UploadIdle => "dfuUPLOAD-IDLE",
            DfuState::Error => "dfuERROR",
        };
        f.write_str(name)
    }
}

/// Result of the most recent request as reported in `bStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuStatus {
    /// No error
    Ok,
    /// File is not targeted for this device
    ErrTarget,
    /// File fails a vendor-specific verification test
    ErrFile,
    /// Device cannot write memory
    ErrWrite,
    /// Memory erase failed
    ErrErase,
    /// Memory erase check failed
    ErrCheckErased,
    /// Program memory function failed
    ErrProg,
    /// Programmed memory failed verification
    ErrVerify,
    /// Address out of range
    ErrAddress,
    /// Download ended before the device expected
    ErrNotDone,
    /// Firmware is corrupt, device cannot return to run-time mode
    ErrFirmware,
    /// Vendor-specific error
    ErrVendor,
    /// Unexpected USB reset
    ErrUsbReset,
    /// Unexpected power-on reset
    ErrPowerOnReset,
    /// Unknown error
    ErrUnknown,
    /// Device stalled an unexpected request
    ErrStalledPacket,
}

impl DfuStatus {
    /// Decode `bStatus`; unassigned codes map to [`DfuStatus::ErrUnknown`]
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => DfuStatus::Ok,
            0x01 => DfuStatus::ErrTarget,
            0x02 => DfuStatus::ErrFile,
            0x03 => DfuStatus::ErrWrite,
            0x04 => DfuStatus::ErrErase,
            0x05 => DfuStatus::ErrCheckErased,
            0x06 => DfuStatus::ErrProg,
            0x07 => DfuStatus::ErrVerify,
            0x08 => DfuStatus::ErrAddress,
            0x09 => DfuStatus::ErrNotDone,
            0x0A => DfuStatus::ErrFirmware,
            0x0B => DfuStatus::ErrVendor,
            0x0C => DfuStatus::ErrUsbReset,
            0x0D => DfuStatus::ErrPowerOnReset,
            0x0F => DfuStatus::ErrStalledPacket,
            _ => DfuStatus::ErrUnknown,
        }
    }

    /// Whether the status reports success
    pub fn is_ok(self) -> bool {
        self == DfuStatus::Ok
    }
}

impl fmt::Display for DfuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            DfuStatus::Ok => "no error",
            DfuStatus::ErrTarget => "file is not targeted for this device",
            DfuStatus::ErrFile => "file failed vendor verification",
            DfuStatus::ErrWrite => "unable to write memory",
            DfuStatus::ErrErase => "memory erase failed",
            DfuStatus::ErrCheckErased => "memory erase check failed",
            DfuStatus::ErrProg => "program memory function failed",
            DfuStatus::ErrVerify => "programmed memory failed verification",
            DfuStatus::ErrAddress => "address out of range",
            DfuStatus::ErrNotDone => "download ended before the device expected",
            DfuStatus::ErrFirmware => "firmware is corrupt",
            DfuStatus::ErrVendor => "vendor-specific error",
            DfuStatus::ErrUsbReset => "unexpected USB reset",
            DfuStatus::ErrPowerOnReset => "unexpected power-on reset",
            DfuStatus::ErrUnknown => "unknown error",
            DfuStatus::ErrStalledPacket => "device stalled an unexpected request",
        };
        f.write_str(description)
    }
}

/// Decoded DFU_GETSTATUS response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResponse {
    /// `bStatus`
    pub status: DfuStatus,
    /// `bwPollTimeout`, 24-bit milliseconds
    pub poll_timeout_ms: u32,
    /// `bState`
    pub state: DfuState,
    /// `iString`
    pub string_index: u8,
}

impl StatusResponse {
    /// Decode the six-byte GETSTATUS payload
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] for short payloads or unknown states.
    pub fn parse(raw: &[u8]) -> Result<Self, TransportError> {
        let &[status, t0, t1, t2, state, string_index, ..] = raw else {
            return Err(TransportError::Protocol(format!(
                "GETSTATUS returned {} bytes, expected {STATUS_LENGTH}",
                raw.len()
            )));
        };

        let state = DfuState::from_code(state)
            .ok_or_else(|| TransportError::Protocol(format!("unknown DFU state {state}")))?;

        Ok(Self {
            status: DfuStatus::from_code(status),
            poll_timeout_ms: u32::from_le_bytes([t0, t1, t2, 0]),
            state,
            string_index,
        })
    }

    /// Time the device asked the host to wait before polling again
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.poll_timeout_ms))
    }
}
