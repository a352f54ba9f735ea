//! Convenience re-exports for driving a bootloader session

pub use crate::config::SessionConfig;
pub use crate::descriptor::{DFUSE_VERSION, FunctionalDescriptor, InterfaceDescriptor};
pub use crate::error::{ConnectError, FinalizeError, SessionError, TransferError, TransportError};
pub use crate::session::{DeviceSession, FlashLease, SessionState};
pub use crate::transport::DfuTransport;
pub use crate::usb::{UsbBackend, UsbDfuTransport};
