//! Transport abstraction between a session and the device

use async_trait::async_trait;

use crate::descriptor::InterfaceDescriptor;
use crate::error::TransportError;

/// Low-level access to a device in bootloader mode
///
/// A [`DeviceSession`](crate::DeviceSession) owns exactly one transport and
/// serializes every call into it, so implementations never see concurrent
/// requests.
#[async_trait]
pub trait DfuTransport: Send {
    /// Open the device for I/O
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Every interface alternate setting the device exposes
    async fn list_interfaces(&mut self) -> Result<Vec<InterfaceDescriptor>, TransportError>;

    /// Claim an interface for exclusive use
    async fn claim(&mut self, interface_number: u8) -> Result<(), TransportError>;

    /// Activate an alternate setting on a claimed interface
    async fn select_alternate(
        &mut self,
        interface_number: u8,
        alt_setting: u8,
    ) -> Result<(), TransportError>;

    /// Write one chunk of the image
    ///
    /// `offset` is the byte offset of `data` within the image. Returns once
    /// the device has accepted the chunk.
    async fn write_chunk(&mut self, offset: usize, data: &[u8]) -> Result<(), TransportError>;

    /// Tell the device the image is complete and wait for it to validate
    async fn signal_finalize(&mut self) -> Result<(), TransportError>;

    /// Release the interface and the device
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Human-readable device identifier for logs
    fn device_label(&self) -> String;
}
