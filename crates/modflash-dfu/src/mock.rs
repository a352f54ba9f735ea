//! Scripted in-memory transport for tests and demos
//!
//! [`MockTransport`] behaves like a cooperative DFU device by default and can
//! be told to misbehave at specific points. A [`MockHandle`] keeps access to
//! what the device saw after the transport has been moved into a session.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::descriptor::{FunctionalDescriptor, InterfaceDescriptor};
use crate::error::TransportError;
use crate::transport::DfuTransport;

/// How the mock answers the finalize handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinalizeBehavior {
    /// Accept the image
    #[default]
    Succeed,
    /// Report a verification failure
    Fail,
    /// Never answer
    Hang,
}

/// Everything the mock device has observed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MockLog {
    /// `(offset, length)` of every accepted chunk, in order
    pub writes: Vec<(usize, usize)>,
    /// Concatenation of the accepted chunks
    pub image: Vec<u8>,
    /// Interface claimed by the host
    pub claimed: Option<u8>,
    /// `(interface, alt)` selected by the host
    pub alternate: Option<(u8, u8)>,
    /// Finalize handshake completed
    pub finalized: bool,
    /// Close was called
    pub closed: bool,
}

/// Shared view of a [`MockTransport`]'s log
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    log: Arc<Mutex<MockLog>>,
}

impl MockHandle {
    /// Snapshot of the log
    pub fn log(&self) -> MockLog {
        self.log.lock().clone()
    }

    /// Number of accepted chunk writes
    pub fn write_count(&self) -> usize {
        self.log.lock().writes.len()
    }

    /// Bytes received so far
    pub fn image(&self) -> Vec<u8> {
        self.log.lock().image.clone()
    }

    /// Whether finalize completed
    pub fn finalized(&self) -> bool {
        self.log.lock().finalized
    }

    /// Whether the transport was closed
    pub fn closed(&self) -> bool {
        self.log.lock().closed
    }
}

/// In-memory DFU device
#[derive(Debug, Clone)]
pub struct MockTransport {
    label: String,
    interfaces: Vec<InterfaceDescriptor>,
    reject_at: Option<usize>,
    write_delay: Option<Duration>,
    finalize: FinalizeBehavior,
    fail_open: bool,
    fail_close: bool,
    handle: MockHandle,
}

impl MockTransport {
    /// Device with a single DFU interface using `transfer_size` chunks
    pub fn dfu(transfer_size: u16) -> Self {
        Self::with_descriptors(vec![
            InterfaceDescriptor::dfu(0, 0)
                .with_name("@Internal Flash")
                .with_functional(FunctionalDescriptor::new(transfer_size)),
        ])
    }

    /// DFU device that publishes no functional descriptor
    pub fn without_functional_descriptor() -> Self {
        Self::with_descriptors(vec![InterfaceDescriptor::dfu(0, 0)])
    }

    /// Device in application mode, exposing only a HID interface
    pub fn without_bootloader() -> Self {
        Self::with_descriptors(vec![InterfaceDescriptor {
            class: 0x03,
            subclass: 0x00,
            protocol: 0x00,
            ..InterfaceDescriptor::dfu(0, 0)
        }])
    }

    fn with_descriptors(interfaces: Vec<InterfaceDescriptor>) -> Self {
        Self {
            label: "mock-dfu".to_string(),
            interfaces,
            reject_at: None,
            write_delay: None,
            finalize: FinalizeBehavior::Succeed,
            fail_open: false,
            fail_close: false,
            handle: MockHandle::default(),
        }
    }

    /// Replace the interface list
    pub fn with_interfaces(mut self, interfaces: Vec<InterfaceDescriptor>) -> Self {
        self.interfaces = interfaces;
        self
    }

    /// Set the device label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Reject the chunk containing byte `offset`
    pub fn reject_at(mut self, offset: usize) -> Self {
        self.reject_at = Some(offset);
        self
    }

    /// Delay every chunk write
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Report a verification failure on finalize
    pub fn finalize_fails(mut self) -> Self {
        self.finalize = FinalizeBehavior::Fail;
        self
    }

    /// Never answer the finalize handshake
    pub fn finalize_hangs(mut self) -> Self {
        self.finalize = FinalizeBehavior::Hang;
        self
    }

    /// Fail to open
    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Fail to close
    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Handle for inspecting the log after the transport is moved
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl DfuTransport for MockTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.fail_open {
            return Err(TransportError::Io("access denied".to_string()));
        }
        Ok(())
    }

    async fn list_interfaces(&mut self) -> Result<Vec<InterfaceDescriptor>, TransportError> {
        Ok(self.interfaces.clone())
    }

    async fn claim(&mut self, interface_number: u8) -> Result<(), TransportError> {
        if !self
            .interfaces
            .iter()
            .any(|i| i.interface_number == interface_number)
        {
            return Err(TransportError::Rejected(format!(
                "no interface {interface_number}"
            )));
        }
        self.handle.log.lock().claimed = Some(interface_number);
        Ok(())
    }

    async fn select_alternate(
        &mut self,
        interface_number: u8,
        alt_setting: u8,
    ) -> Result<(), TransportError> {
        self.handle.log.lock().alternate = Some((interface_number, alt_setting));
        Ok(())
    }

    async fn write_chunk(&mut self, offset: usize, data: &[u8]) -> Result<(), TransportError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(at) = self.reject_at
            && (offset..offset + data.len()).contains(&at)
        {
            return Err(TransportError::Rejected("errWRITE".to_string()));
        }

        trace!(offset, len = data.len(), "Mock chunk write");
        let mut log = self.handle.log.lock();
        log.writes.push((offset, data.len()));
        log.image.extend_from_slice(data);
        Ok(())
    }

    async fn signal_finalize(&mut self) -> Result<(), TransportError> {
        match self.finalize {
            FinalizeBehavior::Succeed => {
                self.handle.log.lock().finalized = true;
                Ok(())
            }
            FinalizeBehavior::Fail => Err(TransportError::Rejected(
                "programmed memory failed verification".to_string(),
            )),
            FinalizeBehavior::Hang => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.handle.log.lock().closed = true;
        if self.fail_close {
            return Err(TransportError::Disconnected);
        }
        Ok(())
    }

    fn device_label(&self) -> String {
        self.label.clone()
    }
}
