//! DFU 1.1 protocol engine over USB class control requests
//!
//! [`UsbDfuTransport`] turns the chunk/finalize primitives of [`DfuTransport`]
//! into DNLOAD + GETSTATUS exchanges. The actual USB access is delegated to a
//! [`UsbBackend`], so the state handling can be exercised without hardware.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::descriptor::InterfaceDescriptor;
use crate::error::TransportError;
use crate::protocol::{DfuRequest, DfuState, STATUS_LENGTH, StatusResponse};
use crate::transport::DfuTransport;

/// Raw USB access needed by the DFU engine
///
/// Class requests are interface-recipient control transfers with `wIndex`
/// set to the interface number.
#[async_trait]
pub trait UsbBackend: Send {
    /// Open the underlying device
    async fn open(&mut self) -> Result<(), TransportError>;

    /// All alternate settings of the active configuration
    async fn interfaces(&mut self) -> Result<Vec<InterfaceDescriptor>, TransportError>;

    /// Claim an interface
    async fn claim_interface(&mut self, interface_number: u8) -> Result<(), TransportError>;

    /// Select an alternate setting on the claimed interface
    async fn set_alt_setting(
        &mut self,
        interface_number: u8,
        alt_setting: u8,
    ) -> Result<(), TransportError>;

    /// Host-to-device class request
    async fn class_out(
        &mut self,
        interface_number: u8,
        request: DfuRequest,
        value: u16,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Device-to-host class request
    async fn class_in(
        &mut self,
        interface_number: u8,
        request: DfuRequest,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, TransportError>;

    /// Issue a USB bus reset
    ///
    /// The device may drop off the bus while resetting; backends report
    /// that as [`TransportError::Disconnected`].
    async fn reset(&mut self) -> Result<(), TransportError>;

    /// Release the interface and close the device
    async fn release(&mut self) -> Result<(), TransportError>;

    /// Device identifier for logs
    fn label(&self) -> String;
}

/// [`DfuTransport`] speaking DFU 1.1 through a [`UsbBackend`]
pub struct UsbDfuTransport<B> {
    backend: B,
    interfaces: Vec<InterfaceDescriptor>,
    interface: Option<u8>,
    manifestation_tolerant: bool,
    will_detach: bool,
    block: u16,
    poll_interval_cap: Option<Duration>,
}

impl<B: UsbBackend> UsbDfuTransport<B> {
    /// Wrap a backend
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            interfaces: Vec::new(),
            interface: None,
            manifestation_tolerant: false,
            will_detach: false,
            block: 0,
            poll_interval_cap: None,
        }
    }

    /// Cap the wait between status polls
    ///
    /// By default the full `bwPollTimeout` the device requests is honoured.
    pub fn with_poll_interval_cap(mut self, cap: Duration) -> Self {
        self.poll_interval_cap = Some(cap);
        self
    }

    /// Borrow the backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Block number the next DNLOAD will carry
    pub fn next_block(&self) -> u16 {
        self.block
    }

    fn selected_interface(&self) -> Result<u8, TransportError> {
        self.interface
            .ok_or_else(|| TransportError::Protocol("no DFU interface selected".to_string()))
    }

    async fn get_status(&mut self, interface: u8) -> Result<StatusResponse, TransportError> {
        let raw = self
            .backend
            .class_in(interface, DfuRequest::GetStatus, 0, STATUS_LENGTH)
            .await?;
        let status = StatusResponse::parse(&raw)?;
        trace!(
            state = %status.state,
            status = %status.status,
            poll_ms = status.poll_timeout_ms,
            "DFU status"
        );
        Ok(status)
    }

    async fn clear_status(&mut self, interface: u8) {
        if let Err(e) = self
            .backend
            .class_out(interface, DfuRequest::ClrStatus, 0, &[])
            .await
        {
            warn!(error = %e, "DFU_CLRSTATUS failed");
        }
    }

    async fn wait(&mut self, status: &StatusResponse) {
        let requested = status.poll_timeout();
        let delay = self
            .poll_interval_cap
            .map_or(requested, |cap| requested.min(cap));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Turn an error status into a rejection, clearing it on the device
    async fn reject(&mut self, interface: u8, status: &StatusResponse) -> TransportError {
        self.clear_status(interface).await;
        TransportError::Rejected(format!("{} ({})", status.status, status.state))
    }

    /// Bring the selected interface back to dfuIDLE
    async fn reset_to_idle(&mut self, interface: u8) -> Result<(), TransportError> {
        let status = self.get_status(interface).await?;
        match status.state {
            DfuState::DfuIdle => Ok(()),
            DfuState::Error => {
                debug!(status = %status.status, "Clearing stale DFU error");
                self.backend
                    .class_out(interface, DfuRequest::ClrStatus, 0, &[])
                    .await
            }
            other => {
                debug!(state = %other, "Aborting to dfuIDLE");
                self.backend
                    .class_out(interface, DfuRequest::Abort, 0, &[])
                    .await
            }
        }
    }
}

#[async_trait]
impl<B: UsbBackend> DfuTransport for UsbDfuTransport<B> {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.backend.open().await
    }

    async fn list_interfaces(&mut self) -> Result<Vec<InterfaceDescriptor>, TransportError> {
        self.interfaces = self.backend.interfaces().await?;
        Ok(self.interfaces.clone())
    }

    async fn claim(&mut self, interface_number: u8) -> Result<(), TransportError> {
        self.backend.claim_interface(interface_number).await?;
        self.interface = Some(interface_number);
        Ok(())
    }

    async fn select_alternate(
        &mut self,
        interface_number: u8,
        alt_setting: u8,
    ) -> Result<(), TransportError> {
        self.backend
            .set_alt_setting(interface_number, alt_setting)
            .await?;
        self.interface = Some(interface_number);
        let functional = self
            .interfaces
            .iter()
            .find(|i| i.interface_number == interface_number && i.alt_setting == alt_setting)
            .and_then(|i| i.functional);
        self.manifestation_tolerant = functional.is_some_and(|f| f.manifestation_tolerant());
        self.will_detach = functional.is_some_and(|f| f.will_detach());
        self.block = 0;

        self.reset_to_idle(interface_number).await
    }

    async fn write_chunk(&mut self, offset: usize, data: &[u8]) -> Result<(), TransportError> {
        let interface = self.selected_interface()?;
        if offset == 0 {
            self.block = 0;
        }

        let block = self.block;
        self.backend
            .class_out(interface, DfuRequest::Dnload, block, data)
            .await?;
        self.block = self.block.wrapping_add(1);

        loop {
            let status = self.get_status(interface).await?;
            if !status.status.is_ok() || status.state == DfuState::Error {
                return Err(self.reject(interface, &status).await);
            }
            match status.state {
                DfuState::DnloadIdle => {
                    debug!(block, offset, len = data.len(), "Chunk accepted");
                    return Ok(());
                }
                DfuState::DnloadSync | DfuState::DnBusy => self.wait(&status).await,
                other => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected state {other} after DNLOAD block {block}"
                    )));
                }
            }
        }
    }

    async fn signal_finalize(&mut self) -> Result<(), TransportError> {
        let interface = self.selected_interface()?;
        self.backend
            .class_out(interface, DfuRequest::Dnload, self.block, &[])
            .await?;

        loop {
            let status = match self.get_status(interface).await {
                Ok(status) => status,
                Err(TransportError::Disconnected) if !self.manifestation_tolerant => {
                    debug!("Device reset during manifestation");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if !status.status.is_ok() || status.state == DfuState::Error {
                return Err(self.reject(interface, &status).await);
            }
            match status.state {
                DfuState::DfuIdle => {
                    debug!("Manifestation finished");
                    return Ok(());
                }
                DfuState::ManifestWaitReset if self.will_detach => {
                    debug!("Manifestation finished, device detaches on its own");
                    return Ok(());
                }
                DfuState::ManifestWaitReset => {
                    debug!("Manifestation finished, resetting device");
                    return match self.backend.reset().await {
                        Ok(()) | Err(TransportError::Disconnected) => Ok(()),
                        Err(e) => Err(e),
                    };
                }
                state if state.is_busy() => self.wait(&status).await,
                other => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected state {other} during manifestation"
                    )));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.interface = None;
        self.backend.release().await
    }

    fn device_label(&self) -> String {
        self.backend.label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FunctionalDescriptor;
    use crate::protocol::DfuStatus;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Out(DfuRequest, u16, usize),
        GetStatus,
        Alt(u8, u8),
        Reset,
    }

    #[derive(Default)]
    struct ScriptedBackend {
        statuses: VecDeque<Result<[u8; 6], TransportError>>,
        calls: Vec<Call>,
        interfaces: Vec<InterfaceDescriptor>,
    }

    impl ScriptedBackend {
        fn push(&mut self, status: DfuStatus, state: DfuState) {
            let status = match status {
                DfuStatus::Ok => 0,
                DfuStatus::ErrWrite => 3,
                DfuStatus::ErrVerify => 7,
                _ => 0x0E,
            };
            self.statuses
                .push_back(Ok([status, 0, 0, 0, state_code(state), 0]));
        }

        fn push_err(&mut self, error: TransportError) {
            self.statuses.push_back(Err(error));
        }
    }

    fn state_code(state: DfuState) -> u8 {
        (0..=10)
            .find(|&c| DfuState::from_code(c) == Some(state))
            .unwrap_or(0xFF)
    }

    #[async_trait]
    impl UsbBackend for ScriptedBackend {
        async fn open(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn interfaces(&mut self) -> Result<Vec<InterfaceDescriptor>, TransportError> {
            Ok(self.interfaces.clone())
        }

        async fn claim_interface(&mut self, _interface_number: u8) -> Result<(), TransportError> {
            Ok(())
        }

        async fn set_alt_setting(
            &mut self,
            interface_number: u8,
            alt_setting: u8,
        ) -> Result<(), TransportError> {
            self.calls.push(Call::Alt(interface_number, alt_setting));
            Ok(())
        }

        async fn class_out(
            &mut self,
            _interface_number: u8,
            request: DfuRequest,
            value: u16,
            data: &[u8],
        ) -> Result<(), TransportError> {
            self.calls.push(Call::Out(request, value, data.len()));
            Ok(())
        }

        async fn class_in(
            &mut self,
            _interface_number: u8,
            request: DfuRequest,
            _value: u16,
            _length: u16,
        ) -> Result<Vec<u8>, TransportError> {
            assert_eq!(request, DfuRequest::GetStatus);
            self.calls.push(Call::GetStatus);
            match self.statuses.pop_front() {
                Some(Ok(raw)) => Ok(raw.to_vec()),
                Some(Err(e)) => Err(e),
                None => Err(TransportError::Disconnected),
            }
        }

        async fn reset(&mut self) -> Result<(), TransportError> {
            self.calls.push(Call::Reset);
            Err(TransportError::Disconnected)
        }

        async fn release(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn label(&self) -> String {
            "scripted".to_string()
        }
    }

    async fn selected(backend: ScriptedBackend) -> Result<UsbDfuTransport<ScriptedBackend>, TransportError> {
        let mut transport = UsbDfuTransport::new(backend);
        transport.backend.push(DfuStatus::Ok, DfuState::DfuIdle);
        transport.list_interfaces().await?;
        transport.claim(0).await?;
        transport.select_alternate(0, 0).await?;
        transport.backend.calls.clear();
        Ok(transport)
    }

    #[tokio::test]
    async fn test_chunks_increment_block_number() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default()).await?;
        transport.backend.push(DfuStatus::Ok, DfuState::DnBusy);
        transport.backend.push(DfuStatus::Ok, DfuState::DnloadIdle);
        transport.backend.push(DfuStatus::Ok, DfuState::DnloadIdle);

        transport.write_chunk(0, &[0xAA; 8]).await?;
        transport.write_chunk(8, &[0xBB; 3]).await?;

        assert_eq!(
            transport.backend.calls,
            vec![
                Call::Out(DfuRequest::Dnload, 0, 8),
                Call::GetStatus,
                Call::GetStatus,
                Call::Out(DfuRequest::Dnload, 1, 3),
                Call::GetStatus,
            ]
        );
        assert_eq!(transport.next_block(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_offset_zero_restarts_block_numbering() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default()).await?;
        for _ in 0..3 {
            transport.backend.push(DfuStatus::Ok, DfuState::DnloadIdle);
        }

        transport.write_chunk(0, &[1]).await?;
        transport.write_chunk(1, &[2]).await?;
        transport.write_chunk(0, &[1]).await?;

        assert_eq!(transport.backend.calls.get(4), Some(&Call::Out(DfuRequest::Dnload, 0, 1)));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_is_rejected_and_cleared() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default()).await?;
        transport.backend.push(DfuStatus::ErrWrite, DfuState::Error);

        let result = transport.write_chunk(0, &[0; 4]).await;
        assert_eq!(
            result,
            Err(TransportError::Rejected(
                "unable to write memory (dfuERROR)".to_string()
            ))
        );
        assert_eq!(
            transport.backend.calls.last(),
            Some(&Call::Out(DfuRequest::ClrStatus, 0, 0))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unexpected_state_is_protocol_error() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default()).await?;
        transport.backend.push(DfuStatus::Ok, DfuState::UploadIdle);

        let result = transport.write_chunk(0, &[0; 4]).await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_write_without_selection_fails() {
        let mut transport = UsbDfuTransport::new(ScriptedBackend::default());
        let result = transport.write_chunk(0, &[0; 4]).await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
        assert!(transport.backend.calls.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_polls_through_manifestation() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default()).await?;
        transport.backend.push(DfuStatus::Ok, DfuState::DnloadIdle);
        transport.write_chunk(0, &[0; 4]).await?;

        transport.backend.push(DfuStatus::Ok, DfuState::ManifestSync);
        transport.backend.push(DfuStatus::Ok, DfuState::Manifest);
        transport.backend.push(DfuStatus::Ok, DfuState::ManifestWaitReset);
        transport.signal_finalize().await?;

        assert_eq!(
            transport.backend.calls.get(2),
            Some(&Call::Out(DfuRequest::Dnload, 1, 0))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_finalize_resets_device_waiting_for_reset() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default()).await?;
        transport.backend.push(DfuStatus::Ok, DfuState::ManifestWaitReset);

        transport.signal_finalize().await?;

        assert_eq!(
            transport.backend.calls,
            vec![
                Call::Out(DfuRequest::Dnload, 0, 0),
                Call::GetStatus,
                Call::Reset,
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_finalize_skips_reset_when_device_detaches() -> Result<(), TransportError> {
        let functional = FunctionalDescriptor::new(64).with_will_detach(true);
        let backend = ScriptedBackend {
            interfaces: vec![InterfaceDescriptor::dfu(0, 0).with_functional(functional)],
            ..ScriptedBackend::default()
        };
        let mut transport = selected(backend).await?;
        transport.backend.push(DfuStatus::Ok, DfuState::ManifestWaitReset);

        transport.signal_finalize().await?;

        assert!(!transport.backend.calls.contains(&Call::Reset));
        Ok(())
    }

    #[tokio::test]
    async fn test_finalize_idle_needs_no_reset() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default()).await?;
        transport.backend.push(DfuStatus::Ok, DfuState::DfuIdle);

        transport.signal_finalize().await?;

        assert!(!transport.backend.calls.contains(&Call::Reset));
        Ok(())
    }

    #[tokio::test]
    async fn test_finalize_disconnect_is_success_when_not_tolerant() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default()).await?;
        transport.backend.push(DfuStatus::Ok, DfuState::Manifest);
        transport.backend.push_err(TransportError::Disconnected);

        transport.signal_finalize().await
    }

    #[tokio::test]
    async fn test_finalize_disconnect_fails_when_tolerant() -> Result<(), TransportError> {
        let backend = ScriptedBackend {
            interfaces: vec![
                InterfaceDescriptor::dfu(0, 0)
                    .with_functional(FunctionalDescriptor::new(64).with_manifestation_tolerant(true)),
            ],
            ..ScriptedBackend::default()
        };
        let mut transport = selected(backend).await?;
        transport.backend.push_err(TransportError::Disconnected);

        assert_eq!(
            transport.signal_finalize().await,
            Err(TransportError::Disconnected)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_finalize_verify_failure_is_rejected() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default()).await?;
        transport.backend.push(DfuStatus::ErrVerify, DfuState::Error);

        let result = transport.signal_finalize().await;
        assert!(matches!(result, Err(TransportError::Rejected(ref r)) if r.contains("verification")));
        Ok(())
    }

    #[tokio::test]
    async fn test_select_clears_stale_error() -> Result<(), TransportError> {
        let mut backend = ScriptedBackend::default();
        backend.push(DfuStatus::ErrWrite, DfuState::Error);
        let mut transport = UsbDfuTransport::new(backend);
        transport.claim(0).await?;
        transport.select_alternate(0, 1).await?;

        assert_eq!(
            transport.backend.calls,
            vec![
                Call::Alt(0, 1),
                Call::GetStatus,
                Call::Out(DfuRequest::ClrStatus, 0, 0),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_select_aborts_leftover_download() -> Result<(), TransportError> {
        let mut backend = ScriptedBackend::default();
        backend.push(DfuStatus::Ok, DfuState::DnloadIdle);
        let mut transport = UsbDfuTransport::new(backend);
        transport.claim(0).await?;
        transport.select_alternate(0, 0).await?;

        assert_eq!(
            transport.backend.calls.last(),
            Some(&Call::Out(DfuRequest::Abort, 0, 0))
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_wait_honours_requested_timeout() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default()).await?;
        // dfuDNBUSY asking for 2000 ms
        transport
            .backend
            .statuses
            .push_back(Ok([0, 0xD0, 0x07, 0x00, 4, 0]));
        transport.backend.push(DfuStatus::Ok, DfuState::DnloadIdle);

        let started = tokio::time::Instant::now();
        transport.write_chunk(0, &[0; 4]).await?;
        assert!(started.elapsed() >= Duration::from_millis(2000));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_wait_is_capped_when_configured() -> Result<(), TransportError> {
        let mut transport = selected(ScriptedBackend::default())
            .await?
            .with_poll_interval_cap(Duration::from_millis(20));
        // bwPollTimeout of 0xFFFFFF ms
        transport
            .backend
            .statuses
            .push_back(Ok([0, 0xFF, 0xFF, 0xFF, 4, 0]));
        transport.backend.push(DfuStatus::Ok, DfuState::DnloadIdle);

        let started = tokio::time::Instant::now();
        transport.write_chunk(0, &[0; 4]).await?;
        assert!(started.elapsed() < Duration::from_secs(1));
        Ok(())
    }
}
