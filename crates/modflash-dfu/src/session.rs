//! Bootloader session state machine
//!
//! A [`DeviceSession`] owns the transport for one device. State changes are
//! made while the transport lock is held, so the state observed through
//! [`DeviceSession::state`] always matches the last completed device call.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{SessionConfig, millis};
use crate::descriptor::{DFUSE_VERSION, InterfaceDescriptor};
use crate::error::{ConnectError, FinalizeError, SessionError, TransferError, TransportError};
use crate::transport::DfuTransport;

/// Connection state of a [`DeviceSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Closed; the session cannot be used again
    Disconnected,
    /// Device opened and bootloader interfaces enumerated
    Opened,
    /// Interface claimed and alternate setting selected; ready to flash
    InterfaceClaimed,
    /// Image chunks are being written
    Transferring,
    /// Image written, waiting for the finalize handshake
    Finalizing,
    /// Flash completed
    Idle,
    /// A transfer or finalize failed; only `close` is allowed
    Faulted,
}

impl SessionState {
    /// Whether a flash can start from this state
    pub fn is_ready(self) -> bool {
        self == SessionState::InterfaceClaimed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Opened => "opened",
            SessionState::InterfaceClaimed => "interface-claimed",
            SessionState::Transferring => "transferring",
            SessionState::Finalizing => "finalizing",
            SessionState::Idle => "idle",
            SessionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// One open connection to one bootloader device
pub struct DeviceSession {
    transport: Mutex<Box<dyn DfuTransport>>,
    state: RwLock<SessionState>,
    claimed: RwLock<Option<usize>>,
    transfer_size: RwLock<u16>,
    leased: AtomicBool,
    interfaces: Vec<InterfaceDescriptor>,
    config: SessionConfig,
    label: String,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("label", &self.label)
            .field("state", &self.state())
            .field("transfer_size", &self.transfer_size())
            .field("interfaces", &self.interfaces.len())
            .field("leased", &self.is_busy())
            .finish()
    }
}

impl DeviceSession {
    /// Open a device and enumerate its bootloader interfaces
    ///
    /// The transfer size comes from the first DFU functional descriptor;
    /// [`SessionConfig::fallback_transfer_size`] applies only when the
    /// device publishes none.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::InvalidConfig`] for an unusable configuration
    /// - [`ConnectError::OpenFailed`] when the transport cannot be opened
    /// - [`ConnectError::NoBootloaderInterface`] when no interface speaks DFU
    /// - [`ConnectError::UnsupportedProtocol`] when every DFU interface is DfuSe
    pub async fn open(
        mut transport: Box<dyn DfuTransport>,
        config: SessionConfig,
    ) -> Result<Self, ConnectError> {
        config.validate().map_err(ConnectError::InvalidConfig)?;

        let label = transport.device_label();
        transport.open().await.map_err(ConnectError::OpenFailed)?;

        let all = match transport.list_interfaces().await {
            Ok(all) => all,
            Err(e) => {
                close_quietly(transport.as_mut(), &label).await;
                return Err(ConnectError::OpenFailed(e));
            }
        };

        let (dfuse, interfaces): (Vec<InterfaceDescriptor>, Vec<InterfaceDescriptor>) = all
            .into_iter()
            .filter(InterfaceDescriptor::is_bootloader)
            .partition(InterfaceDescriptor::is_dfuse);
        if interfaces.is_empty() {
            close_quietly(transport.as_mut(), &label).await;
            if dfuse.is_empty() {
                return Err(ConnectError::NoBootloaderInterface);
            }
            warn!(device = %label, interfaces = dfuse.len(), "Refusing DfuSe bootloader");
            return Err(ConnectError::UnsupportedProtocol {
                version: DFUSE_VERSION,
            });
        }
        if !dfuse.is_empty() {
            debug!(device = %label, skipped = dfuse.len(), "Ignoring DfuSe interfaces");
        }

        let transfer_size = interfaces
            .iter()
            .find_map(|i| i.functional)
            .map(|f| f.transfer_size)
            .filter(|&size| size > 0)
            .unwrap_or(config.fallback_transfer_size);

        info!(
            device = %label,
            interfaces = interfaces.len(),
            transfer_size,
            "Opened bootloader session"
        );

        Ok(Self {
            transport: Mutex::new(transport),
            state: RwLock::new(SessionState::Opened),
            claimed: RwLock::new(None),
            transfer_size: RwLock::new(transfer_size),
            leased: AtomicBool::new(false),
            interfaces,
            config,
            label,
        })
    }

    /// Claim the bootloader interface at `index` and select `alt_setting`
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless the session is
    /// [`SessionState::Opened`], and [`ConnectError::ClaimFailed`] when the
    /// index is out of range or the device refuses the claim.
    pub async fn claim(&self, index: usize, alt_setting: u8) -> Result<(), ConnectError> {
        let mut transport = self.transport.lock().await;

        let state = self.state();
        if state != SessionState::Opened {
            return Err(SessionError::InvalidState {
                operation: "claim",
                state,
            }
            .into());
        }

        let descriptor = self
            .interfaces
            .get(index)
            .ok_or_else(|| ConnectError::ClaimFailed {
                interface: index,
                reason: format!(
                    "no bootloader interface at index {index} ({} available)",
                    self.interfaces.len()
                ),
            })?;
        let number = descriptor.interface_number;

        let claim_failed = |e: TransportError| ConnectError::ClaimFailed {
            interface: index,
            reason: e.to_string(),
        };
        transport.claim(number).await.map_err(claim_failed)?;
        transport
            .select_alternate(number, alt_setting)
            .await
            .map_err(claim_failed)?;

        let functional = self
            .interfaces
            .iter()
            .find(|i| i.interface_number == number && i.alt_setting == alt_setting)
            .and_then(|i| i.functional)
            .or(descriptor.functional);
        if let Some(size) = functional.map(|f| f.transfer_size).filter(|&s| s > 0) {
            *self.transfer_size.write() = size;
        }

        *self.claimed.write() = Some(index);
        self.set_state(SessionState::InterfaceClaimed);
        info!(
            device = %self.label,
            interface = %descriptor.display_name(),
            alt_setting,
            transfer_size = self.transfer_size(),
            "Claimed bootloader interface"
        );
        Ok(())
    }

    /// Take the flash lease
    ///
    /// Only one lease exists at a time; it is released when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] while another lease is held.
    pub fn lease(&self) -> Result<FlashLease<'_>, SessionError> {
        if self
            .leased
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(device = %self.label, "Flash requested while another is in progress");
            return Err(SessionError::Busy);
        }
        debug!(device = %self.label, "Flash lease taken");
        Ok(FlashLease { session: self })
    }

    /// Close the device
    ///
    /// Best effort: transport failures are logged and the session still ends
    /// up [`SessionState::Disconnected`].
    pub async fn close(&self) {
        let mut transport = self.transport.lock().await;
        if self.state() == SessionState::Disconnected {
            return;
        }

        close_quietly(transport.as_mut(), &self.label).await;
        *self.claimed.write() = None;
        self.set_state(SessionState::Disconnected);
        info!(device = %self.label, "Closed bootloader session");
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Chunk size used for transfers
    pub fn transfer_size(&self) -> u16 {
        *self.transfer_size.read()
    }

    /// Bootloader interfaces found when the session was opened
    pub fn interfaces(&self) -> &[InterfaceDescriptor] {
        &self.interfaces
    }

    /// Interface selected by [`claim`](Self::claim)
    pub fn claimed_interface(&self) -> Option<&InterfaceDescriptor> {
        let index = (*self.claimed.read())?;
        self.interfaces.get(index)
    }

    /// Device identifier
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether a flash lease is held
    pub fn is_busy(&self) -> bool {
        self.leased.load(Ordering::Acquire)
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(device = %self.label, from = %*state, to = %next, "Session state change");
            *state = next;
        }
    }
}

async fn close_quietly(transport: &mut dyn DfuTransport, label: &str) {
    if let Err(e) = transport.close().await {
        warn!(device = %label, error = %e, "Failed to close device cleanly");
    }
}

/// Exclusive right to run one transfer/finalize sequence on a session
pub struct FlashLease<'a> {
    session: &'a DeviceSession,
}

impl fmt::Debug for FlashLease<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashLease")
            .field("device", &self.session.label)
            .finish()
    }
}

impl FlashLease<'_> {
    /// Session this lease guards
    pub fn session(&self) -> &DeviceSession {
        self.session
    }

    /// Check that the session has a claimed interface
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotReady`] otherwise.
    pub fn ensure_ready(&self) -> Result<(), SessionError> {
        let state = self.session.state();
        if state.is_ready() {
            Ok(())
        } else {
            Err(SessionError::NotReady { state })
        }
    }

    /// Write `image` in transfer-size chunks starting at offset 0
    ///
    /// `on_progress(written, total)` runs after every accepted chunk; the
    /// last call is `(total, total)`. On success the session waits in
    /// [`SessionState::Finalizing`].
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotReady`] without a claimed interface
    /// - [`TransferError::EmptyImage`] for an empty image, before any I/O
    /// - [`TransferError::DeviceRejected`] or [`TransferError::Timeout`] for
    ///   the failing chunk; the session becomes [`SessionState::Faulted`]
    pub async fn transfer<F>(&self, image: &[u8], mut on_progress: F) -> Result<(), TransferError>
    where
        F: FnMut(usize, usize) + Send,
    {
        let session = self.session;
        let mut transport = session.transport.lock().await;

        self.ensure_ready()?;
        if image.is_empty() {
            return Err(TransferError::EmptyImage);
        }

        let total = image.len();
        let chunk_size = usize::from(session.transfer_size());
        let timeout = session.config.chunk_timeout;
        session.set_state(SessionState::Transferring);
        info!(device = %session.label, total, chunk_size, "Starting transfer");

        let mut offset = 0;
        for chunk in image.chunks(chunk_size) {
            let result = tokio::time::timeout(timeout, transport.write_chunk(offset, chunk)).await;
            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(TransferError::DeviceRejected {
                    offset,
                    reason: e.to_string(),
                }),
                Err(_) => Some(TransferError::Timeout {
                    offset,
                    timeout_ms: millis(timeout),
                }),
            };
            if let Some(e) = failure {
                session.set_state(SessionState::Faulted);
                error!(device = %session.label, offset, error = %e, "Transfer failed");
                return Err(e);
            }

            offset += chunk.len();
            debug!(offset, total, "Chunk written");
            on_progress(offset, total);
        }

        session.set_state(SessionState::Finalizing);
        Ok(())
    }

    /// Ask the device to validate and boot the transferred image
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] unless a transfer just completed
    /// - [`FinalizeError::DeviceRejected`] or [`FinalizeError::Timeout`];
    ///   the session becomes [`SessionState::Faulted`]
    pub async fn finalize(&self) -> Result<(), FinalizeError> {
        let session = self.session;
        let mut transport = session.transport.lock().await;

        let state = session.state();
        if state != SessionState::Finalizing {
            return Err(SessionError::InvalidState {
                operation: "finalize",
                state,
            }
            .into());
        }

        let timeout = session.config.finalize_timeout;
        info!(device = %session.label, "Finalizing");
        let result = match tokio::time::timeout(timeout, transport.signal_finalize()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FinalizeError::DeviceRejected {
                reason: e.to_string(),
            }),
            Err(_) => Err(FinalizeError::Timeout {
                timeout_ms: millis(timeout),
            }),
        };

        match &result {
            Ok(()) => {
                session.set_state(SessionState::Idle);
                info!(device = %session.label, "Finalize complete");
            }
            Err(e) => {
                session.set_state(SessionState::Faulted);
                error!(device = %session.label, error = %e, "Finalize failed");
            }
        }
        result
    }
}

impl Drop for FlashLease<'_> {
    fn drop(&mut self) {
        self.session.leased.store(false, Ordering::Release);
        debug!(device = %self.session.label, "Flash lease released");
    }
}
