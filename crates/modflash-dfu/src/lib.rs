//! USB DFU bootloader sessions for modflash
//!
//! A [`DeviceSession`] drives one device through
//! `Opened → InterfaceClaimed → Transferring → Finalizing → Idle`, with
//! `Faulted` after a failed transfer or finalize. The device is reached
//! through a [`DfuTransport`]:
//!
//! - [`usb::UsbDfuTransport`]: DFU 1.1 class requests over a [`usb::UsbBackend`]
//! - `nusb_backend::NusbBackend`: real hardware through `nusb` (feature `usb`)
//! - [`mock::MockTransport`]: scripted in-memory device
//!
//! Only one transfer/finalize sequence may run per session; it is guarded by a
//! [`FlashLease`].
//!
//! # Example
//!
//! ```
//! use modflash_dfu::mock::MockTransport;
//! use modflash_dfu::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = DeviceSession::open(Box::new(MockTransport::dfu(2)), SessionConfig::default()).await?;
//! session.claim(0, 0).await?;
//!
//! let lease = session.lease()?;
//! lease.transfer(&[0xDE, 0xAD, 0xBE], |written, total| println!("{written}/{total}")).await?;
//! lease.finalize().await?;
//! assert_eq!(session.state(), SessionState::Idle);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod mock;
#[cfg(feature = "usb")]
#[cfg_attr(docsrs, doc(cfg(feature = "usb")))]
pub mod nusb_backend;
pub mod prelude;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod usb;

pub use config::SessionConfig;
pub use descriptor::{DFUSE_VERSION, FunctionalDescriptor, InterfaceDescriptor};
pub use error::{ConnectError, FinalizeError, SessionError, TransferError, TransportError};
pub use session::{DeviceSession, FlashLease, SessionState};
pub use transport::DfuTransport;
