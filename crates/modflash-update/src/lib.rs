//! Firmware flashing orchestration for modflash
//!
//! [`UpdateOrchestrator::flash`] resolves a [`FirmwareSource`], checks the
//! image against its published SHA-256 and drives a claimed
//! [`DeviceSession`](modflash_dfu::DeviceSession) through transfer and
//! finalize, reporting [`ProgressEvent`]s to an [`EventSink`].
//!
//! - [`source`]: manifest selections, uploads and resolved images
//! - [`fetch`]: [`FsFetcher`] and [`HttpFetcher`]
//! - [`event`]: events and sinks
//! - [`orchestrator`]: the flash sequence and [`load_manifest`]
//! - [`error`]: [`UpdateError`] and its [`ErrorKind`]
//!
//! # Example
//!
//! ```
//! use modflash_dfu::mock::MockTransport;
//! use modflash_dfu::prelude::*;
//! use modflash_update::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = DeviceSession::open(Box::new(MockTransport::dfu(1024)), SessionConfig::default()).await?;
//! session.claim(0, 0).await?;
//!
//! let orchestrator = UpdateOrchestrator::new(FsFetcher::new("firmware"));
//! let source = FirmwareSource::upload(vec![0xDE, 0xAD, 0xBE, 0xEF], "fw.bin");
//! orchestrator.flash(source, &session, &TracingSink).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod error;
pub mod event;
pub mod fetch;
pub mod orchestrator;
pub mod prelude;
pub mod source;

pub use error::{ErrorKind, SelectionError, SourceError, UpdateError};
pub use event::{ChannelSink, EventSink, FlashPhase, ProgressEvent, TracingSink};
pub use fetch::{FetchConfig, FirmwareFetcher, FsFetcher, HttpFetcher};
pub use orchestrator::{
    DEFAULT_MANIFEST_PATH, FLASH_COMPLETE_MESSAGE, UpdateOrchestrator, load_manifest,
};
pub use source::{FirmwareImage, FirmwareSource, ManifestSelection};
