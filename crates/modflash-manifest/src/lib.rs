//! Firmware version manifest for modflash
//!
//! A manifest lists firmware builds per release channel:
//!
//! ```json
//! {
//!   "default_channel": "stable",
//!   "channels": {
//!     "stable": [{ "version": "1.0", "file": "fw.bin", "sha256": "…", "notes": ["…"] }],
//!     "beta": []
//!   }
//! }
//! ```
//!
//! - [`catalog`]: [`FirmwareManifest`] and [`FirmwareBuild`]
//! - [`error`]: [`ManifestError`]
//!
//! # Example
//!
//! ```
//! use modflash_manifest::prelude::*;
//!
//! # fn main() -> Result<(), ManifestError> {
//! let manifest = FirmwareManifest::load(br#"{"channels":{"stable":[{"version":"1.0","file":"fw.bin"}]}}"#)?;
//! assert_eq!(manifest.default_channel(), Some("stable"));
//! assert_eq!(manifest.builds_for("stable").len(), 1);
//! assert!(manifest.builds_for("nightly").is_empty());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod catalog;
pub mod error;
pub mod prelude;

pub use catalog::{FALLBACK_CHANNEL, FirmwareBuild, FirmwareManifest};
pub use error::ManifestError;
