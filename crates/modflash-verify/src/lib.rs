//! Firmware image integrity verification
//!
//! Images published in a manifest may carry a SHA-256 digest. [`verify`] checks
//! downloaded bytes against it before anything is written to a device.
//!
//! ```
//! use modflash_verify::{digest, verify};
//!
//! let image = [0xDE, 0xAD, 0xBE, 0xEF];
//! let published = digest(&image);
//! assert!(verify(&image, Some(&published)).is_ok());
//! assert!(verify(&image, None).is_ok());
//! assert!(verify(&[0x00], Some(&published)).is_err());
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod digest;
pub mod error;

pub use digest::{digest, digest_file, verify};
pub use error::VerifyError;
