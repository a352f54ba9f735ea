//! Convenience re-exports for manifest handling

pub use crate::catalog::{FALLBACK_CHANNEL, FirmwareBuild, FirmwareManifest};
pub use crate::error::ManifestError;
