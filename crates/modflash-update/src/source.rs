//! Firmware sources and resolved images

use modflash_manifest::{FirmwareBuild, FirmwareManifest};
use std::fmt;
use std::path::Path;

use crate::error::{SelectionError, SourceError};

/// A build chosen from a manifest by channel and position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSelection<'a> {
    manifest: &'a FirmwareManifest,
    channel: String,
    index: usize,
}

impl<'a> ManifestSelection<'a> {
    /// Select the build at `index` within `channel`
    pub fn new(manifest: &'a FirmwareManifest, channel: impl Into<String>, index: usize) -> Self {
        Self {
            manifest,
            channel: channel.into(),
            index,
        }
    }

    /// First build of the manifest's default channel
    ///
    /// Returns `None` when the manifest has no channels.
    pub fn preselected(manifest: &'a FirmwareManifest) -> Option<Self> {
        let channel = manifest.default_channel()?;
        Some(Self::new(manifest, channel, 0))
    }

    /// Selected channel
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Selected index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Look up the selected build
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::NotFound`] when the index is out of range.
    pub fn resolve(&self) -> Result<&'a FirmwareBuild, SelectionError> {
        self.manifest
            .build(&self.channel, self.index)
            .ok_or_else(|| SelectionError::NotFound {
                channel: self.channel.clone(),
                index: self.index,
                available: self.manifest.builds_for(&self.channel).len(),
            })
    }
}

/// Where the image for a flash comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareSource<'a> {
    /// A manifest build, fetched and verified against its digest
    Manifest(ManifestSelection<'a>),
    /// Bytes supplied by the operator, flashed without verification
    Upload {
        /// Image bytes
        bytes: Vec<u8>,
        /// Display name, usually the file name
        name: String,
    },
}

impl FirmwareSource<'static> {
    /// Operator-supplied bytes
    pub fn upload(bytes: Vec<u8>, name: impl Into<String>) -> Self {
        FirmwareSource::Upload {
            bytes,
            name: name.into(),
        }
    }

    /// Read a local file into an [`FirmwareSource::Upload`]
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::ReadFailed`] when the file cannot be read.
    pub async fn local_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SourceError::ReadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::upload(bytes, name))
    }
}

impl<'a> From<ManifestSelection<'a>> for FirmwareSource<'a> {
    fn from(selection: ManifestSelection<'a>) -> Self {
        FirmwareSource::Manifest(selection)
    }
}

/// Firmware bytes ready to be verified and written
#[derive(Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
    expected_sha256: Option<String>,
    label: String,
}

impl FirmwareImage {
    /// Image with an optional published digest
    pub fn new(bytes: Vec<u8>, expected_sha256: Option<String>, label: impl Into<String>) -> Self {
        Self {
            bytes,
            expected_sha256,
            label: label.into(),
        }
    }

    /// Image bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Digest the bytes must match, if any
    pub fn expected_sha256(&self) -> Option<&str> {
        self.expected_sha256.as_deref()
    }

    /// `manifest:<channel>/<version>` or `local-file:<name>`
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Image size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image has no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for FirmwareImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("label", &self.label)
            .field("len", &self.bytes.len())
            .field("expected_sha256", &self.expected_sha256)
            .finish()
    }
}
