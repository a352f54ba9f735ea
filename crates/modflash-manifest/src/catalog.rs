//! Firmware manifest catalog
//!
//! Parses the `manifest.json` published next to the firmware images and
//! answers channel and build lookups. A loaded manifest is immutable.

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Component, Path};
use tracing::debug;

use crate::error::ManifestError;

/// Channel selected when the manifest does not declare a usable default
pub const FALLBACK_CHANNEL: &str = "stable";

/// Length of a hex-encoded SHA-256 digest
const SHA256_HEX_LEN: usize = 64;

#[derive(Debug, Deserialize)]
struct RawManifest {
    channels: Option<IndexMap<String, Vec<RawBuild>>>,
    #[serde(default)]
    default_channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBuild {
    version: String,
    file: String,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    notes: Option<Vec<String>>,
}

/// A single firmware build listed in a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareBuild {
    version: String,
    file: String,
    sha256: Option<String>,
    notes: Vec<String>,
}

impl FirmwareBuild {
    /// Version string as published
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Image path relative to the manifest location
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Expected SHA-256 of the image, if the manifest publishes one
    pub fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref()
    }

    /// Release notes in display order
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Selector text: the version followed by the first release note
    pub fn label(&self) -> String {
        match self.notes.first() {
            Some(note) => format!("{} — {}", self.version, note),
            None => self.version.clone(),
        }
    }

    fn from_raw(channel: &str, raw: RawBuild) -> Result<Self, ManifestError> {
        if !is_relative_file(&raw.file) {
            return Err(ManifestError::InvalidFile {
                channel: channel.to_string(),
                version: raw.version,
                file: raw.file,
            });
        }

        // An empty digest is treated the same as a missing one.
        let sha256 = match raw.sha256 {
            Some(digest) if digest.is_empty() => None,
            Some(digest) if is_sha256_hex(&digest) => Some(digest),
            Some(digest) => {
                return Err(ManifestError::InvalidDigest {
                    channel: channel.to_string(),
                    version: raw.version,
                    digest,
                });
            }
            None => None,
        };

        Ok(Self {
            version: raw.version,
            file: raw.file,
            sha256,
            notes: raw.notes.unwrap_or_default(),
        })
    }
}

/// Firmware builds grouped by release channel
///
/// Channel order and build order follow the manifest document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareManifest {
    channels: IndexMap<String, Vec<FirmwareBuild>>,
    default_channel: Option<String>,
}

impl FirmwareManifest {
    /// Parse a manifest from raw JSON bytes
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Malformed`] when the payload is not JSON, lacks
    /// the `channels` mapping, or a build is missing `version`/`file`.
    /// Returns [`ManifestError::InvalidFile`] or [`ManifestError::InvalidDigest`]
    /// for builds with an unusable path or digest.
    pub fn load(raw: &[u8]) -> Result<Self, ManifestError> {
        let parsed: RawManifest = serde_json::from_slice(raw)?;

        let raw_channels = parsed
            .channels
            .ok_or_else(|| ManifestError::malformed("missing `channels` mapping"))?;

        let mut channels = IndexMap::with_capacity(raw_channels.len());
        for (name, builds) in raw_channels {
            let builds = builds
                .into_iter()
                .map(|raw| FirmwareBuild::from_raw(&name, raw))
                .collect::<Result<Vec<_>, _>>()?;
            channels.insert(name, builds);
        }

        debug!(
            channels = channels.len(),
            default = ?parsed.default_channel,
            "Loaded firmware manifest"
        );

        Ok(Self {
            channels,
            default_channel: parsed.default_channel,
        })
    }

    /// Channel to preselect
    ///
    /// Uses the declared default when it names an existing channel, then
    /// [`FALLBACK_CHANNEL`], then the first channel in document order.
    /// Returns `None` only when the manifest has no channels.
    pub fn default_channel(&self) -> Option<&str> {
        if let Some(declared) = self.default_channel.as_deref()
            && let Some((name, _)) = self.channels.get_key_value(declared)
        {
            return Some(name.as_str());
        }

        if let Some((name, _)) = self.channels.get_key_value(FALLBACK_CHANNEL) {
            return Some(name.as_str());
        }

        self.channels.keys().next().map(String::as_str)
    }

    /// Builds published on `channel`, empty for an unknown channel
    pub fn builds_for(&self, channel: &str) -> &[FirmwareBuild] {
        self.channels
            .get(channel)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Build at `index` within `channel`
    pub fn build(&self, channel: &str, index: usize) -> Option<&FirmwareBuild> {
        self.builds_for(channel).get(index)
    }

    /// Channel names in document order
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Default channel as declared in the document, whether or not it exists
    pub fn declared_default(&self) -> Option<&str> {
        self.default_channel.as_deref()
    }
}

fn is_relative_file(file: &str) -> bool {
    let path = Path::new(file);
    !file.is_empty()
        && !file.contains('\\')
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn is_sha256_hex(digest: &str) -> bool {
    digest.len() == SHA256_HEX_LEN && digest.bytes().all(|b| b.is_ascii_hexdigit())
}
