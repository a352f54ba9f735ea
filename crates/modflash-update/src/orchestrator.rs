//! Flash orchestration
//!
//! Ties a firmware source, the integrity check and a claimed bootloader
//! session together and reports every step to an [`EventSink`].

use modflash_dfu::DeviceSession;
use modflash_manifest::FirmwareManifest;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{SourceError, UpdateError};
use crate::event::{EventSink, FlashPhase, ProgressEvent};
use crate::fetch::FirmwareFetcher;
use crate::source::{FirmwareImage, FirmwareSource};

/// Manifest location relative to the firmware root
pub const DEFAULT_MANIFEST_PATH: &str = "manifest.json";

/// Final log line of a successful flash
pub const FLASH_COMPLETE_MESSAGE: &str =
    "Flash complete. If the device doesn't reboot, power-cycle it.";

/// Fetch and parse a manifest
///
/// # Errors
///
/// Returns [`UpdateError::Source`] when the fetch fails and
/// [`UpdateError::Manifest`] when the document does not parse.
pub async fn load_manifest(
    fetcher: &dyn FirmwareFetcher,
    path: &str,
) -> Result<FirmwareManifest, UpdateError> {
    let raw = fetcher.fetch(path).await?;
    let manifest = FirmwareManifest::load(&raw)?;
    info!(
        path,
        channels = manifest.channel_count(),
        default = ?manifest.default_channel(),
        "Loaded manifest"
    );
    Ok(manifest)
}

/// Runs flash operations against bootloader sessions
#[derive(Clone)]
pub struct UpdateOrchestrator {
    fetcher: Arc<dyn FirmwareFetcher>,
}

impl std::fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOrchestrator").finish_non_exhaustive()
    }
}

impl UpdateOrchestrator {
    /// Orchestrator fetching manifest builds through `fetcher`
    pub fn new(fetcher: impl FirmwareFetcher + 'static) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
        }
    }

    /// Orchestrator sharing an existing fetcher
    pub fn with_fetcher(fetcher: Arc<dyn FirmwareFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetcher used for manifest builds
    pub fn fetcher(&self) -> &dyn FirmwareFetcher {
        self.fetcher.as_ref()
    }

    /// Flash `source` onto the device behind `session`
    ///
    /// Steps: take the session's flash lease, resolve the image, verify it
    /// when a digest is published, then transfer and finalize. The session
    /// must have a claimed interface. Nothing is retried.
    ///
    /// On failure exactly one [`ProgressEvent::Failed`] is emitted before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Any [`UpdateError`]; [`UpdateError::kind`] matches the `Failed` event.
    pub async fn flash(
        &self,
        source: FirmwareSource<'_>,
        session: &DeviceSession,
        sink: &dyn EventSink,
    ) -> Result<(), UpdateError> {
        let result = self.run(source, session, sink).await;

        if let Err(e) = &result {
            let kind = e.kind();
            error!(device = %session.label(), %kind, error = %e, "Flash failed");
            sink.emit(ProgressEvent::Failed {
                kind,
                message: e.to_string(),
            });
        }
        result
    }

    async fn run(
        &self,
        source: FirmwareSource<'_>,
        session: &DeviceSession,
        sink: &dyn EventSink,
    ) -> Result<(), UpdateError> {
        let lease = session.lease()?;

        let image = self.resolve(source, sink).await?;
        if let Some(expected) = image.expected_sha256() {
            modflash_verify::verify(image.bytes(), Some(expected))?;
            sink.emit(ProgressEvent::log("Checksum OK."));
        }

        lease.ensure_ready()?;

        phase(sink, FlashPhase::Preparing);
        info!(device = %session.label(), image = %image.label(), len = image.len(), "Flashing");
        lease
            .transfer(image.bytes(), |written, total| {
                sink.emit(ProgressEvent::Progress { written, total });
            })
            .await?;

        phase(sink, FlashPhase::Finalizing);
        lease.finalize().await?;

        phase(sink, FlashPhase::Done);
        sink.emit(ProgressEvent::log(FLASH_COMPLETE_MESSAGE));
        sink.emit(ProgressEvent::Done);
        info!(device = %session.label(), image = %image.label(), "Flash complete");
        Ok(())
    }

    async fn resolve(
        &self,
        source: FirmwareSource<'_>,
        sink: &dyn EventSink,
    ) -> Result<FirmwareImage, UpdateError> {
        let image = match source {
            FirmwareSource::Manifest(selection) => {
                let build = selection.resolve()?;
                sink.emit(ProgressEvent::log(format!("Downloading {} ...", build.file())));
                let bytes = self.fetcher.fetch(build.file()).await?;
                FirmwareImage::new(
                    bytes,
                    build.sha256().map(str::to_string),
                    format!("manifest:{}/{}", selection.channel(), build.version()),
                )
            }
            FirmwareSource::Upload { bytes, name } => {
                sink.emit(ProgressEvent::log(format!("Reading {name} ...")));
                FirmwareImage::new(bytes, None, format!("local-file:{name}"))
            }
        };

        if image.is_empty() {
            return Err(SourceError::EmptyImage {
                name: image.label().to_string(),
            }
            .into());
        }
        Ok(image)
    }
}

fn phase(sink: &dyn EventSink, phase: FlashPhase) {
    info!(%phase, "Flash phase");
    sink.emit(ProgressEvent::Phase { phase });
}
