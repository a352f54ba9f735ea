//! Convenience re-exports for running flashes

pub use crate::error::{ErrorKind, SelectionError, SourceError, UpdateError};
pub use crate::event::{ChannelSink, EventSink, FlashPhase, ProgressEvent, TracingSink};
pub use crate::fetch::{FetchConfig, FirmwareFetcher, FsFetcher, HttpFetcher};
pub use crate::orchestrator::{
    DEFAULT_MANIFEST_PATH, FLASH_COMPLETE_MESSAGE, UpdateOrchestrator, load_manifest,
};
pub use crate::source::{FirmwareImage, FirmwareSource, ManifestSelection};
