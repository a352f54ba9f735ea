//! Progress events and sinks
//!
//! A flash reports what it is doing through an [`EventSink`]. Closures,
//! a tokio channel and `tracing` are supported out of the box.

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::ErrorKind;

/// Coarse step of a flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlashPhase {
    /// Image is being written
    Preparing,
    /// Device is validating the image
    Finalizing,
    /// Flash completed
    Done,
}

impl fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlashPhase::Preparing => "Preparing",
            FlashPhase::Finalizing => "Finalizing",
            FlashPhase::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Event emitted while a flash runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Operator-facing log line
    Log {
        /// Message text
        message: String,
    },
    /// Bytes accepted by the device so far
    Progress {
        /// Bytes written
        written: usize,
        /// Image size
        total: usize,
    },
    /// Phase change
    Phase {
        /// New phase
        phase: FlashPhase,
    },
    /// Flash succeeded
    Done,
    /// Flash failed; emitted exactly once per failed operation
    Failed {
        /// Failure category
        kind: ErrorKind,
        /// Failure description
        message: String,
    },
}

impl ProgressEvent {
    /// Log event
    pub fn log(message: impl Into<String>) -> Self {
        ProgressEvent::Log {
            message: message.into(),
        }
    }

    /// Completed percentage for [`ProgressEvent::Progress`], rounded down
    pub fn percent(&self) -> Option<u8> {
        match *self {
            ProgressEvent::Progress { written, total } => {
                let pct = written.saturating_mul(100).checked_div(total).unwrap_or(100);
                Some(u8::try_from(pct.min(100)).unwrap_or(100))
            }
            _ => None,
        }
    }
}

/// Receiver of [`ProgressEvent`]s
pub trait EventSink: Send + Sync {
    /// Deliver one event; must not block
    fn emit(&self, event: ProgressEvent);
}

impl<F> EventSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event);
    }
}

/// Sink forwarding events into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("Progress receiver dropped");
        }
    }
}

/// Sink writing events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Log { message } => info!(target: "modflash::flash", "{message}"),
            ProgressEvent::Progress { written, total } => {
                debug!(target: "modflash::flash", written, total, "Progress");
            }
            ProgressEvent::Phase { phase } => info!(target: "modflash::flash", %phase, "Phase"),
            ProgressEvent::Done => info!(target: "modflash::flash", "Done"),
            ProgressEvent::Failed { kind, message } => {
                error!(target: "modflash::flash", %kind, "{message}");
            }
        }
    }
}
