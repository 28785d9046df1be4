//! Device collaborator
//!
//! A backend opens the rotary controller and pushes raw events into the
//! supervisor's command channel through an [`EventSink`]. Each acquisition
//! gets a fresh generation number so events from a dropped handle can be
//! told apart from the current one.

pub mod hidraw;

use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::settings::HidDriver;
use crate::supervisor::Command;

pub use hidraw::HidrawBackend;

/// Raw device signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    ButtonDown,
    ButtonUp,
    /// Signed wheel delta (positive = clockwise)
    Wheel(i32),
    Disconnected,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no PowerMate device found")]
    NotFound,

    #[error("permission denied opening {path} (check udev rules)")]
    PermissionDenied { path: PathBuf },

    #[error("device I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Delivers one device's events to the control loop
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<Command>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::Sender<Command>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn command(&self, event: DeviceEvent) -> Command {
        Command::Device {
            generation: self.generation,
            event,
        }
    }

    /// Send from async code. Returns false once the control loop is gone.
    pub async fn emit(&self, event: DeviceEvent) -> bool {
        self.tx.send(self.command(event)).await.is_ok()
    }

    /// Send from a dedicated reader thread (never from async code).
    pub fn blocking_emit(&self, event: DeviceEvent) -> bool {
        self.tx.blocking_send(self.command(event)).is_ok()
    }
}

/// Opens devices (`open(driverHint) -> handle | failure`)
pub trait DeviceBackend: Send + Sync {
    fn open(
        &self,
        driver: HidDriver,
        events: EventSink,
    ) -> Result<Box<dyn DeviceHandle>, DeviceError>;
}

/// An acquired device
pub trait DeviceHandle: Send {
    /// Human-readable identification for logs
    fn describe(&self) -> String;

    /// Indicator light level, 0 (off) to 255 (full)
    fn set_brightness(&mut self, level: u8) -> Result<(), DeviceError>;

    /// Release the device; no further events are delivered for this handle.
    fn close(self: Box<Self>);
}
