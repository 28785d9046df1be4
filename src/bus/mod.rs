//! Event bus for inter-component communication
//!
//! Uses tokio::sync::broadcast for pub/sub pattern.
//! The Roon adapter publishes zone state; the supervisor publishes status.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Playback state enumeration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    Loading,
    #[default]
    Unknown,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Loading => write!(f, "loading"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for PlaybackState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "playing" | "play" => Self::Playing,
            "paused" | "pause" => Self::Paused,
            "stopped" | "stop" => Self::Stopped,
            "loading" => Self::Loading,
            _ => Self::Unknown,
        }
    }
}

/// Event types that can be published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    // Pairing collaborator
    RoonDisconnected,
    ZoneStateChanged {
        zone_id: String,
        output_ids: Vec<String>,
        state: PlaybackState,
    },
    ZoneRemoved { zone_id: String },

    // Supervisor
    DeviceAttached { device: String },
    DeviceDetached,
    SettingsChanged,
    StatusChanged { message: String, is_error: bool },
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BusEvent) {
        // No subscribers is not an error
        if self.sender.send(event).is_err() {
            tracing::trace!("Bus event dropped (no subscribers)");
        }
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    /// Default capacity (256 events)
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
