//! Connection/status supervisor
//!
//! Owns every piece of mutable state (settings, gesture state, device
//! handle, zone playback cache) and serializes all mutation through one
//! control loop. Three asynchronous sources feed it:
//! - device events and long-press timers, via the command channel
//! - the reconnect poll interval
//! - zone-state notifications from the pairing collaborator, via the bus
//!
//! Other components talk to it through a cloneable [`SupervisorHandle`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, PlaybackState, SharedBus};
use crate::device::{DeviceBackend, DeviceError, DeviceEvent, DeviceHandle, EventSink};
use crate::dispatch::{Dispatcher, ZoneControl};
use crate::gesture::{Gesture, GestureDisambiguator, PressToken};
use crate::settings::layout::{self, Layout};
use crate::settings::{LedMode, Settings, SettingsError, SettingsStore};

/// Default reconnect poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const COMMAND_CAPACITY: usize = 256;

pub const STATUS_ATTACHED: &str = "Connected to 1 USB device.";
pub const STATUS_MISSING: &str = "Could not find USB device.";

const LED_LIT: u8 = 255;
const LED_DARK: u8 = 0;

/// Messages into the control loop
pub enum Command {
    Device {
        generation: u64,
        event: DeviceEvent,
    },
    LongPressElapsed(PressToken),
    BindSession(Arc<dyn ZoneControl>),
    UnbindSession,
    GetSettings(oneshot::Sender<Layout>),
    SaveSettings {
        values: Value,
        dry_run: bool,
        reply: oneshot::Sender<Result<SaveResponse, SettingsError>>,
    },
    GetStatus(oneshot::Sender<StatusReport>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SaveStatus {
    Success,
    NotValid,
}

/// Reply to a settings save (or dry-run)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveResponse {
    pub status: SaveStatus,
    #[serde(flatten)]
    pub layout: Layout,
}

/// Status as exposed to status hosts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub message: String,
    pub is_error: bool,
    pub device_attached: bool,
    pub zone_playing: bool,
    pub since: DateTime<Utc>,
}

impl StatusReport {
    fn missing() -> Self {
        Self {
            message: STATUS_MISSING.to_string(),
            is_error: true,
            device_attached: false,
            zone_playing: false,
            since: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("control loop is not running")]
    Stopped,

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Light level for a mode given the zone's playback state
pub fn indicator_level(mode: LedMode, zone_playing: bool) -> u8 {
    match mode {
        LedMode::On => LED_LIT,
        LedMode::Off => LED_DARK,
        LedMode::WhenPlaying if zone_playing => LED_LIT,
        LedMode::WhenPlaying => LED_DARK,
    }
}

#[derive(Debug, Clone)]
struct ZoneState {
    output_ids: Vec<String>,
    state: PlaybackState,
}

/// Cloneable front door to the control loop
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SupervisorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SupervisorError::Stopped)?;
        reply_rx.await.map_err(|_| SupervisorError::Stopped)
    }

    /// Schema for the active settings
    pub async fn get_settings(&self) -> Result<Layout, SupervisorError> {
        self.request(Command::GetSettings).await
    }

    /// Validate `values` and, unless `dry_run`, commit them.
    pub async fn save_settings(
        &self,
        values: Value,
        dry_run: bool,
    ) -> Result<SaveResponse, SupervisorError> {
        let result = self
            .request(|reply| Command::SaveSettings {
                values,
                dry_run,
                reply,
            })
            .await?;
        Ok(result?)
    }

    pub async fn status(&self) -> Result<StatusReport, SupervisorError> {
        self.request(Command::GetStatus).await
    }

    /// A pairing session became available
    pub async fn bind_session(&self, session: Arc<dyn ZoneControl>) -> Result<(), SupervisorError> {
        self.tx
            .send(Command::BindSession(session))
            .await
            .map_err(|_| SupervisorError::Stopped)
    }

    pub async fn unbind_session(&self) -> Result<(), SupervisorError> {
        self.tx
            .send(Command::UnbindSession)
            .await
            .map_err(|_| SupervisorError::Stopped)
    }
}

pub struct Supervisor {
    settings: Settings,
    store: Box<dyn SettingsStore>,
    gestures: GestureDisambiguator,
    dispatcher: Dispatcher,
    backend: Arc<dyn DeviceBackend>,
    device: Option<Box<dyn DeviceHandle>>,
    generation: u64,
    led_level: Option<u8>,
    zones: HashMap<String, ZoneState>,
    status: StatusReport,
    /// Whether any StatusChanged has been published yet
    status_announced: bool,
    bus: SharedBus,
    poll_interval: Duration,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: Option<mpsc::Receiver<Command>>,
}

impl Supervisor {
    /// Build the supervisor, loading settings from `store`.
    pub fn new(
        store: Box<dyn SettingsStore>,
        backend: Arc<dyn DeviceBackend>,
        bus: SharedBus,
        poll_interval: Duration,
    ) -> (Self, SupervisorHandle) {
        let settings = Settings::load(store.as_ref());
        tracing::info!(
            "Settings loaded: zone={:?}, press={}, long_press={}, rotate={}",
            settings.zone(),
            settings.press_action,
            settings.long_press_action,
            settings.rotate_action
        );

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = SupervisorHandle {
            tx: commands_tx.clone(),
        };
        let supervisor = Self {
            settings,
            store,
            gestures: GestureDisambiguator::new(),
            dispatcher: Dispatcher::new(),
            backend,
            device: None,
            generation: 0,
            led_level: None,
            zones: HashMap::new(),
            status: StatusReport::missing(),
            status_announced: false,
            bus,
            poll_interval,
            commands_tx,
            commands_rx: Some(commands_rx),
        };
        (supervisor, handle)
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let Some(mut commands) = self.commands_rx.take() else {
            tracing::error!("Supervisor started twice");
            return;
        };
        let mut bus_rx = self.bus.subscribe();

        self.acquire_device();
        if !self.status_announced {
            self.publish_status();
        }

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Supervisor shutdown requested");
                    break;
                }
                _ = poll.tick() => {
                    if self.device.is_none() {
                        self.acquire_device();
                    }
                }
                Some(command) = commands.recv() => self.handle_command(command),
                event = bus_rx.recv() => match event {
                    Ok(event) => self.handle_bus_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Supervisor lagged {} bus events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, supervisor exiting");
                        break;
                    }
                },
            }
        }

        self.release_device();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Device { generation, event } => self.handle_device_event(generation, event),
            Command::LongPressElapsed(token) => {
                if let Some(gesture) = self.gestures.long_press_elapsed(token) {
                    self.fire(gesture);
                }
            }
            Command::BindSession(session) => {
                tracing::info!("Zone control session bound");
                self.dispatcher.bind(session);
            }
            Command::UnbindSession => {
                tracing::info!("Zone control session unbound");
                self.dispatcher.unbind();
            }
            Command::GetSettings(reply) => {
                if reply.send(layout::generate(&self.settings)).is_err() {
                    tracing::debug!("Settings requester went away");
                }
            }
            Command::SaveSettings {
                values,
                dry_run,
                reply,
            } => {
                let result = self.save_settings(values, dry_run);
                if reply.send(result).is_err() {
                    tracing::debug!("Settings saver went away");
                }
            }
            Command::GetStatus(reply) => {
                if reply.send(self.status.clone()).is_err() {
                    tracing::debug!("Status requester went away");
                }
            }
        }
    }

    fn handle_device_event(&mut self, generation: u64, event: DeviceEvent) {
        if generation != self.generation || self.device.is_none() {
            tracing::debug!("Ignoring {:?} from stale device generation {}", event, generation);
            return;
        }

        match event {
            DeviceEvent::ButtonDown => {
                tracing::debug!("PowerMate button down");
                let token = self.gestures.button_down();
                self.arm_long_press(token);
            }
            DeviceEvent::ButtonUp => {
                tracing::debug!("PowerMate button up");
                if let Some(gesture) = self.gestures.button_up() {
                    self.fire(gesture);
                }
            }
            DeviceEvent::Wheel(delta) => {
                tracing::debug!("PowerMate turned {}", delta);
                let now = Instant::now().into_std();
                if let Some(gesture) =
                    self.gestures
                        .wheel(delta, now, self.settings.dampener())
                {
                    self.fire(gesture);
                }
            }
            DeviceEvent::Disconnected => {
                tracing::warn!("PowerMate disconnected");
                self.release_device();
                self.update_status();
            }
        }
    }

    fn arm_long_press(&self, token: PressToken) {
        let delay = self.settings.long_press_duration();
        let tx = self.commands_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(Command::LongPressElapsed(token)).await.is_err() {
                tracing::debug!("Long-press timer fired after supervisor exit");
            }
        });
    }

    fn fire(&self, gesture: Gesture) {
        tracing::debug!("Gesture: {:?}", gesture);
        self.dispatcher.dispatch(gesture, &self.settings);
    }

    fn save_settings(&mut self, values: Value, dry_run: bool) -> Result<SaveResponse, SettingsError> {
        let candidate = Settings::from_value(values)?;
        let layout = layout::generate(&candidate);

        if layout.has_error {
            tracing::info!("Rejected invalid settings (dry_run={})", dry_run);
            return Ok(SaveResponse {
                status: SaveStatus::NotValid,
                layout,
            });
        }

        if dry_run {
            tracing::debug!("Settings dry-run validated");
        } else {
            self.commit(layout.values.clone());
        }
        Ok(SaveResponse {
            status: SaveStatus::Success,
            layout,
        })
    }

    /// Replace the active settings wholesale and persist them.
    fn commit(&mut self, settings: Settings) {
        let driver_changed = settings.hid_driver != self.settings.hid_driver;
        self.settings = settings;
        tracing::info!("Settings committed");

        // The in-memory commit stands even if persistence fails.
        if let Err(e) = self.store.save(&self.settings) {
            tracing::warn!("Failed to persist settings: {}", e);
        }
        self.bus.publish(BusEvent::SettingsChanged);

        if driver_changed && self.device.is_some() {
            tracing::info!("USB driver changed to {}, reopening device", self.settings.hid_driver);
            self.acquire_device();
        } else {
            self.update_status();
            self.refresh_led(false);
        }
    }

    // =========================================================================
    // Device lifecycle
    // =========================================================================

    /// (Re)acquire the device. Idempotent; failures only update status.
    fn acquire_device(&mut self) {
        self.release_device();

        self.generation += 1;
        let sink = EventSink::new(self.generation, self.commands_tx.clone());
        match self.backend.open(self.settings.hid_driver, sink) {
            Ok(device) => {
                let description = device.describe();
                tracing::info!("Acquired {}", description);
                self.device = Some(device);
                self.bus.publish(BusEvent::DeviceAttached {
                    device: description,
                });
                self.refresh_led(true);
            }
            Err(DeviceError::NotFound) => {
                tracing::debug!("PowerMate not found");
            }
            Err(e) => {
                tracing::warn!("Failed to open PowerMate: {}", e);
            }
        }
        self.update_status();
    }

    fn release_device(&mut self) {
        if let Some(device) = self.device.take() {
            tracing::info!("Releasing {}", device.describe());
            device.close();
            self.led_level = None;
            self.gestures.reset();
            self.bus.publish(BusEvent::DeviceDetached);
        }
    }

    // =========================================================================
    // Status and indicator light
    // =========================================================================

    fn zone_playing(&self) -> bool {
        let Some(zone) = self.settings.zone() else {
            return false;
        };
        self.zones.iter().any(|(zone_id, state)| {
            state.state == PlaybackState::Playing
                && (zone_id == zone || state.output_ids.iter().any(|id| id == zone))
        })
    }

    /// Recompute status; publish when the message changes.
    fn update_status(&mut self) {
        let attached = self.device.is_some();
        let (message, is_error) = if attached {
            (STATUS_ATTACHED, false)
        } else {
            (STATUS_MISSING, true)
        };
        self.status.zone_playing = self.zone_playing();

        if self.status.message != message || self.status.is_error != is_error {
            self.status.message = message.to_string();
            self.status.is_error = is_error;
            self.status.device_attached = attached;
            self.status.since = Utc::now();
            self.publish_status();
        }
    }

    fn publish_status(&mut self) {
        self.status_announced = true;
        tracing::info!("Status: {}", self.status.message);
        self.bus.publish(BusEvent::StatusChanged {
            message: self.status.message.clone(),
            is_error: self.status.is_error,
        });
    }

    /// Drive the light; `force` rewrites it even if the level is unchanged.
    fn refresh_led(&mut self, force: bool) {
        let level = indicator_level(self.settings.led_mode, self.zone_playing());
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if !force && self.led_level == Some(level) {
            return;
        }
        match device.set_brightness(level) {
            Ok(()) => self.led_level = Some(level),
            Err(e) => tracing::warn!("Failed to set PowerMate brightness: {}", e),
        }
    }

    fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::ZoneStateChanged {
                zone_id,
                output_ids,
                state,
            } => {
                self.zones.insert(zone_id, ZoneState { output_ids, state });
            }
            BusEvent::ZoneRemoved { zone_id } => {
                self.zones.remove(&zone_id);
            }
            BusEvent::RoonDisconnected => self.zones.clear(),
            _ => return,
        }
        self.status.zone_playing = self.zone_playing();
        self.refresh_led(false);
    }
}
