//! Roon pairing collaborator using rust-roon-api
//!
//! Connects to Roon Core via SOOD discovery and WebSocket protocol, keeps a
//! small zone cache for the indicator light and for resolving the configured
//! zone, and hands a [`RoonSession`] to the control loop while a core is
//! paired.

use anyhow::Result;
use async_trait::async_trait;
use roon_api::{
    status::{self, Status},
    transport::{self, volume, Control, Transport, Zone as RoonZone},
    Core, CoreEvent, Info, Parsed, RoonApi, Services, Svc,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::adapters::Startable;
use crate::bus::{BusEvent, PlaybackState, SharedBus};
use crate::config::get_config_file_path;
use crate::dispatch::{PlaybackControl, ZoneControl};
use crate::supervisor::SupervisorHandle;

const ROON_STATE_FILE: &str = "roon_state.json";

/// Initial reconnection delay
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Maximum reconnection delay
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

fn get_roon_state_path() -> PathBuf {
    get_config_file_path(ROON_STATE_FILE)
}

/// Cached zone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    pub zone_id: String,
    pub display_name: String,
    pub state: PlaybackState,
    pub outputs: Vec<Output>,
}

impl Zone {
    pub fn output_ids(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.output_id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    pub output_id: String,
    pub display_name: String,
    /// Whether the output has a volume control at all
    pub has_volume: bool,
    pub is_muted: bool,
}

/// Roon connection status
#[derive(Debug, Clone, Serialize)]
pub struct RoonStatus {
    pub connected: bool,
    pub core_name: Option<String>,
    pub core_version: Option<String>,
    pub zone_count: usize,
}

#[derive(Default)]
struct RoonState {
    connected: bool,
    core_name: Option<String>,
    core_version: Option<String>,
    zones: HashMap<String, Zone>,
    transport: Option<Transport>,
}

/// Find the zone a configured identifier refers to.
///
/// The identifier may name the zone itself or any of its outputs.
pub fn resolve_zone<'a>(zones: &'a HashMap<String, Zone>, id: &str) -> Option<&'a Zone> {
    zones.get(id).or_else(|| {
        zones
            .values()
            .find(|zone| zone.outputs.iter().any(|o| o.output_id == id))
    })
}

fn convert_state(state: &transport::State) -> PlaybackState {
    match state {
        transport::State::Playing => PlaybackState::Playing,
        transport::State::Paused => PlaybackState::Paused,
        transport::State::Loading => PlaybackState::Loading,
        transport::State::Stopped => PlaybackState::Stopped,
    }
}

fn convert_zone(roon_zone: &RoonZone) -> Zone {
    let outputs = roon_zone
        .outputs
        .iter()
        .map(|o| Output {
            output_id: o.output_id.clone(),
            display_name: o.display_name.clone(),
            has_volume: o.volume.is_some(),
            is_muted: o
                .volume
                .as_ref()
                .and_then(|v| v.is_muted)
                .unwrap_or(false),
        })
        .collect();

    Zone {
        zone_id: roon_zone.zone_id.clone(),
        display_name: roon_zone.display_name.clone(),
        state: convert_state(&roon_zone.state),
        outputs,
    }
}

/// Zone control bound to the currently paired core
#[derive(Clone)]
pub struct RoonSession {
    state: Arc<RwLock<RoonState>>,
}

impl RoonSession {
    /// Transport plus a snapshot of the resolved zone
    async fn resolve(&self, id: &str) -> Result<(Transport, Zone)> {
        let (transport, zone) = {
            let s = self.state.read().await;
            (s.transport.clone(), resolve_zone(&s.zones, id).cloned())
        };
        let transport = transport.ok_or_else(|| anyhow::anyhow!("Not connected to Roon"))?;
        let zone = zone.ok_or_else(|| anyhow::anyhow!("Unknown zone or output: {}", id))?;
        Ok((transport, zone))
    }
}

#[async_trait]
impl ZoneControl for RoonSession {
    async fn control(&self, zone: &str, control: PlaybackControl) -> Result<()> {
        let (transport, resolved) = self.resolve(zone).await?;
        let control = match control {
            PlaybackControl::PlayPause => Control::PlayPause,
            PlaybackControl::Stop => Control::Stop,
        };
        transport.control(&resolved.zone_id, &control).await;
        Ok(())
    }

    async fn toggle_mute(&self, zone: &str) -> Result<()> {
        let (transport, resolved) = self.resolve(zone).await?;
        for output in resolved.outputs.iter().filter(|o| o.has_volume) {
            let how = if output.is_muted {
                volume::Mute::Unmute
            } else {
                volume::Mute::Mute
            };
            tracing::debug!(
                "Mute toggle: output={}, was_muted={}",
                output.output_id,
                output.is_muted
            );
            transport.mute(&output.output_id, &how).await;
        }
        Ok(())
    }

    async fn standby(&self, zone: &str) -> Result<()> {
        let (transport, resolved) = self.resolve(zone).await?;
        for output in &resolved.outputs {
            transport.standby(&output.output_id, None).await;
        }
        Ok(())
    }

    /// Steps are in each output's own step size, not volume units.
    async fn change_volume(&self, zone: &str, steps: i32) -> Result<()> {
        let (transport, resolved) = self.resolve(zone).await?;
        for output in resolved.outputs.iter().filter(|o| o.has_volume) {
            tracing::debug!("Volume change: output={}, steps={}", output.output_id, steps);
            transport
                .change_volume(&output.output_id, &volume::ChangeMode::RelativeStep, steps)
                .await;
        }
        Ok(())
    }

    async fn seek(&self, zone: &str, seconds: i32) -> Result<()> {
        let (transport, resolved) = self.resolve(zone).await?;
        transport
            .seek(&resolved.zone_id, &transport::Seek::Relative, seconds)
            .await;
        Ok(())
    }
}

/// Roon adapter
#[derive(Clone)]
pub struct RoonAdapter {
    state: Arc<RwLock<RoonState>>,
    bus: SharedBus,
    supervisor: SupervisorHandle,
    /// Wrapped in RwLock to allow creating fresh token on restart
    shutdown: Arc<RwLock<CancellationToken>>,
    enabled: bool,
    /// Shown in the Roon status line next to the host name
    display_name: Option<String>,
    started: Arc<AtomicBool>,
}

impl RoonAdapter {
    pub fn new(
        bus: SharedBus,
        supervisor: SupervisorHandle,
        enabled: bool,
        display_name: Option<String>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(RoonState::default())),
            bus,
            supervisor,
            shutdown: Arc::new(RwLock::new(CancellationToken::new())),
            enabled,
            display_name,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Session over this adapter's cache and transport
    pub fn session(&self) -> RoonSession {
        RoonSession {
            state: self.state.clone(),
        }
    }

    /// Start the Roon event loop (internal - use Startable trait)
    async fn start_internal(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Create fresh cancellation token for this run (previous token may be cancelled)
        let shutdown = {
            let mut token = self.shutdown.write().await;
            *token = CancellationToken::new();
            token.clone()
        };

        let adapter = self.clone();

        tokio::spawn(async move {
            let mut retry_delay = INITIAL_RETRY_DELAY;

            loop {
                tracing::info!("Starting Roon discovery loop...");

                let loop_result = tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Roon adapter shutdown requested during discovery");
                        break;
                    }
                    result = run_roon_loop(adapter.clone(), shutdown.clone()) => result,
                };

                match loop_result {
                    Ok(()) => tracing::info!("Roon event loop ended normally"),
                    Err(e) => tracing::error!("Roon event loop error: {}", e),
                }

                adapter.core_lost().await;

                tracing::info!("Roon loop exited, reconnecting in {:?}...", retry_delay);

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Roon adapter shutdown requested");
                        break;
                    }
                    _ = tokio::time::sleep(retry_delay) => {
                        // Exponential backoff up to max
                        retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop the Roon adapter (internal - use Startable trait)
    async fn stop_internal(&self) {
        self.shutdown.read().await.cancel();
        self.started.store(false, Ordering::SeqCst);
        tracing::info!("Roon adapter stopped");
    }

    pub async fn get_status(&self) -> RoonStatus {
        let state = self.state.read().await;
        RoonStatus {
            connected: state.connected,
            core_name: state.core_name.clone(),
            core_version: state.core_version.clone(),
            zone_count: state.zones.len(),
        }
    }

    /// Cached zones, sorted by display name
    pub async fn get_zones(&self) -> Vec<Zone> {
        let mut zones: Vec<Zone> = {
            let state = self.state.read().await;
            state.zones.values().cloned().collect()
        };
        zones.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        zones
    }

    /// Text for the Roon status line
    fn status_line(&self, message: &str) -> String {
        match &self.display_name {
            Some(name) => format!("{} • {}", message, name),
            None => message.to_string(),
        }
    }

    async fn core_found(&self, core_name: String, core_version: String, transport: Option<Transport>) {
        {
            let mut s = self.state.write().await;
            s.connected = true;
            s.core_name = Some(core_name);
            s.core_version = Some(core_version);
            s.transport = transport;
        }

        if let Err(e) = self.supervisor.bind_session(Arc::new(self.session())).await {
            tracing::warn!("Could not hand Roon session to control loop: {}", e);
        }
    }

    async fn core_lost(&self) {
        let was_connected = {
            let mut s = self.state.write().await;
            let was_connected = s.connected;
            s.connected = false;
            s.core_name = None;
            s.core_version = None;
            s.zones.clear();
            s.transport = None;
            was_connected
        };

        if was_connected {
            self.bus.publish(BusEvent::RoonDisconnected);
            if let Err(e) = self.supervisor.unbind_session().await {
                tracing::debug!("Control loop gone while revoking Roon session: {}", e);
            }
        }
    }

    async fn zones_changed(&self, zones: Vec<RoonZone>) {
        self.update_zones(zones.iter().map(convert_zone).collect())
            .await;
    }

    /// Merge zone updates into the cache and announce them on the bus.
    pub async fn update_zones(&self, converted: Vec<Zone>) {
        {
            let mut s = self.state.write().await;
            for zone in &converted {
                tracing::debug!(
                    "Zone update: {} ({}) {}",
                    zone.display_name,
                    zone.zone_id,
                    zone.state
                );
                s.zones.insert(zone.zone_id.clone(), zone.clone());
            }
        }

        for zone in converted {
            self.bus.publish(BusEvent::ZoneStateChanged {
                output_ids: zone.output_ids(),
                zone_id: zone.zone_id,
                state: zone.state,
            });
        }
    }

    async fn zones_removed(&self, zone_ids: Vec<String>) {
        {
            let mut s = self.state.write().await;
            for zone_id in &zone_ids {
                tracing::debug!("Zone removed: {}", zone_id);
                s.zones.remove(zone_id);
            }
        }

        for zone_id in zone_ids {
            self.bus.publish(BusEvent::ZoneRemoved { zone_id });
        }
    }
}

/// Main Roon event loop
async fn run_roon_loop(adapter: RoonAdapter, shutdown: CancellationToken) -> Result<()> {
    tracing::info!("Starting Roon discovery...");

    let state_path = get_roon_state_path();
    if let Some(parent) = state_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created config directory: {:?}", parent);
        }
    }
    let state_path_str = state_path.to_string_lossy().to_string();
    tracing::info!("Roon state file: {}", state_path_str);

    // info! appends CARGO_PKG_NAME to the prefix: "com.roonlabs.powermate-bridge".
    // Cores paired with an earlier release under another id must authorize
    // this extension again.
    let info = roon_api::info!("com.roonlabs", "Griffin Powermate USB controller");

    let mut roon = RoonApi::new(info);

    // The Status service is what makes the extension visible in Roon Settings
    let (svc, status) = Status::new(&roon);

    let services = vec![
        Services::Transport(Transport::new()),
        Services::Status(status),
    ];

    let mut provided: HashMap<String, Svc> = HashMap::new();
    provided.insert(status::SVCNAME.to_owned(), svc);

    let state_path_clone = state_path_str.clone();
    let get_roon_state = move || RoonApi::load_roon_state(&state_path_clone);

    let (mut handles, mut core_rx) = roon
        .start_discovery(Box::new(get_roon_state), provided, Some(services))
        .await
        .ok_or_else(|| anyhow::anyhow!("Failed to start Roon discovery"))?;

    tracing::info!(
        "Roon discovery started, waiting for core (authorize in Roon → Settings → Extensions)..."
    );

    let mut bus_rx = adapter.bus.subscribe();

    handles.spawn(async move {
        let mut current_core: Option<Core> = None;
        let mut status_line = match adapter.supervisor.status().await {
            Ok(report) => (adapter.status_line(&report.message), report.is_error),
            Err(_) => (adapter.status_line(crate::supervisor::STATUS_MISSING), true),
        };

        loop {
            let event_result = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Roon event handler shutdown requested");
                    break;
                }
                bus_event = bus_rx.recv() => {
                    match bus_event {
                        Ok(BusEvent::StatusChanged { message, is_error }) => {
                            status_line = (adapter.status_line(&message), is_error);
                            if let Some(core) = current_core.as_mut() {
                                if let Some(status) = core.get_status() {
                                    status.set_status(status_line.0.clone(), status_line.1).await;
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Roon adapter lagged {} bus events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                    continue;
                }
                result = core_rx.recv() => result,
            };

            let Some((event, msg)) = event_result else {
                // Channel closed - exit to allow reconnection
                tracing::info!("Roon event channel closed, exiting handler");
                break;
            };

            match event {
                CoreEvent::Found(mut core) => {
                    let core_name = core.display_name.clone();
                    let core_version = core.display_version.clone();
                    tracing::info!("Roon Core found: {} (version {})", core_name, core_version);

                    if let Some(status) = core.get_status() {
                        status.set_status(status_line.0.clone(), status_line.1).await;
                    }

                    let transport = core.get_transport().cloned();
                    if let Some(transport) = &transport {
                        transport.subscribe_zones().await;
                    }
                    adapter.core_found(core_name, core_version, transport).await;
                    current_core = Some(core);
                }
                CoreEvent::Lost(core) => {
                    tracing::warn!(
                        "Roon Core lost: {} (version {})",
                        core.display_name,
                        core.display_version
                    );
                    current_core = None;
                    adapter.core_lost().await;
                }
                _ => {}
            }

            if let Some((_, parsed)) = msg {
                match parsed {
                    Parsed::RoonState(roon_state) => {
                        // Persist pairing state
                        if let Err(e) = RoonApi::save_roon_state(&state_path_str, roon_state) {
                            tracing::warn!("Failed to save Roon state: {}", e);
                        } else {
                            tracing::debug!("Roon state saved to {}", state_path_str);
                        }
                    }
                    Parsed::Zones(zones) => adapter.zones_changed(zones).await,
                    Parsed::ZonesRemoved(zone_ids) => adapter.zones_removed(zone_ids).await,
                    _ => {}
                }
            }
        }
    });

    // Wait for all handles (runs until core connection ends)
    while handles.join_next().await.is_some() {}

    Ok(())
}

#[async_trait]
impl Startable for RoonAdapter {
    fn name(&self) -> &'static str {
        "roon"
    }

    async fn start(&self) -> Result<()> {
        self.start_internal().await
    }

    async fn stop(&self) {
        self.stop_internal().await
    }

    async fn can_start(&self) -> bool {
        self.enabled
    }
}
