//! Action dispatch
//!
//! Maps disambiguated gestures plus the active settings onto zone transport
//! calls. Dispatch is fire-and-forget: the call runs on its own task and
//! failures are only logged.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::gesture::Gesture;
use crate::settings::{PressAction, RotateAction, Settings};

/// Transport control verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackControl {
    PlayPause,
    Stop,
}

/// Zone-control collaborator (a bound pairing session)
///
/// `zone` is the opaque identifier from the settings.
#[async_trait]
pub trait ZoneControl: Send + Sync {
    async fn control(&self, zone: &str, control: PlaybackControl) -> Result<()>;

    /// Flip the mute state of the zone's outputs
    async fn toggle_mute(&self, zone: &str) -> Result<()>;

    async fn standby(&self, zone: &str) -> Result<()>;

    /// Relative-step volume change
    async fn change_volume(&self, zone: &str, steps: i32) -> Result<()>;

    /// Relative seek
    async fn seek(&self, zone: &str, seconds: i32) -> Result<()>;
}

/// A concrete external call derived from a gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCall {
    Control(PlaybackControl),
    ToggleMute,
    Standby,
    ChangeVolume(i32),
    Seek(i32),
}

impl TransportCall {
    pub async fn execute(self, session: &dyn ZoneControl, zone: &str) -> Result<()> {
        match self {
            TransportCall::Control(control) => session.control(zone, control).await,
            TransportCall::ToggleMute => session.toggle_mute(zone).await,
            TransportCall::Standby => session.standby(zone).await,
            TransportCall::ChangeVolume(steps) => session.change_volume(zone, steps).await,
            TransportCall::Seek(seconds) => session.seek(zone, seconds).await,
        }
    }
}

fn press_call(action: PressAction) -> Option<TransportCall> {
    match action {
        PressAction::TogglePlayPause => Some(TransportCall::Control(PlaybackControl::PlayPause)),
        PressAction::ToggleMute => Some(TransportCall::ToggleMute),
        PressAction::Stop => Some(TransportCall::Control(PlaybackControl::Stop)),
        PressAction::Standby => Some(TransportCall::Standby),
        PressAction::None => None,
    }
}

/// Resolve what a gesture means under `settings`, ignoring session/zone.
///
/// Short presses always read `press_action` and long presses always read
/// `long_press_action`.
pub fn plan(gesture: Gesture, settings: &Settings) -> Option<TransportCall> {
    match gesture {
        Gesture::Press => press_call(settings.press_action),
        Gesture::LongPress => press_call(settings.long_press_action),
        Gesture::Rotate(0) => None,
        Gesture::Rotate(steps) => match settings.rotate_action {
            RotateAction::Volume => Some(TransportCall::ChangeVolume(steps)),
            RotateAction::Seek => {
                let seconds = i64::from(steps) * settings.seek_step_seconds();
                let seconds = seconds.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
                Some(TransportCall::Seek(seconds))
            }
            RotateAction::None => None,
        },
    }
}

/// Holds the currently bound session, if any
#[derive(Default)]
pub struct Dispatcher {
    session: Option<Arc<dyn ZoneControl>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, session: Arc<dyn ZoneControl>) {
        self.session = Some(session);
    }

    pub fn unbind(&mut self) {
        self.session = None;
    }

    /// Issue the call for `gesture`, if any. Returns what was issued.
    ///
    /// No session or no zone is the normal pre-pairing state and is a
    /// silent no-op. Must be called from within a tokio runtime.
    pub fn dispatch(&self, gesture: Gesture, settings: &Settings) -> Option<TransportCall> {
        let Some(session) = self.session.as_ref() else {
            tracing::debug!("No paired session, ignoring {:?}", gesture);
            return None;
        };
        let Some(zone) = settings.zone() else {
            tracing::debug!("No zone configured, ignoring {:?}", gesture);
            return None;
        };
        let call = plan(gesture, settings)?;

        tracing::debug!("Dispatching {:?} -> {:?} on {}", gesture, call, zone);
        let session = Arc::clone(session);
        let zone = zone.to_string();
        tokio::spawn(async move {
            if let Err(e) = call.execute(session.as_ref(), &zone).await {
                tracing::warn!("Transport call {:?} on {} failed: {}", call, zone, e);
            }
        });
        Some(call)
    }
}
