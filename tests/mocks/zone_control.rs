//! Recording zone-control session

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use powermate_bridge::dispatch::{PlaybackControl, ZoneControl};

/// One transport call as seen by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Control(String, PlaybackControl),
    ToggleMute(String),
    Standby(String),
    ChangeVolume(String, i32),
    Seek(String, i32),
}

pub struct MockZoneControl {
    calls: mpsc::UnboundedSender<Call>,
}

impl MockZoneControl {
    pub fn new() -> (Arc<Self>, CallLog) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { calls }), CallLog { rx })
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls
            .send(call)
            .map_err(|_| anyhow::anyhow!("call log dropped"))
    }
}

#[async_trait]
impl ZoneControl for MockZoneControl {
    async fn control(&self, zone: &str, control: PlaybackControl) -> Result<()> {
        self.record(Call::Control(zone.to_string(), control))
    }

    async fn toggle_mute(&self, zone: &str) -> Result<()> {
        self.record(Call::ToggleMute(zone.to_string()))
    }

    async fn standby(&self, zone: &str) -> Result<()> {
        self.record(Call::Standby(zone.to_string()))
    }

    async fn change_volume(&self, zone: &str, steps: i32) -> Result<()> {
        self.record(Call::ChangeVolume(zone.to_string(), steps))
    }

    async fn seek(&self, zone: &str, seconds: i32) -> Result<()> {
        self.record(Call::Seek(zone.to_string(), seconds))
    }
}

/// Receiving end of the recorded calls
pub struct CallLog {
    rx: mpsc::UnboundedReceiver<Call>,
}

impl CallLog {
    /// Next call, waiting up to a second
    pub async fn next(&mut self) -> Option<Call> {
        tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Everything issued so far after letting spawned calls run
    pub async fn drain(&mut self) -> Vec<Call> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut calls = Vec::new();
        while let Ok(call) = self.rx.try_recv() {
            calls.push(call);
        }
        calls
    }
}
