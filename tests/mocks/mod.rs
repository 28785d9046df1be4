//! Test doubles for the device and zone-control collaborators
//!
//! These stand in for the PowerMate hardware and a paired Roon core so the
//! control loop can be driven end to end without either.

#![allow(dead_code)]

pub mod powermate;
pub mod zone_control;

pub use powermate::MockPowerMate;
pub use zone_control::{Call, CallLog, MockZoneControl};

use std::time::Duration;

/// Poll `check` until it holds, or panic after `limit`.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(limit, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met within {:?}", limit);
}
