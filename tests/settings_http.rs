#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! HTTP settings/status host tests
//!
//! Exercises the router in-process with `tower::ServiceExt::oneshot`.

mod mocks;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mocks::MockPowerMate;
use powermate_bridge::api::{router, AppState};
use powermate_bridge::adapters::roon::{Output, RoonAdapter, Zone};
use powermate_bridge::bus::{create_bus, PlaybackState};
use powermate_bridge::settings::MemoryStore;
use powermate_bridge::supervisor::Supervisor;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct Host {
    app: axum::Router,
    store: MemoryStore,
    roon: RoonAdapter,
    shutdown: CancellationToken,
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn host(device: MockPowerMate) -> Host {
    let store = MemoryStore::new();
    let bus = create_bus();
    let (supervisor, handle) = Supervisor::new(
        Box::new(store.clone()),
        Arc::new(device),
        bus.clone(),
        Duration::from_secs(1),
    );
    let shutdown = CancellationToken::new();
    tokio::spawn(supervisor.run(shutdown.clone()));
    // Never started: the zone cache is filled by hand
    let roon = RoonAdapter::new(bus, handle.clone(), true, None);
    Host {
        app: router(AppState::new(handle).with_roon(roon.clone())),
        store,
        roon,
        shutdown,
    }
}

fn zone(zone_id: &str, name: &str, output_id: &str) -> Zone {
    Zone {
        zone_id: zone_id.to_string(),
        display_name: name.to_string(),
        state: PlaybackState::Playing,
        outputs: vec![Output {
            output_id: output_id.to_string(),
            display_name: name.to_string(),
            has_volume: true,
            is_muted: false,
        }],
    }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_settings(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/settings")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn get_settings_returns_values_and_layout() {
    let host = host(MockPowerMate::attached());

    let (status, body) = send(&host.app, get("/settings")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_error"], false);
    assert_eq!(body["values"]["pressAction"], "toggle-mute");
    assert_eq!(body["values"]["longPressTimeout"], 500);
    assert_eq!(body["layout"][0]["type"], "zone");
    assert_eq!(body["layout"][0]["setting"], "zone");
}

#[tokio::test]
async fn post_valid_settings_commits() {
    let host = host(MockPowerMate::attached());

    let (status, body) = send(
        &host.app,
        post_settings(json!({
            "values": { "zone": "den", "rotateAction": "seek", "seekAmount": "10" },
            "dry_run": false
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Success");
    assert_eq!(body["values"]["seekAmount"], 10);
    assert_eq!(host.store.save_count(), 1);

    let (_, current) = send(&host.app, get("/settings")).await;
    assert_eq!(current["values"]["zone"], "den");
}

#[tokio::test]
async fn post_invalid_settings_reports_inline_error() {
    let host = host(MockPowerMate::attached());

    let (status, body) = send(
        &host.app,
        post_settings(json!({
            "values": { "longPressAction": "stop", "longPressTimeout": 50 }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "NotValid");
    assert_eq!(body["has_error"], true);
    let timeout = body["layout"]
        .as_array()
        .unwrap()
        .iter()
        .find(|w| w["setting"] == "longPressTimeout")
        .expect("timeout field present");
    assert_eq!(
        timeout["error"],
        "Long Press Timeout must be between 100 and 2000 milliseconds."
    );
    assert_eq!(host.store.save_count(), 0);
}

#[tokio::test]
async fn post_dry_run_does_not_persist() {
    let host = host(MockPowerMate::attached());

    let (status, body) = send(
        &host.app,
        post_settings(json!({ "values": { "zone": "den" }, "dry_run": true })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Success");
    assert_eq!(host.store.save_count(), 0);

    let (_, current) = send(&host.app, get("/settings")).await;
    assert_eq!(current["values"]["zone"], Value::Null);
}

#[tokio::test]
async fn malformed_values_are_unprocessable() {
    let host = host(MockPowerMate::attached());

    let (status, body) = send(
        &host.app,
        post_settings(json!({ "values": { "zone": 42 } })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("zone id"));
}

#[tokio::test]
async fn non_numeric_field_is_an_inline_error() {
    let host = host(MockPowerMate::attached());

    let (status, body) = send(
        &host.app,
        post_settings(json!({ "values": { "longPressAction": "stop", "longPressTimeout": "soon" } })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "NotValid");
    assert_eq!(body["has_error"], true);
    assert_eq!(body["values"]["longPressTimeout"], "soon");
    assert_eq!(host.store.save_count(), 0);
}

#[tokio::test]
async fn status_reports_missing_device() {
    let host = host(MockPowerMate::absent());

    let (status, body) = send(&host.app, get("/status")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Could not find USB device.");
    assert_eq!(body["is_error"], true);
    assert_eq!(body["device_attached"], false);
    assert_eq!(body["zone_playing"], false);
}

#[tokio::test]
async fn status_reports_attached_device() {
    let host = host(MockPowerMate::attached());

    let (_, body) = send(&host.app, get("/status")).await;

    assert_eq!(body["message"], "Connected to 1 USB device.");
    assert_eq!(body["is_error"], false);
    assert_eq!(body["device_attached"], true);
}

#[tokio::test]
async fn zones_lists_cached_zones_by_name() {
    let host = host(MockPowerMate::attached());
    host.roon
        .update_zones(vec![
            zone("z-2", "Living Room", "o-2"),
            zone("z-1", "Kitchen", "o-1"),
        ])
        .await;

    let (status, body) = send(&host.app, get("/zones")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["zones"][0]["display_name"], "Kitchen");
    assert_eq!(body["zones"][0]["outputs"][0]["output_id"], "o-1");
    assert_eq!(body["zones"][1]["zone_id"], "z-2");
}

#[tokio::test]
async fn status_includes_roon_connection() {
    let host = host(MockPowerMate::attached());
    host.roon.update_zones(vec![zone("z-1", "Kitchen", "o-1")]).await;

    let (_, body) = send(&host.app, get("/status")).await;

    assert_eq!(body["roon"]["connected"], false);
    assert_eq!(body["roon"]["zone_count"], 1);
}
