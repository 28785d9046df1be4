//! HTTP API handlers
//!
//! Settings UI host, status and the zone list used to fill in the zone
//! setting. Settings requests are forwarded to the control loop; nothing here
//! touches settings directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::adapters::roon::{RoonAdapter, RoonStatus, Zone};
use crate::supervisor::{SupervisorError, SupervisorHandle};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub supervisor: SupervisorHandle,
    /// Absent when Roon is disabled
    pub roon: Option<RoonAdapter>,
}

impl AppState {
    pub fn new(supervisor: SupervisorHandle) -> Self {
        Self {
            supervisor,
            roon: None,
        }
    }

    pub fn with_roon(mut self, roon: RoonAdapter) -> Self {
        self.roon = Some(roon);
        self
    }
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: SupervisorError) -> axum::response::Response {
    let status = match e {
        SupervisorError::Settings(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SupervisorError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

/// Build the router with middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/zones", get(zones_handler))
        .route("/settings", get(get_settings_handler).post(save_settings_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Status as served over HTTP
#[derive(Serialize)]
pub struct StatusResponse {
    pub message: String,
    pub is_error: bool,
    pub device_attached: bool,
    pub zone_playing: bool,
    pub since: chrono::DateTime<chrono::Utc>,
    pub version: &'static str,
    pub roon: Option<RoonStatus>,
}

/// GET /status - Device/connection status
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let roon = match &state.roon {
        Some(adapter) => Some(adapter.get_status().await),
        None => None,
    };
    match state.supervisor.status().await {
        Ok(report) => Json(StatusResponse {
            message: report.message,
            is_error: report.is_error,
            device_attached: report.device_attached,
            zone_playing: report.zone_playing,
            since: report.since,
            version: env!("PMB_VERSION"),
            roon,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Serialize)]
pub struct ZonesResponse {
    pub zones: Vec<Zone>,
}

/// GET /zones - Zones of the paired core, for picking the zone setting
pub async fn zones_handler(State(state): State<AppState>) -> impl IntoResponse {
    let zones = match &state.roon {
        Some(adapter) => adapter.get_zones().await,
        None => Vec::new(),
    };
    Json(ZonesResponse { zones })
}

/// GET /settings - Active settings and their layout
pub async fn get_settings_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.supervisor.get_settings().await {
        Ok(layout) => (StatusCode::OK, Json(layout)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Save request body
#[derive(Deserialize)]
pub struct SaveSettingsRequest {
    #[serde(default)]
    pub values: Value,
    #[serde(default)]
    pub dry_run: bool,
}

/// POST /settings - Validate and (unless dry-run) commit settings
pub async fn save_settings_handler(
    State(state): State<AppState>,
    Json(req): Json<SaveSettingsRequest>,
) -> impl IntoResponse {
    let values = if req.values.is_null() {
        Value::Object(Default::default())
    } else {
        req.values
    };

    match state.supervisor.save_settings(values, req.dry_run).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}
