//! HTTP API handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::protocol::{SetStatusRequest, StatusReport};
use crate::session::SessionState;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Get session, playback, queue and feed status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatusReport>> {
    Json(ApiResponse::ok(state.session.report()))
}

/// Set Running/Stopped explicitly
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetStatusRequest>,
) -> Json<ApiResponse<SessionState>> {
    Json(ApiResponse::ok(state.session.set_state(req.status)))
}

/// Flip Running/Stopped
pub async fn toggle(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionState>> {
    Json(ApiResponse::ok(state.session.toggle()))
}

pub async fn start(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionState>> {
    Json(ApiResponse::ok(state.session.set_state(SessionState::Running)))
}

pub async fn stop(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionState>> {
    Json(ApiResponse::ok(state.session.set_state(SessionState::Stopped)))
}

/// List output devices
#[cfg(feature = "device")]
pub async fn get_devices() -> Json<ApiResponse<Vec<crate::audio::device::OutputDeviceInfo>>> {
    match tokio::task::spawn_blocking(crate::audio::device::list_output_devices).await {
        Ok(devices) => Json(ApiResponse::ok(devices)),
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}
