//! API request handlers.

use axum::{Json, extract::State};
use serde::Serialize;

use super::state::AppState;
use crate::hub::HubStats;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.hub.is_shut_down() {
        "stopping"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Current hub statistics.
pub async fn stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}
