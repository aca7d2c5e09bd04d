//! Health check endpoints

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::AppState;
use crate::services::record_tree;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub record_root: bool,
    pub sweep_running: bool,
}

/// Health check - always returns OK if the server is running
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - verifies the recording root is usable
async fn readyz(State(state): State<AppState>) -> Json<ReadyResponse> {
    let root_ok = record_tree::ensure_root(state.index.root()).is_ok();

    Json(ReadyResponse {
        ready: root_ok,
        record_root: root_ok,
        sweep_running: state.sweeper.is_running(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
