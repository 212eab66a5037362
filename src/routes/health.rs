//! Health check endpoints
//!
//! - /health, /healthz - liveness probe
//! - /version - deployment verification

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use crate::server::http::AppState;

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Record process start; called once from main
pub fn mark_started() {
    let _ = STARTED.set(Instant::now());
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub status: &'static str,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    pub node_id: String,
    pub mode: &'static str,
    /// Live WebSocket subscriptions
    pub connections: usize,
}

/// Liveness probe: 200 whenever the process is serving
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        healthy: true,
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        uptime: STARTED.get().map(|s| s.elapsed().as_secs()).unwrap_or(0),
        node_id: state.args.node_id.to_string(),
        mode: if state.args.dev_mode { "dev" } else { "production" },
        connections: state.hub.connection_count(),
    };

    json_response(StatusCode::OK, &response)
}

/// Version info for deployment verification
pub fn version_info() -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    });
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_default()
}
