//! Liveness endpoint.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

use super::json_response;

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    version: &'static str,
    uptime: u64,
    pools: usize,
    node_id: String,
    timestamp: String,
}

/// `GET /health`: returns 200 while the process serves traffic.
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &HealthResponse {
            healthy: true,
            version: env!("CARGO_PKG_VERSION"),
            uptime: state.started.elapsed().as_secs(),
            pools: state.registry.pool_count(),
            node_id: state.args.node_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        },
    )
}
