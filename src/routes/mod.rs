//! HTTP routes for Spigot.

pub mod auth;
pub mod ephemeral;
pub mod health;
pub mod keys;

pub use auth::authorized_account;
pub use ephemeral::{handle_create_lease, handle_public_key, handle_sign};
pub use health::health_check;
pub use keys::{handle_count, handle_pop};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::types::SpigotError;

/// Build a JSON response with the given status.
pub(crate) fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(data) {
        Ok(body) => Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| internal_response()),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            internal_response()
        }
    }
}

/// Map an error onto the public status contract. Upstream failures keep
/// the remote body so the caller sees what the node said.
pub(crate) fn error_response(err: &SpigotError) -> Response<Full<Bytes>> {
    let status = err.status_code();
    let body = match err {
        SpigotError::Upstream { body, .. } => body.clone(),
        SpigotError::PolicyDenied(reason) => reason.clone(),
        // Internal details stay in the logs.
        SpigotError::Store(_) | SpigotError::Internal(_) => String::new(),
        other => other.to_string(),
    };
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| internal_response())
}

pub(crate) fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| internal_response())
}

fn internal_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
