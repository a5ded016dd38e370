//! Ephemeral lease routes: provision a lease, read its public key,
//! request a policy-checked signature.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;
use tracing::debug;

use crate::policy::SigningPolicy;
use crate::server::AppState;
use crate::types::{Result, SpigotError};

use super::{error_response, json_response};

/// `POST /{network}/ephemeral`: provision a new lease.
pub async fn handle_create_lease(
    state: Arc<AppState>,
    account: &str,
    network: &str,
) -> Response<Full<Bytes>> {
    let Some(leases) = state.registry.ephemeral_pool(account, network) else {
        return error_response(&SpigotError::NotFound(format!("lease pool for {network}")));
    };

    match leases.create().await {
        Ok(grant) => json_response(StatusCode::OK, &grant),
        Err(e) => error_response(&e),
    }
}

/// `GET /{network}/ephemeral/{lease}/keys/{pkh}`: public key of the
/// lease's credential. The trailing path segment is the caller's view
/// of the key hash and is not consulted.
pub async fn handle_public_key(
    state: Arc<AppState>,
    account: &str,
    network: &str,
    lease_id: &str,
) -> Response<Full<Bytes>> {
    let Some(leases) = state.registry.ephemeral_pool(account, network) else {
        return error_response(&SpigotError::NotFound(format!("lease pool for {network}")));
    };

    let policy = SigningPolicy::new(leases);
    match policy.public_key(lease_id).await {
        Ok(response) => json_response(StatusCode::OK, &response),
        Err(e) => error_response(&e),
    }
}

/// `POST /{network}/ephemeral/{lease}/keys/{pkh}`: sign forged bytes
/// under the lease's remaining allowance.
///
/// The body carries the forged operation as a hex string, optionally
/// JSON-quoted.
pub async fn handle_sign(
    state: Arc<AppState>,
    account: &str,
    network: &str,
    lease_id: &str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let Some(leases) = state.registry.ephemeral_pool(account, network) else {
        return error_response(&SpigotError::NotFound(format!("lease pool for {network}")));
    };

    let forged = match decode_forged_body(&body) {
        Ok(forged) => forged,
        Err(e) => {
            debug!(lease = %lease_id, error = %e, "sign request body rejected");
            return error_response(&e);
        }
    };

    let policy = SigningPolicy::new(leases);
    match policy.sign(lease_id, &forged).await {
        Ok(response) => json_response(StatusCode::OK, &response),
        Err(e) => error_response(&e),
    }
}

/// Decode the request body into forged operation bytes.
fn decode_forged_body(body: &Bytes) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(body)
        .map_err(|_| SpigotError::MalformedOperation("body is not utf-8".into()))?;
    let hex_str = text.trim().trim_matches('"');
    if hex_str.is_empty() {
        return Err(SpigotError::MalformedOperation("empty body".into()));
    }
    hex::decode(hex_str)
        .map_err(|e| SpigotError::MalformedOperation(format!("invalid hex: {e}")))
}
