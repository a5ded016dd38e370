//! Regular pool routes: pop a credential, report pool status.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::server::AppState;
use crate::types::SpigotError;

use super::{error_response, json_response};

/// Response for a popped credential. The secret leaves custody here by
/// design: this route hands whole credentials to trusted backends.
#[derive(Serialize)]
struct PoppedCredential {
    secret: String,
    pkh: String,
}

#[derive(Serialize)]
struct PoolStatus {
    count: usize,
    balance: String,
}

/// `POST /{network}`: pop one credential from the account's pool.
pub async fn handle_pop(
    state: Arc<AppState>,
    account: &str,
    network: &str,
) -> Response<Full<Bytes>> {
    let Some(pool) = state.registry.pool(account, network) else {
        return error_response(&SpigotError::NotFound(format!("pool for {network}")));
    };

    match pool.pop().await {
        Ok(Some(secret)) => json_response(
            StatusCode::OK,
            &PoppedCredential {
                pkh: secret.address().to_string(),
                secret: secret.to_b58(),
            },
        ),
        Ok(None) => error_response(&SpigotError::OutOfCredentials),
        Err(e) => {
            warn!(pool = %pool.id(), error = %e, "credential pop failed");
            error_response(&e)
        }
    }
}

/// `GET /{network}`: queue depth and funding balance.
pub async fn handle_count(
    state: Arc<AppState>,
    account: &str,
    network: &str,
) -> Response<Full<Bytes>> {
    let Some(pool) = state.registry.pool(account, network) else {
        return error_response(&SpigotError::NotFound(format!("pool for {network}")));
    };

    let count = match pool.size().await {
        Ok(count) => count,
        Err(e) => return error_response(&e),
    };
    let balance = match pool.funding_balance().await {
        Ok(balance) => balance,
        Err(e) => return error_response(&e),
    };

    json_response(
        StatusCode::OK,
        &PoolStatus {
            count,
            balance: balance.to_string(),
        },
    )
}
