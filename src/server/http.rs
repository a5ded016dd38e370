//! HTTP server implementation.
//!
//! hyper http1 with TokioIo for async handling; one spawned task per
//! connection, manual dispatch over method and path segments. Every
//! request is answered, timed and logged; error statuses log at error
//! level, the rest at info.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Args;
use crate::registry::PoolRegistry;
use crate::routes;
use crate::types::{Result, SpigotError};

/// Shared application state.
pub struct AppState {
    pub args: Args,
    pub registry: Arc<PoolRegistry>,
    pub started: Instant,
}

impl AppState {
    pub fn new(args: Args, registry: Arc<PoolRegistry>) -> Self {
        Self {
            args,
            registry,
            started: Instant::now(),
        }
    }
}

/// Accept loop. Runs until the process exits.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!(
        "Spigot listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route one request, with timing and status logging.
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = dispatch(state, req).await?;

    let status = response.status();
    let duration_ms = start.elapsed().as_millis();
    if status.is_client_error() || status.is_server_error() {
        error!(%addr, %method, %path, status = status.as_u16(), duration_ms, "request failed");
    } else {
        info!(%addr, %method, %path, status = status.as_u16(), duration_ms, "request served");
    }
    Ok(response)
}

async fn dispatch(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // Unauthenticated surface.
    if method == Method::GET && matches!(segments.as_slice(), ["health"] | ["healthz"]) {
        return Ok(routes::health_check(state));
    }

    // Everything else requires a recognized bearer account.
    let Some(account) = routes::authorized_account(req.headers(), &state.registry) else {
        return Ok(routes::error_response(&SpigotError::Unauthorized));
    };

    let response = match (&method, segments.as_slice()) {
        (&Method::POST, [network]) => routes::handle_pop(state, &account, network).await,
        (&Method::GET, [network]) => routes::handle_count(state, &account, network).await,
        (&Method::POST, [network, "ephemeral"]) => {
            routes::handle_create_lease(state, &account, network).await
        }
        (&Method::GET, [network, "ephemeral", lease_id, "keys", _pkh]) => {
            routes::handle_public_key(state, &account, network, lease_id).await
        }
        (&Method::POST, [network, "ephemeral", lease_id, "keys", _pkh]) => {
            let (network, lease_id) = (network.to_string(), lease_id.to_string());
            let body = req.into_body().collect().await?.to_bytes();
            routes::handle_sign(state, &account, &network, &lease_id, body).await
        }
        _ => routes::status_response(StatusCode::NOT_FOUND),
    };
    Ok(response)
}
