//! Crate-wide error taxonomy and result alias.
//!
//! Every fallible path in spigot funnels into [`SpigotError`]. The HTTP
//! layer maps variants to status codes via [`SpigotError::status_code`];
//! everything below the HTTP layer stays transport-agnostic.

use hyper::StatusCode;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SpigotError>;

/// Spigot error taxonomy.
#[derive(Debug, Error)]
pub enum SpigotError {
    /// Unknown pool, lease, or account/network mapping.
    #[error("not found: {0}")]
    NotFound(String),

    /// The pool's queue was empty at credential or lease creation.
    #[error("no credentials available")]
    OutOfCredentials,

    /// The caller presented no recognized account token.
    #[error("unauthorized")]
    Unauthorized,

    /// The forged operation bytes could not be parsed.
    #[error("malformed operation: {0}")]
    MalformedOperation(String),

    /// The signing policy refused the request.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// The ledger node returned a remote error; status and body are
    /// preserved for the caller.
    #[error("upstream failure ({status}): {body}")]
    Upstream { status: u16, body: String },

    /// External store round-trip failed.
    #[error("store error: {0}")]
    Store(String),

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SpigotError {
    /// HTTP status for this error, per the public API contract.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SpigotError::NotFound(_) => StatusCode::NOT_FOUND,
            SpigotError::OutOfCredentials => StatusCode::SERVICE_UNAVAILABLE,
            SpigotError::Unauthorized => StatusCode::UNAUTHORIZED,
            SpigotError::MalformedOperation(_) => StatusCode::BAD_REQUEST,
            SpigotError::PolicyDenied(_) => StatusCode::FORBIDDEN,
            SpigotError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            SpigotError::Store(_) | SpigotError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<std::io::Error> for SpigotError {
    fn from(e: std::io::Error) -> Self {
        SpigotError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for SpigotError {
    fn from(e: serde_json::Error) -> Self {
        SpigotError::Internal(format!("json: {e}"))
    }
}
