//! Bearer-account authorization.
//!
//! The caller presents its account name as a bearer token; the account
//! must exist in the registry's accounts map. This mirrors the API-key
//! model the service fronts for trusted IDE backends, not end users.

use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;

use crate::registry::PoolRegistry;

/// Extract and validate the calling account from the request headers.
///
/// Returns the account name when the header carries a recognized
/// bearer token; `None` means the request must be answered with 401.
pub fn authorized_account(headers: &HeaderMap, registry: &PoolRegistry) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || !registry.has_user(token) {
        return None;
    }
    Some(token.to_string())
}
