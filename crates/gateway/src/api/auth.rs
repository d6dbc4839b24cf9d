//! API authentication middleware.
//!
//! Reads the env var named by `config.server.api_token_env` (default
//! `CG_API_TOKEN`) **once at startup** and caches the SHA-256 digest in
//! `AppState`.
//! - If the env var is set and non-empty, every protected request must carry
//!   `Authorization: Bearer <token>`.
//! - If the env var is unset or empty, the server logs a warning once and
//!   allows unauthenticated access (dev mode).
//!
//! This authenticates the calling service. End-user identity comes from
//! the [`IdentityResolver`](crate::collab::IdentityResolver).

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use cg_domain::error::Error;

use crate::state::AppState;

use super::error::ApiError;

pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected_hash) = &state.api_token_hash else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Fixed-length digests compared in constant time.
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return ApiError(Error::Unauthorized("invalid or missing API token".into())).into_response();
    }

    next.run(req).await
}

/// Digest of the configured API token, or `None` in dev mode.
pub fn hash_token(token: &str) -> Option<Vec<u8>> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(Sha256::digest(token.as_bytes()).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_token_means_dev_mode() {
        assert!(hash_token("  ").is_none());
        assert_eq!(hash_token("secret").map(|h| h.len()), Some(32));
    }
}
