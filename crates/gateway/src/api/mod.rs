pub mod ai;
pub mod auth;
pub mod error;
pub mod health;
pub mod payload;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub use error::ApiError;

/// Build the API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health::health));

    let protected = Router::new()
        .route("/v1/ai", post(ai::ai))
        .route("/v1/ai/stream", post(ai::ai_stream))
        .route("/v1/ai/stop", post(ai::stop))
        .route("/v1/ai/sessions", get(ai::sessions))
        // Multipart uploads need more than axum's 2 MB default.
        .layer(DefaultBodyLimit::max(payload::MAX_UPLOAD_BYTES * 2))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}
