use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

// GET /v1/health (public, no auth)
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "live_sessions": state.orchestrator.sessions().len(),
    }))
}
