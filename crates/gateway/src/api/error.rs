use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use cg_domain::error::Error;

/// JSON error body: `{error, code, status}` plus `hint` for quota
/// failures. Messages come from [`Error::public_message`], never from
/// upstream bodies.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn body(err: &Error) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": err.public_message(),
            "code": err.code(),
            "status": err.status(),
        });
        if let Error::Quota { hint, .. } = err {
            body["hint"] = serde_json::Value::String(hint.clone());
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        (status, Json(Self::body(&self.0))).into_response()
    }
}
