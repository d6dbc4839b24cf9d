//! Conversation endpoints.
//!
//! - `POST /v1/ai`: runs a turn and returns the final message
//! - `POST /v1/ai/stream`: same, streamed as SSE
//! - `POST /v1/ai/stop`: cancels a live session
//! - `GET /v1/ai/sessions`: the caller's live sessions

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use serde::Deserialize;

use crate::runtime::TurnEvent;
use crate::state::AppState;

use super::error::ApiError;
use super::payload::RequestPayload;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/ai (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn ai(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: RequestPayload,
) -> Result<Response, ApiError> {
    let identity = state.identity.resolve(&headers).await;
    let req = payload.into_turn_request()?;
    let mut handle = state.orchestrator.start_turn(&identity, req).await?;

    let mut tool_calls = Vec::new();
    let mut final_message = None;
    let mut usage = None;
    while let Some(event) = handle.events.recv().await {
        match event {
            TurnEvent::ToolCall { tool_name, .. } => tool_calls.push(tool_name),
            TurnEvent::Final {
                message_id,
                content,
                reconciled,
            } => {
                final_message = Some(serde_json::json!({
                    "message_id": message_id,
                    "content": content,
                    "reconciled": reconciled,
                }));
            }
            TurnEvent::Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            } => {
                usage = Some(serde_json::json!({
                    "prompt_tokens": prompt_tokens,
                    "completion_tokens": completion_tokens,
                    "total_tokens": total_tokens,
                }));
            }
            TurnEvent::Stopped => {
                return Ok(Json(serde_json::json!({
                    "session_id": handle.session_id,
                    "stopped": true,
                }))
                .into_response());
            }
            TurnEvent::Error {
                code,
                status,
                message,
            } => {
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let body = serde_json::json!({
                    "error": message,
                    "code": code,
                    "status": status.as_u16(),
                });
                return Ok((status, Json(body)).into_response());
            }
            _ => {}
        }
    }

    Ok(Json(serde_json::json!({
        "session_id": handle.session_id,
        "message": final_message,
        "tool_calls": tool_calls,
        "usage": usage,
    }))
    .into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/ai/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Preflight failures are plain JSON errors with a proper status; once
/// the stream is open, failures arrive as an `error` event.
pub async fn ai_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: RequestPayload,
) -> Result<Response, ApiError> {
    let identity = state.identity.resolve(&headers).await;
    let req = payload.into_turn_request()?;
    let handle = state.orchestrator.start_turn(&identity, req).await?;

    Ok(Sse::new(make_sse_stream(handle.events))
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn make_sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event.event_type()).data(data));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session control
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub session_id: String,
}

pub async fn stop(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<StopRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let identity = state.identity.resolve(&headers).await;
    state.orchestrator.stop(&identity, &body.session_id)?;
    Ok(Json(serde_json::json!({
        "session_id": body.session_id,
        "stopped": true,
    })))
}

pub async fn sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let identity = state.identity.resolve(&headers).await;
    let sessions = state.orchestrator.live_sessions(&identity)?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}
