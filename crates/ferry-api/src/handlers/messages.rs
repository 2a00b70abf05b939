//! /, /message and /batchmessage handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use ferry_core::Message;

use super::{bad_request, unavailable, ApiError, ApiState};

pub const GREETING: &str = "Welcome, glad to have you here!";

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: &'static str,
}

pub async fn handle_root() -> &'static str {
    GREETING
}

// ── /message (POST) ───────────────────────────────────────────────────────────

/// Accepts a single message. Logged only; single messages are not stored.
pub async fn handle_message(
    body: Result<Json<Message>, JsonRejection>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let Json(msg) = body.map_err(bad_request)?;

    tracing::info!(topic = %msg.topic, payload = %msg.payload, "message received");

    Ok((
        StatusCode::CREATED,
        Json(StatusResponse {
            status: "Message queued for processing",
        }),
    ))
}

// ── /batchmessage (POST) ──────────────────────────────────────────────────────

/// Accepts an array of messages and queues its chunks for insertion. The
/// response does not wait for the database.
pub async fn handle_batch_message(
    State(state): State<ApiState>,
    body: Result<Json<Vec<Message>>, JsonRejection>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let Json(batch) = body.map_err(bad_request)?;
    let messages = batch.len();

    let chunks = state
        .inserter
        .dispatch(batch, &state.workers)
        .map_err(|e| {
            tracing::warn!(messages, error = %e, "batch refused");
            unavailable(e)
        })?;

    tracing::info!(messages, chunks, "batch accepted");

    Ok((
        StatusCode::CREATED,
        Json(StatusResponse {
            status: "Messages queued for processing",
        }),
    ))
}
