//! HTTP handlers for the ingestion endpoints.

pub mod messages;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use ferry_services::{BatchInserter, PoolError, WorkerPool};

#[derive(Clone)]
pub struct ApiState {
    pub inserter: BatchInserter,
    /// Batch chunks are submitted here and written asynchronously.
    pub workers: WorkerPool,
}

impl ApiState {
    pub fn new(inserter: BatchInserter, workers: WorkerPool) -> Self {
        Self { inserter, workers }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

pub type ApiError = (StatusCode, Json<Value>);

fn error_body(status: StatusCode, reason: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": reason.into() })))
}

/// Every body the JSON extractor refuses is a client error.
fn bad_request(rejection: JsonRejection) -> ApiError {
    tracing::warn!(error = %rejection.body_text(), "rejected request body");
    error_body(StatusCode::BAD_REQUEST, rejection.body_text())
}

fn unavailable(err: PoolError) -> ApiError {
    let reason = match err {
        PoolError::QueueFull => "ingest queue is full",
        PoolError::Closed => "ingest service is shutting down",
    };
    error_body(StatusCode::SERVICE_UNAVAILABLE, reason)
}

pub use messages::{handle_batch_message, handle_message, handle_root, GREETING};
