//! Upload Routes
//!
//! HTTP endpoints for the resumable chunked upload protocol.
//!
//! Endpoints:
//! - POST /upload/start - Start or resume an upload
//! - PUT /upload/chunk - Upload a chunk (raw body)
//! - GET /upload/status - Received ranges and session state
//! - POST /upload/finalize - Commit a complete upload
//! - DELETE /upload/:session_id - Abort an upload

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::error::Result;
use crate::state::AppState;
use crate::upload::{
    ChunkResponse, FinalizeRequest, FinalizedFile, StartRequest, StartResponse, StatusResponse,
    UploadError,
};

pub const SESSION_ID_HEADER: &str = "upload-session-id";
pub const OFFSET_HEADER: &str = "upload-offset";
pub const LENGTH_HEADER: &str = "upload-length";

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(max_chunk_size: usize) -> Router<AppState> {
    Router::new()
        .route("/start", post(start))
        .route(
            "/chunk",
            put(upload_chunk).layer(DefaultBodyLimit::max(max_chunk_size)),
        )
        .route("/status", get(status))
        .route("/finalize", post(finalize))
        .route("/:session_id", delete(abort))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload/start
async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>> {
    let response = state.transfer().start(request).await?;

    tracing::info!(
        session_id = %response.session_id,
        filename = %response.filename,
        resumed = response.resumed,
        received_bytes = response.received_bytes,
        "Upload started"
    );

    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
struct ChunkQuery {
    session_id: Option<String>,
    offset: Option<u64>,
    length: Option<u64>,
}

/// PUT /upload/chunk
///
/// The chunk is the raw request body. Session, offset and length come from
/// the query string, falling back to `Upload-*` headers.
///
/// Once a session is committed it is closed to chunks. Resending the final
/// chunk after a response with `complete: true` (for example when that
/// response was lost) yields 409 `SESSION_CLOSED`; clients should treat that
/// as success and confirm with `GET /upload/status` or `POST /upload/finalize`,
/// which repeats the committed result.
async fn upload_chunk(
    State(state): State<AppState>,
    Query(query): Query<ChunkQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChunkResponse>> {
    let session_id = query
        .session_id
        .or_else(|| header_str(&headers, SESSION_ID_HEADER))
        .ok_or_else(|| UploadError::BadRequest("missing session_id".to_string()))?;

    let offset = match query.offset {
        Some(offset) => offset,
        None => header_u64(&headers, OFFSET_HEADER)?
            .ok_or_else(|| UploadError::BadRequest("missing offset".to_string()))?,
    };

    let length = match query.length {
        Some(length) => Some(length),
        None => header_u64(&headers, LENGTH_HEADER)?,
    };

    if let Some(length) = length {
        if length != body.len() as u64 {
            return Err(UploadError::BadRequest(format!(
                "declared length {} does not match body length {}",
                length,
                body.len()
            )));
        }
    }

    let response = state
        .transfer()
        .upload_chunk(&session_id, offset, &body)
        .await?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    session_id: String,
}

/// GET /upload/status
async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>> {
    let response = state.transfer().status(&query.session_id).await?;
    Ok(Json(response))
}

/// POST /upload/finalize
async fn finalize(
    State(state): State<AppState>,
    Json(request): Json<FinalizeRequest>,
) -> Result<Json<FinalizedFile>> {
    let file = state.transfer().finalize(&request.session_id).await?;
    Ok(Json(file))
}

/// DELETE /upload/:session_id
async fn abort(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode> {
    state.transfer().abort(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Result<Option<u64>> {
    match header_str(headers, name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| UploadError::BadRequest(format!("invalid {} header: {}", name, value))),
        None => Ok(None),
    }
}
