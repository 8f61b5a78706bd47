//! File serving routes
//!
//! Lists, downloads and whole-file uploads for finalized files.

use std::io::SeekFrom;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::catalog::{parse_range, CatalogPage};
use crate::error::Result;
use crate::state::AppState;
use crate::upload::{FinalizedFile, UploadError};

pub const TOTAL_SIZE_HEADER: &str = "x-total-size";

/// Create the files router
///
/// `max_file_size` of 0 leaves whole-file uploads unbounded.
pub fn router(max_file_size: u64) -> Router<AppState> {
    let body_limit = if max_file_size == 0 {
        DefaultBodyLimit::disable()
    } else {
        DefaultBodyLimit::max(usize::try_from(max_file_size).unwrap_or(usize::MAX))
    };

    Router::new()
        .route("/files", get(list_files))
        .route("/files/:filename", put(put_file).layer(body_limit))
        .route("/download/:filename", get(download))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

/// GET /files
async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<CatalogPage>> {
    let page = state.catalog().page(query.offset, query.limit).await?;
    Ok(Json(page))
}

/// GET /download/:filename
///
/// Honours a single `Range` header so interrupted downloads can resume.
async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    request_headers: HeaderMap,
) -> Result<Response> {
    let (entry, mut file) = state.catalog().open(&filename).await?;
    let total = entry.size;

    let range = match request_headers.get(header::RANGE) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| UploadError::BadRequest("invalid Range header".to_string()))?;
            Some(parse_range(value, total)?)
        }
        None => None,
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header_value(&content_type(&entry.name))?);
    headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&format!(
            "attachment; filename*=UTF-8''{}",
            urlencoding::encode(&entry.name)
        ))?,
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(TOTAL_SIZE_HEADER, header_value(&total.to_string())?);

    if let Some(range) = range {
        tracing::debug!(
            filename = %entry.name,
            start = range.start,
            end = range.end,
            "Serving partial download"
        );

        file.seek(SeekFrom::Start(range.start)).await?;
        let stream = ReaderStream::new(file.take(range.len()));

        headers.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {}-{}/{}", range.start, range.end - 1, total))?,
        );
        headers.insert(header::CONTENT_LENGTH, header_value(&range.len().to_string())?);

        return Ok((StatusCode::PARTIAL_CONTENT, headers, Body::from_stream(stream)).into_response());
    }

    tracing::debug!(filename = %entry.name, size = total, "Serving download");
    headers.insert(header::CONTENT_LENGTH, header_value(&total.to_string())?);
    let stream = ReaderStream::new(file);

    Ok((StatusCode::OK, headers, Body::from_stream(stream)).into_response())
}

/// PUT /files/:filename
async fn put_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<FinalizedFile>)> {
    let file = state.transfer().put_file(&filename, &body).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

/// Guess content type from file extension
fn content_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| UploadError::BadRequest(format!("invalid header value: {}", value)))
}
