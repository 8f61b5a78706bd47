//! End-to-end tests over HTTP

use std::future::IntoFuture;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderName, HeaderValue, Request, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use upserver::config::Config;
use upserver::{routes, AppState};

async fn app_with(config_fn: impl FnOnce(&mut Config)) -> (TempDir, AppState, axum::Router) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.upload_dir = temp_dir.path().to_path_buf();
    config_fn(&mut config);

    let state = AppState::new(config).await.unwrap();
    let app = routes::router(state.clone());
    (temp_dir, state, app)
}

async fn server() -> (TempDir, TestServer) {
    let (dir, _state, app) = app_with(|_| {}).await;
    (dir, TestServer::new(app).unwrap())
}

async fn start(server: &TestServer, filename: &str, total_size: u64) -> Value {
    let response = server
        .post("/upload/start")
        .json(&json!({ "filename": filename, "total_size": total_size }))
        .await;
    response.assert_status_ok();
    response.json::<Value>()
}

async fn put_chunk(server: &TestServer, session_id: &str, offset: u64, data: &'static [u8]) -> axum_test::TestResponse {
    server
        .put("/upload/chunk")
        .add_query_param("session_id", session_id)
        .add_query_param("offset", offset)
        .add_query_param("length", data.len())
        .bytes(Bytes::from_static(data))
        .await
}

#[tokio::test]
async fn test_chunked_upload_then_range_download() {
    let (_dir, server) = server().await;

    let started = start(&server, "a.bin", 10).await;
    assert_eq!(started["resumed"], false);
    assert_eq!(started["chunk_size"], 5 * 1024 * 1024);
    let session_id = started["session_id"].as_str().unwrap().to_string();

    let first = put_chunk(&server, &session_id, 0, b"01234").await;
    first.assert_status_ok();
    let first = first.json::<Value>();
    assert_eq!(first["received_bytes"], 5);
    assert_eq!(first["complete"], false);

    let second = put_chunk(&server, &session_id, 5, b"56789").await.json::<Value>();
    assert_eq!(second["received_bytes"], 10);
    assert_eq!(second["complete"], true);

    let finalized = server
        .post("/upload/finalize")
        .json(&json!({ "session_id": session_id }))
        .await;
    finalized.assert_status_ok();
    assert_eq!(finalized.json::<Value>(), json!({ "filename": "a.bin", "size": 10 }));

    let ranged = server
        .get("/download/a.bin")
        .add_header(header::RANGE, HeaderValue::from_static("bytes=2-6"))
        .await;
    assert_eq!(ranged.status_code(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(ranged.as_bytes().as_ref(), b"23456");
    assert_eq!(ranged.header(header::CONTENT_RANGE), "bytes 2-6/10");
    assert_eq!(ranged.header("x-total-size"), "10");

    let full = server.get("/download/a.bin").await;
    full.assert_status_ok();
    assert_eq!(full.as_bytes().as_ref(), b"0123456789");
    assert_eq!(full.header(header::ACCEPT_RANGES), "bytes");

    let unsatisfiable = server
        .get("/download/a.bin")
        .add_header(header::RANGE, HeaderValue::from_static("bytes=50-"))
        .await;
    assert_eq!(unsatisfiable.status_code(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(unsatisfiable.header(header::CONTENT_RANGE), "bytes */10");

    // A client resuming a download it already finished
    let finished = server
        .get("/download/a.bin")
        .add_header(header::RANGE, HeaderValue::from_static("bytes=10-"))
        .await;
    assert_eq!(finished.status_code(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(finished.json::<Value>()["code"], "RANGE_NOT_SATISFIABLE");
}

#[tokio::test]
async fn test_resume_and_status() {
    let (_dir, server) = server().await;

    let session_id = start(&server, "movie.mp4", 12).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();
    put_chunk(&server, &session_id, 4, b"4567").await.assert_status_ok();

    let resumed = start(&server, "movie.mp4", 12).await;
    assert_eq!(resumed["resumed"], true);
    assert_eq!(resumed["session_id"], session_id.as_str());
    assert_eq!(resumed["received_ranges"], json!([{ "start": 4, "end": 8 }]));

    let status = server
        .get("/upload/status")
        .add_query_param("session_id", &session_id)
        .await;
    status.assert_status_ok();
    let status = status.json::<Value>();
    assert_eq!(status["state"], "ACTIVE");
    assert_eq!(status["received_bytes"], 4);

    // A different declared size for a claimed name is refused
    let conflict = server
        .post("/upload/start")
        .json(&json!({ "filename": "movie.mp4", "total_size": 99 }))
        .await;
    assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
    assert_eq!(conflict.json::<Value>()["code"], "CONFLICTING_UPLOAD");
}

#[tokio::test]
async fn test_chunk_errors() {
    let (_dir, server) = server().await;
    let session_id = start(&server, "e.bin", 8).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    put_chunk(&server, &session_id, 0, b"abcd").await.assert_status_ok();

    let mismatch = put_chunk(&server, &session_id, 0, b"ABCD").await;
    assert_eq!(mismatch.status_code(), StatusCode::CONFLICT);
    assert_eq!(mismatch.json::<Value>()["code"], "CHUNK_CONFLICT");

    let out_of_bounds = put_chunk(&server, &session_id, 6, b"xyz").await;
    assert_eq!(out_of_bounds.status_code(), StatusCode::BAD_REQUEST);

    let wrong_length = server
        .put("/upload/chunk")
        .add_query_param("session_id", &session_id)
        .add_query_param("offset", 4)
        .add_query_param("length", 3)
        .bytes(Bytes::from_static(b"efgh"))
        .await;
    assert_eq!(wrong_length.status_code(), StatusCode::BAD_REQUEST);

    let unknown = put_chunk(&server, "00000000-0000-0000-0000-000000000000", 0, b"a").await;
    assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(unknown.json::<Value>()["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_chunk_metadata_from_headers() {
    let (dir, server) = server().await;
    let session_id = start(&server, "h.bin", 3).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = server
        .put("/upload/chunk")
        .add_header(
            HeaderName::from_static("upload-session-id"),
            HeaderValue::from_str(&session_id).unwrap(),
        )
        .add_header(HeaderName::from_static("upload-offset"), HeaderValue::from_static("0"))
        .add_header(HeaderName::from_static("upload-length"), HeaderValue::from_static("3"))
        .bytes(Bytes::from_static(b"xyz"))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["complete"], true);
    assert_eq!(std::fs::read(dir.path().join("h.bin")).unwrap(), b"xyz");
}

#[tokio::test]
async fn test_resend_after_commit_reports_closed_session() {
    let (dir, server) = server().await;
    let session_id = start(&server, "done.bin", 4).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let last = put_chunk(&server, &session_id, 0, b"data").await.json::<Value>();
    assert_eq!(last["complete"], true);

    // Response to the last chunk was lost and the client sends it again
    let resend = put_chunk(&server, &session_id, 0, b"data").await;
    assert_eq!(resend.status_code(), StatusCode::CONFLICT);
    assert_eq!(resend.json::<Value>()["code"], "SESSION_CLOSED");

    let finalized = server
        .post("/upload/finalize")
        .json(&json!({ "session_id": session_id }))
        .await;
    finalized.assert_status_ok();
    assert_eq!(finalized.json::<Value>(), json!({ "filename": "done.bin", "size": 4 }));
    assert_eq!(std::fs::read(dir.path().join("done.bin")).unwrap(), b"data");
}

#[tokio::test]
async fn test_abort() {
    let (_dir, server) = server().await;
    let session_id = start(&server, "gone.bin", 10).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = server.delete(&format!("/upload/{}", session_id)).await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

    let status = server
        .get("/upload/status")
        .add_query_param("session_id", &session_id)
        .await
        .json::<Value>();
    assert_eq!(status["state"], "ABORTED");

    let chunk = put_chunk(&server, &session_id, 0, b"x").await;
    assert_eq!(chunk.status_code(), StatusCode::CONFLICT);
    assert_eq!(chunk.json::<Value>()["code"], "SESSION_CLOSED");

    // Name is free for a new upload
    assert_eq!(start(&server, "gone.bin", 10).await["resumed"], false);
}

#[tokio::test]
async fn test_whole_file_put_and_listing() {
    let (_dir, server) = server().await;

    let created = server
        .put("/files/notes.txt")
        .bytes(Bytes::from_static(b"hello"))
        .await;
    assert_eq!(created.status_code(), StatusCode::CREATED);
    assert_eq!(created.json::<Value>()["size"], 5);

    server
        .put("/files/a.txt")
        .bytes(Bytes::from_static(b"a"))
        .await
        .assert_status(StatusCode::CREATED);

    let listing = server.get("/files").await.json::<Value>();
    assert_eq!(listing["total"], 2);
    assert_eq!(listing["files"][0]["name"], "a.txt");
    assert_eq!(listing["files"][1]["name"], "notes.txt");
    assert_eq!(listing["files"][1]["size"], 5);

    let paged = server
        .get("/files")
        .add_query_param("offset", 1)
        .add_query_param("limit", 1)
        .await
        .json::<Value>();
    assert_eq!(paged["total"], 2);
    assert_eq!(paged["files"].as_array().unwrap().len(), 1);

    let missing = server.get("/download/nope.txt").await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_file_size_limit() {
    let (_dir, _state, app) = app_with(|config| config.upload.max_file_size = 4).await;
    let server = TestServer::new(app).unwrap();

    let response = server
        .post("/upload/start")
        .json(&json!({ "filename": "big.bin", "total_size": 5 }))
        .await;
    assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.json::<Value>()["code"], "FILE_TOO_LARGE");
}

#[tokio::test]
async fn test_concurrent_starts_share_one_session() {
    let (_dir, state, app) = app_with(|_| {}).await;
    let server = TestServer::new(app).unwrap();

    let requests = (0..8).map(|_| {
        server
            .post("/upload/start")
            .json(&json!({ "filename": "race.bin", "total_size": 100 }))
            .into_future()
    });
    let responses = futures::future::join_all(requests).await;

    let mut ids: Vec<String> = responses
        .iter()
        .map(|r| r.json::<Value>()["session_id"].as_str().unwrap().to_string())
        .collect();
    let fresh = responses
        .iter()
        .filter(|r| r.json::<Value>()["resumed"] == false)
        .count();
    ids.dedup();

    assert_eq!(ids.len(), 1);
    assert_eq!(fresh, 1);
    assert_eq!(state.registry().active_session_count(), 1);
}

#[tokio::test]
async fn test_health_via_oneshot() {
    let (_dir, _state, app) = app_with(|_| {}).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["active_sessions"], 0);
}
