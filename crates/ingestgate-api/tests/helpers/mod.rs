//! Test helpers: build AppState and router for integration tests.
//!
//! Run from workspace root: `cargo test -p ingestgate-api --test uploads_test`.
//! Every app gets its own temporary storage directories.

#![allow(dead_code)]

use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestResponse, TestServer};
use ingestgate_api::constants;
use ingestgate_api::setup::{routes, services};
use ingestgate_core::{checksum, Config};
use serde_json::{json, Value};
use std::collections::HashMap;
use tempfile::TempDir;
use uuid::Uuid;

/// Chunk size used by test apps, small enough to split tiny files.
pub const TEST_CHUNK_SIZE: usize = 16;

pub const CLEAN_CSV: &[u8] = b"name,age,city\nalice,30,paris\nbob,25,berlin\n";

/// API path prefix for tests (e.g. `/api/v0`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", constants::API_PREFIX, path)
}

/// Test application: server and owned storage.
pub struct TestApp {
    pub server: TestServer,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    pub fn processed_dir(&self) -> std::path::PathBuf {
        self._temp_dir.path().join("processed")
    }
}

/// Setup test app with local storage and the lightweight scanner set.
pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(&[]).await
}

/// Setup test app, overriding configuration keys.
pub async fn setup_test_app_with(overrides: &[(&str, &str)]) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = create_test_config(&temp_dir, overrides);

    let state = services::initialize_services(&config)
        .await
        .expect("Failed to initialize services");
    let router = routes::setup_routes(&config, state).expect("Failed to setup routes");
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        _temp_dir: temp_dir,
    }
}

fn create_test_config(temp_dir: &TempDir, overrides: &[(&str, &str)]) -> Config {
    let root = temp_dir.path();
    let mut values: HashMap<String, String> = HashMap::new();
    values.insert(
        "UPLOAD_DIR".into(),
        root.join("temp").display().to_string(),
    );
    values.insert(
        "SESSION_DIR".into(),
        root.join("sessions").display().to_string(),
    );
    values.insert(
        "PROCESSED_DIR".into(),
        root.join("processed").display().to_string(),
    );
    values.insert("ENVIRONMENT".into(), "test".into());
    values.insert("MAX_UPLOAD_SIZE_MB".into(), "1".into());
    values.insert("CHUNK_SIZE_BYTES".into(), TEST_CHUNK_SIZE.to_string());
    values.insert("SESSION_SWEEP_INTERVAL_SECS".into(), "0".into());
    values.insert("SCAN_LEVEL".into(), "lightweight".into());
    for (key, value) in overrides {
        values.insert(key.to_string(), value.to_string());
    }

    Config::from_source(|key| values.get(key).cloned()).expect("Failed to build test config")
}

/// Initialize a session for `content` and return the upload id.
pub async fn initialize(client: &TestServer, file_name: &str, content: &[u8]) -> Uuid {
    let response = client
        .post(&api_path("/uploads/initialize"))
        .json(&json!({
            "fileName": file_name,
            "fileSize": content.len(),
            "mimeType": "text/csv"
        }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    body["uploadId"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .expect("uploadId in initialize response")
}

/// Send one chunk with the given checksum.
pub async fn send_chunk_with_checksum(
    client: &TestServer,
    upload_id: Uuid,
    index: usize,
    data: &[u8],
    checksum: &str,
) -> TestResponse {
    let form = MultipartForm::new()
        .add_text("uploadId", upload_id.to_string())
        .add_text("chunkIndex", index.to_string())
        .add_text("checksum", checksum.to_string())
        .add_part(
            "chunk",
            Part::bytes(data.to_vec())
                .file_name("chunk")
                .mime_type("application/octet-stream"),
        );

    client
        .post(&api_path("/uploads/chunk"))
        .multipart(form)
        .await
}

/// Send chunk `index` of `content`, correctly checksummed.
pub async fn send_chunk(
    client: &TestServer,
    upload_id: Uuid,
    content: &[u8],
    index: usize,
) -> TestResponse {
    let data = chunk_of(content, index);
    send_chunk_with_checksum(client, upload_id, index, data, &checksum::sha256_hex(data)).await
}

/// Send every chunk of `content` except the indices in `skip`.
pub async fn send_all_chunks_except(
    client: &TestServer,
    upload_id: Uuid,
    content: &[u8],
    skip: &[usize],
) {
    for index in 0..chunk_count(content) {
        if skip.contains(&index) {
            continue;
        }
        send_chunk(client, upload_id, content, index)
            .await
            .assert_status_ok();
    }
}

pub fn chunk_count(content: &[u8]) -> usize {
    content.len().div_ceil(TEST_CHUNK_SIZE)
}

pub fn chunk_of(content: &[u8], index: usize) -> &[u8] {
    let start = index * TEST_CHUNK_SIZE;
    let end = (start + TEST_CHUNK_SIZE).min(content.len());
    &content[start..end]
}

pub async fn finalize(client: &TestServer, upload_id: Uuid) -> TestResponse {
    client
        .post(&api_path("/uploads/finalize"))
        .json(&json!({ "uploadId": upload_id }))
        .await
}
