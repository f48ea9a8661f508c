#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use vid3d_api::config::ServerConfig;
use vid3d_api::router::build_app_router;
use vid3d_api::state::AppState;
use vid3d_api::ws::WsManager;
use vid3d_pipeline::{JobService, PipelineConfig, VariantRegistry};

/// Build a test `ServerConfig` with safe defaults, storing uploads in
/// `upload_dir`.
pub fn test_config(upload_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        upload_dir: upload_dir.to_path_buf(),
        max_upload_bytes: 10 * 1024 * 1024,
    }
}

/// Pipeline settings tuned for fast tests: 1ms simulated steps, no memory
/// adaptation, no ffmpeg.
pub fn test_pipeline_config(work_dir: &Path, max_concurrent: usize) -> PipelineConfig {
    PipelineConfig {
        work_dir: work_dir.to_path_buf(),
        max_concurrent_jobs: max_concurrent,
        hardware_max_concurrent: max_concurrent,
        adapt_interval: Duration::ZERO,
        ffmpeg_path: None,
        simulated_step: Duration::from_millis(1),
        ..PipelineConfig::default()
    }
}

/// A running application over a temporary directory.
pub struct TestApp {
    pub router: Router,
    pub jobs: Arc<JobService>,
    pub upload_dir: PathBuf,
    _dir: tempfile::TempDir,
}

/// Build the full application router with all middleware layers, backed by
/// a real job service with the built-in variants.
pub fn build_test_app(max_concurrent: usize) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let upload_dir = dir.path().join("uploads");
    let work_dir = dir.path().join("work");
    std::fs::create_dir_all(&upload_dir).unwrap();
    std::fs::create_dir_all(&work_dir).unwrap();

    let config = test_config(&upload_dir);
    let pipeline_config = test_pipeline_config(&work_dir, max_concurrent);
    let registry = VariantRegistry::builtin(&pipeline_config).unwrap();
    let jobs = JobService::start(pipeline_config, registry, CancellationToken::new()).unwrap();

    let state = AppState {
        config: Arc::new(config.clone()),
        jobs: Arc::clone(&jobs),
        ws_manager: Arc::new(WsManager::new()),
    };

    TestApp {
        router: build_app_router(state, &config),
        jobs,
        upload_dir,
        _dir: dir,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: &TestApp, request: Request<Body>) -> Response<Body> {
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post_empty(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn delete(app: &TestApp, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

const BOUNDARY: &str = "vid3d-test-boundary";

/// Minimal `multipart/form-data` body builder.
#[derive(Default)]
pub struct Form {
    body: Vec<u8>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// A small fake MP4 under the `video` field.
    pub fn video(self) -> Self {
        self.file("video", "clip.mp4", "video/mp4", b"\x00\x00\x00\x18ftypmp42fake-video")
    }

    pub fn into_request(mut self, uri: &str) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(self.body))
            .unwrap()
    }
}

pub async fn upload(app: &TestApp, form: Form) -> Response<Body> {
    send(app, form.into_request("/api/upload")).await
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Poll the status endpoint until the job reaches one of `statuses`,
/// returning every observed body in order.
pub async fn poll_until(app: &TestApp, job_id: &str, statuses: &[&str]) -> Vec<serde_json::Value> {
    let uri = format!("/api/status/{job_id}");
    let mut seen = Vec::new();
    let polling = async {
        loop {
            let json = body_json(get(app, &uri).await).await;
            let done = json["status"]
                .as_str()
                .is_some_and(|s| statuses.contains(&s));
            seen.push(json);
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(20), polling)
        .await
        .expect("job did not reach the expected status in time");
    seen
}

pub fn upload_count(app: &TestApp) -> usize {
    std::fs::read_dir(&app.upload_dir).unwrap().count()
}
