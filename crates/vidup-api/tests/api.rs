//! API integration tests, driven through the router with scripted tools.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_test::assert_err;
use tower::ServiceExt;

use vidup_api::{create_router, ApiConfig, AppState};
use vidup_media::{MediaResult, ToolCommand, ToolProfile, Toolchain, TrimSpec, VideoInfo};
use vidup_models::{JobId, JobSnapshot, StoryboardParams};
use vidup_storage::{LocalStore, ObjectStore};
use vidup_worker::WorkerConfig;

const DOWNLOAD_OK: &str = r#"printf '[download] 100.0%% of 1.00MiB\n'
printf 'video-bytes' > "$1/source.mp4""#;

const DOWNLOAD_SLOW: &str = r#"printf '[download]   1.0%% of 1.00MiB at 1.00MiB/s ETA 00:30\n'
sleep 30
printf 'video-bytes' > "$1/source.mp4""#;

const COPY: &str = r#"cp "$1" "$2""#;

const TOUCH: &str = r#"printf 'jpg' > "$1""#;

struct ScriptedToolchain {
    download: &'static str,
}

fn sh(script: &str, profile: ToolProfile, args: &[&str]) -> ToolCommand {
    ToolCommand::new("sh", profile)
        .args(["-c", script, "sh"])
        .args(args.iter().copied())
}

fn path(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

#[async_trait]
impl Toolchain for ScriptedToolchain {
    fn download(&self, _url: &str, _format: Option<&str>, work_dir: &Path) -> ToolCommand {
        sh(self.download, ToolProfile::YtDlp, &[&path(work_dir)])
    }

    fn transcode_horizontal(&self, input: &Path, output: &Path, _source: &VideoInfo) -> ToolCommand {
        sh(COPY, ToolProfile::Ffmpeg { total_secs: None }, &[&path(input), &path(output)]).artifact(output)
    }

    fn trim(&self, source: &str, output: &Path, _spec: &TrimSpec) -> ToolCommand {
        sh(COPY, ToolProfile::Ffmpeg { total_secs: None }, &[source, &path(output)]).artifact(output)
    }

    fn storyboard(
        &self,
        _source: &str,
        frames_dir: &Path,
        _params: &StoryboardParams,
        total_secs: Option<f64>,
    ) -> ToolCommand {
        let frame = frames_dir.join("frame_00001.jpg");
        sh(TOUCH, ToolProfile::SceneDetect { total_secs }, &[&path(&frame)])
    }

    fn thumbnail(&self, _video: &Path, output: &Path) -> ToolCommand {
        sh(TOUCH, ToolProfile::Silent, &[&path(output)]).artifact(output)
    }

    async fn probe(&self, _target: &str) -> MediaResult<VideoInfo> {
        Ok(VideoInfo {
            duration: 10.0,
            width: 1280,
            height: 720,
            fps: 25.0,
            codec: "h264".to_string(),
        })
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    dir: TempDir,
}

async fn app_with(download: &'static str, config: ApiConfig) -> TestApp {
    build_app(download, config, false).await
}

async fn build_app(download: &'static str, config: ApiConfig, auto_storyboard: bool) -> TestApp {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path().join("store")).await.unwrap());
    let worker = WorkerConfig {
        work_dir: dir.path().join("jobs"),
        kill_grace: Duration::from_millis(500),
        subscriber_buffer: 1024,
        auto_storyboard,
        ..WorkerConfig::default()
    };
    let state = AppState::new(config, worker, Arc::new(ScriptedToolchain { download }), store);
    TestApp {
        router: create_router(state.clone(), None),
        state,
        dir,
    }
}

async fn app() -> TestApp {
    app_with(DOWNLOAD_OK, ApiConfig::default()).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart(content_type: &str, filename: &str, data: &[u8]) -> Request<Body> {
    let boundary = "vidup-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap()
}

/// Wait for the job to reach a terminal stage through the live channel.
async fn wait_terminal(state: &AppState, job_id: &str) -> JobSnapshot {
    let mut sub = state.orchestrator.subscribe(&JobId::from_string(job_id)).unwrap();
    loop {
        let snap = tokio::time::timeout(Duration::from_secs(20), sub.recv())
            .await
            .expect("snapshot within timeout")
            .expect("subscription open");
        if snap.is_terminal() {
            return snap;
        }
    }
}

fn job_id(body: &Value) -> String {
    body["job_id"].as_str().expect("job_id in response").to_string()
}

#[tokio::test]
async fn test_health_endpoints() {
    let t = app().await;

    let (status, body) = send(&t.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = send(&t.router, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&t.router, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["storage"]["status"], "ok");
    assert_eq!(body["active_jobs"], 0);
}

#[tokio::test]
async fn test_response_headers() {
    let t = app().await;
    let response = t
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("X-Request-ID", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-123");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let t = app().await;

    let (status, body) = send(&t.router, get("/api/job/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Job not found");

    let (status, _) = send(&t.router, post_json("/api/job/does-not-exist/cancel", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err!(t.state.orchestrator.get(&JobId::from_string("does-not-exist")));
}

#[tokio::test]
async fn test_download_rejects_bad_urls() {
    let t = app().await;

    for url in ["ftp://example.com/v.mp4", "not a url", "http://127.0.0.1:9000/v"] {
        let (status, body) = send(&t.router, post_json("/api/download", json!({ "url": url }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{url}");
        assert!(body["detail"].as_str().is_some_and(|d| !d.is_empty()));
    }

    assert!(t.state.orchestrator.list(true).is_empty());
}

#[tokio::test]
async fn test_download_respects_allowed_hosts() {
    let config = ApiConfig {
        allowed_hosts: vec!["youtube.com".to_string()],
        ..ApiConfig::default()
    };
    let t = app_with(DOWNLOAD_OK, config).await;

    let (status, _) = send(
        &t.router,
        post_json("/api/download", json!({ "url": "https://vimeo.com/123" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.router,
        post_json("/api/download", json!({ "url": "https://www.youtube.com/watch?v=abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    wait_terminal(&t.state, &job_id(&body)).await;
}

#[tokio::test]
async fn test_download_completes_and_snapshot_is_stable() {
    let t = app().await;

    let (status, body) = send(
        &t.router,
        post_json("/api/download", json!({ "url": "https://videos.example.com/watch?v=abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    let id = job_id(&body);

    let terminal = wait_terminal(&t.state, &id).await;
    assert_eq!(terminal.stage.as_str(), "complete");

    let (status, first) = send(&t.router, get(&format!("/api/job/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["jobId"], id.as_str());
    assert_eq!(first["stage"], "complete");
    assert!(first["s3_url"].as_str().is_some_and(|u| !u.is_empty()));

    let (_, second) = send(&t.router, get(&format!("/api/job/{id}"))).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_list_jobs_filters_terminal() {
    let t = app().await;

    let (_, body) = send(
        &t.router,
        post_json("/api/download", json!({ "url": "https://videos.example.com/watch?v=abc" })),
    )
    .await;
    wait_terminal(&t.state, &job_id(&body)).await;

    let (status, active) = send(&t.router, get("/api/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["count"], 0);

    let (_, all) = send(&t.router, get("/api/jobs?include_completed=true")).await;
    assert_eq!(all["count"], 1);
    assert_eq!(all["jobs"][0]["stage"], "complete");
}

#[tokio::test]
async fn test_cancel_running_download() {
    let t = app_with(DOWNLOAD_SLOW, ApiConfig::default()).await;

    let (_, body) = send(
        &t.router,
        post_json("/api/download", json!({ "url": "https://videos.example.com/watch?v=slow" })),
    )
    .await;
    let id = job_id(&body);

    let (status, cancel) = send(&t.router, post_json(&format!("/api/job/{id}/cancel"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancel["status"], "cancelled");
    assert_eq!(cancel["job"]["cancelRequested"], true);

    let terminal = wait_terminal(&t.state, &id).await;
    assert_eq!(terminal.stage.as_str(), "cancelled");
    assert!(terminal.s3_url.is_none());

    // A second request changes nothing
    let (status, again) = send(&t.router, post_json(&format!("/api/job/{id}/cancel"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "cancelled");
    assert_eq!(again["message"], "Job already finished");
}

#[tokio::test]
async fn test_split_validation() {
    let t = app().await;

    let (status, body) = send(
        &t.router,
        post_json("/api/split", json!({ "s3_url": "videos/a.mp4", "start_time": -1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "start_time must be >= 0");

    let (status, _) = send(
        &t.router,
        post_json(
            "/api/split",
            json!({ "s3_url": "videos/a.mp4", "start_time": 5.0, "end_time": 2.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_storyboard_threshold_validation() {
    let t = app().await;

    let (status, _) = send(
        &t.router,
        post_json("/api/storyboard", json!({ "video_url": "videos/a.mp4", "threshold": 1.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_runs_to_completion() {
    let t = app().await;

    let (status, body) = send(&t.router, multipart("video/mp4", "my clip.mp4", b"uploaded-bytes")).await;
    assert_eq!(status, StatusCode::OK);
    let id = job_id(&body);

    let terminal = wait_terminal(&t.state, &id).await;
    assert_eq!(terminal.stage.as_str(), "complete");
    let metadata = terminal.metadata.expect("metadata");
    assert_eq!(metadata["original_filename"], "my clip.mp4");

    // The received file belongs to the job and is gone before the terminal snapshot
    let uploads = t.dir.path().join("jobs").join("uploads");
    let mut entries = tokio::fs::read_dir(&uploads).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none(), "upload file left behind");
}

#[tokio::test]
async fn test_upload_rejects_non_video_and_empty() {
    let t = app().await;

    let (status, body) = send(&t.router, multipart("text/plain", "notes.txt", b"hello")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "File must be a video");

    let (status, _) = send(&t.router, multipart("video/mp4", "empty.mp4", b"")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(t.state.orchestrator.list(true).is_empty());
}

#[tokio::test]
async fn test_submissions_rejected_during_shutdown() {
    let t = app().await;
    t.state.orchestrator.shutdown().await;

    let (status, _) = send(
        &t.router,
        post_json("/api/download", json!({ "url": "https://videos.example.com/watch?v=abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_sources_outside_storage_are_validated() {
    let config = ApiConfig {
        allowed_hosts: vec!["cdn.example.com".to_string()],
        ..ApiConfig::default()
    };
    let t = app_with(DOWNLOAD_OK, config).await;

    for source in [
        "http://169.254.169.254/latest/meta-data/",
        "http://user@127.0.0.1:8080/v.mp4",
        "https://elsewhere.example.org/v.mp4",
        "file:///etc/passwd",
    ] {
        let (status, _) = send(
            &t.router,
            post_json("/api/split", json!({ "s3_url": source, "start_time": 0.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "split {source}");

        let (status, _) = send(&t.router, post_json("/api/storyboard", json!({ "video_url": source }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "storyboard {source}");

        let (status, _) = send(&t.router, post_json("/api/convert", json!({ "s3_url": source }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "convert {source}");
    }
    assert!(t.state.orchestrator.list(true).is_empty());

    let (status, body) = send(
        &t.router,
        post_json("/api/storyboard", json!({ "video_url": "https://cdn.example.com/v.mp4" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    wait_terminal(&t.state, &job_id(&body)).await;
}

#[tokio::test]
async fn test_storyboard_frames_are_served_from_stored_keys() {
    let t = app().await;

    let (status, body) = send(&t.router, post_json("/api/storyboard", json!({ "video_url": "videos/a.mp4" }))).await;
    assert_eq!(status, StatusCode::OK);
    let id = job_id(&body);
    assert_eq!(wait_terminal(&t.state, &id).await.stage.as_str(), "complete");

    let (status, body) = send(&t.router, get(&format!("/api/storyboard/{id}/status"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "complete");
    assert_eq!(body["frame_count"], 1);
    assert_eq!(body["has_frames"], true);

    let (status, body) = send(&t.router, get(&format!("/api/storyboard/{id}/frames"))).await;
    assert_eq!(status, StatusCode::OK);
    let frames = body["frames"].as_array().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["time_str"], "00:00:00.000");
    let image_url = frames[0]["image_url"].as_str().unwrap();
    assert!(image_url.ends_with(&format!("storyboards/{id}/frame_00001.jpg")), "{image_url}");

    let response = t
        .router
        .clone()
        .oneshot(get(&format!("/api/storyboard/{id}/frame/0")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()["location"], image_url);

    let (status, body) = send(&t.router, get(&format!("/api/storyboard/{id}/frame/7"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Frame index out of range");
}

#[tokio::test]
async fn test_storyboard_reached_through_parent_job() {
    let t = build_app(DOWNLOAD_OK, ApiConfig::default(), true).await;

    let (_, body) = send(
        &t.router,
        post_json("/api/download", json!({ "url": "https://videos.example.com/watch?v=abc" })),
    )
    .await;
    let parent = job_id(&body);
    let terminal = wait_terminal(&t.state, &parent).await;
    let storyboard_id = terminal.metadata.unwrap()["storyboard_job_id"]
        .as_str()
        .unwrap()
        .to_string();
    wait_terminal(&t.state, &storyboard_id).await;

    let (status, body) = send(&t.router, get(&format!("/api/storyboard/{parent}/status"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], storyboard_id.as_str());
    assert_eq!(body["parent_job_id"], parent.as_str());
    assert_eq!(body["frame_count"], 1);

    let (_, body) = send(&t.router, get(&format!("/api/storyboard/{parent}/frames"))).await;
    assert_eq!(body["frames"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_storyboard_endpoints_unknown_jobs() {
    let t = app().await;

    let (status, _) = send(&t.router, get("/api/storyboard/missing/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A finished job without a storyboard
    let (_, body) = send(
        &t.router,
        post_json("/api/download", json!({ "url": "https://videos.example.com/watch?v=abc" })),
    )
    .await;
    let id = job_id(&body);
    wait_terminal(&t.state, &id).await;

    let (status, body) = send(&t.router, get(&format!("/api/storyboard/{id}/frames"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Storyboard not found");
}
