//! HTTP surface tests against in-memory collaborators.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use reel_api::{create_router, ApiConfig, AppState};
use reel_media::{check_duration, MediaError, MediaResult, Transcoder, VideoInfo};
use reel_models::{TranscodeResult, UploadMetadata, VideoId, VideoRecord};
use reel_queue::{JobQueue, QueueConfig};
use reel_store::{InMemoryCounterCache, InMemoryVideoRepository, VideoRepository};
use reel_worker::WorkerConfig;

const BOUNDARY: &str = "reel-test-boundary";

struct FakeTranscoder {
    duration: f64,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn validate(&self, _input: &Path) -> MediaResult<VideoInfo> {
        let info = VideoInfo {
            duration: self.duration,
            width: 720,
            height: 1280,
            codec: "h264".to_string(),
            has_audio: true,
        };
        check_duration(&info, 90)?;
        Ok(info)
    }

    async fn transcode(&self, _input: &Path, _out: &Path, _name: &str) -> MediaResult<TranscodeResult> {
        Err(MediaError::NotImplemented("no encoding in HTTP tests".to_string()))
    }
}

struct TestApp {
    _dir: tempfile::TempDir,
    state: AppState,
    videos: Arc<InMemoryVideoRepository>,
    router: Router,
}

impl TestApp {
    fn new(duration: f64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let worker_config = WorkerConfig {
            upload_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let videos = Arc::new(InMemoryVideoRepository::new());
        let state = AppState::from_parts(
            ApiConfig::default(),
            worker_config,
            videos.clone(),
            Arc::new(InMemoryCounterCache::new()),
            Arc::new(JobQueue::new(QueueConfig::default())),
            Arc::new(FakeTranscoder { duration }),
        );
        let router = create_router(state.clone(), None);
        Self {
            _dir: dir,
            state,
            videos,
            router,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn call(&self, method: &str, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn upload(&self, title: &str, tags: &str, content_type: &str) -> (StatusCode, Value) {
        let mut body = Vec::new();
        for (name, value) in [("title", title), ("tags", tags)] {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"clip.mp4\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"not really an mp4");
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::post("/videos")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    async fn seed(&self, id: &str) {
        let record = VideoRecord::new(
            VideoId::from(id),
            UploadMetadata {
                title: "seeded".to_string(),
                ..Default::default()
            },
        );
        self.videos.create(record).await.unwrap();
    }

    fn incoming_files(&self) -> usize {
        std::fs::read_dir(self.state.worker_config.incoming_dir())
            .map(|dir| dir.count())
            .unwrap_or(0)
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new(30.0);
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_upload_is_accepted_and_queued() {
    let app = TestApp::new(30.0);

    let (status, body) = app.upload("My first reel", r#"["dance","fun"]"#, "video/mp4").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "uploading");
    let video_id = body["videoId"].as_str().unwrap().to_string();

    let record = app.videos.get(&VideoId::from(video_id.as_str())).await.unwrap().unwrap();
    assert_eq!(record.tags, vec!["dance".to_string(), "fun".to_string()]);

    let (status, stats) = app.get("/queue/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["waiting"], 1);
    assert_eq!(app.incoming_files(), 1);
}

#[tokio::test]
async fn test_overlong_upload_is_rejected_without_side_effects() {
    let app = TestApp::new(95.0);

    let (status, body) = app.upload("Too long", "[]", "video/mp4").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_media");

    assert!(app.videos.is_empty());
    assert_eq!(app.state.queue.stats().waiting, 0);
    assert_eq!(app.incoming_files(), 0);
}

#[tokio::test]
async fn test_upload_with_bad_metadata_is_rejected() {
    let app = TestApp::new(30.0);

    let (status, _) = app.upload("", "[]", "video/mp4").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.upload("ok", "not json", "video/mp4").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.upload("ok", "[]", "text/plain").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.videos.is_empty());
    assert_eq!(app.incoming_files(), 0);
}

#[tokio::test]
async fn test_get_video_counts_views() {
    let app = TestApp::new(30.0);
    app.seed("v1").await;

    let (status, body) = app.get("/videos/v1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "v1");
    assert_eq!(body["status"], "uploading");
    assert_eq!(body["viewCount"], 1);

    let (_, body) = app.get("/videos/v1").await;
    assert_eq!(body["viewCount"], 2);

    let (status, _) = app.get("/videos/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_like_and_comment_reach_live_subscribers() {
    let app = TestApp::new(30.0);
    app.seed("v1").await;
    let mut live = app.state.broadcaster.subscribe(&VideoId::from("v1"));

    let (status, body) = app.call("POST", "/videos/v1/like").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["likeCount"], 1);
    let (_, body) = app.call("DELETE", "/videos/v1/like").await;
    assert_eq!(body["likeCount"], 0);
    assert_eq!(body["liked"], false);
    let (status, body) = app.call("POST", "/videos/v1/comments").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["commentCount"], 1);

    let mut events = Vec::new();
    while let Ok(payload) = live.receiver.try_recv() {
        events.push(serde_json::from_str::<Value>(&payload).unwrap());
    }
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["like", "like", "comment"]);
    assert_eq!(events[1]["data"]["liked"], false);
    assert_eq!(events[2]["data"]["commentCount"], 1);
}

#[tokio::test]
async fn test_like_unknown_video_is_not_found() {
    let app = TestApp::new(30.0);
    let (status, body) = app.call("POST", "/videos/nope/like").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_dead_letter_endpoints() {
    let app = TestApp::new(30.0);

    let (status, body) = app.get("/queue/dead-letters").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Array(Vec::new()));

    let (status, _) = app.call("POST", "/queue/dead-letters/unknown/retry").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_retry_dead_letter_requires_the_upload() {
    let app = TestApp::new(30.0);
    let queue = &app.state.queue;
    let input = app.state.worker_config.incoming_dir().join("v1.mp4");
    let job_id = queue.enqueue(VideoId::from("v1"), input.clone()).await.unwrap();
    let lease = queue.lease("test").await.unwrap();
    queue.fail(&lease, "bad codec", false).await.unwrap();

    let uri = format!("/queue/dead-letters/{job_id}/retry");
    let (status, _) = app.call("POST", &uri).await;
    assert_eq!(status, StatusCode::CONFLICT);

    tokio::fs::create_dir_all(input.parent().unwrap()).await.unwrap();
    tokio::fs::write(&input, b"raw").await.unwrap();
    let (status, body) = app.call("POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "pending");
    assert_eq!(body["attempts"], 0);
    assert_eq!(queue.stats().waiting, 1);
}
