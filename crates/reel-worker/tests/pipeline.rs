//! End-to-end runs of the worker pool against the in-memory store and queue.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use reel_media::{output_paths, MediaError, MediaResult, Transcoder, VideoInfo};
use reel_models::{TranscodeResult, UploadMetadata, VideoId, VideoRecord, VideoStatus};
use reel_queue::{JobQueue, QueueConfig};
use reel_store::{InMemoryVideoRepository, VideoRepository};
use reel_worker::{JobProcessor, WorkerConfig, WorkerPool};

/// Fails the first `failures` calls, then writes a fake rendition.
struct ScriptedTranscoder {
    failures: u32,
    delay: Duration,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    outputs: Mutex<Vec<PathBuf>>,
}

impl ScriptedTranscoder {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            outputs: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn validate(&self, _input: &Path) -> MediaResult<VideoInfo> {
        Ok(VideoInfo {
            duration: 12.0,
            width: 720,
            height: 1280,
            codec: "h264".to_string(),
            has_audio: true,
        })
    }

    async fn transcode(&self, _input: &Path, output_dir: &Path, name: &str) -> MediaResult<TranscodeResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let paths = output_paths(output_dir, name)?;
        self.outputs.lock().unwrap().push(paths.output.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if call <= self.failures {
            Err(MediaError::ffmpeg_failed("simulated encoder crash", None, Some(1)))
        } else {
            tokio::fs::write(&paths.output, b"mp4").await?;
            tokio::fs::write(&paths.thumbnail, b"jpg").await?;
            Ok(TranscodeResult {
                output_path: paths.output,
                thumbnail_path: paths.thumbnail,
                duration_sec: 12,
            })
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    config: WorkerConfig,
    videos: Arc<InMemoryVideoRepository>,
    queue: Arc<JobQueue>,
    pool: Arc<WorkerPool>,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    async fn start(transcoder: Arc<dyn Transcoder>, concurrency: usize) -> Self {
        let queue = Arc::new(JobQueue::new(QueueConfig {
            backoff_base: Duration::from_millis(10),
            ..Default::default()
        }));
        Self::launch(
            tempfile::tempdir().unwrap(),
            Arc::new(InMemoryVideoRepository::new()),
            queue,
            transcoder,
            concurrency,
        )
        .await
    }

    async fn launch(
        dir: tempfile::TempDir,
        videos: Arc<InMemoryVideoRepository>,
        queue: Arc<JobQueue>,
        transcoder: Arc<dyn Transcoder>,
        concurrency: usize,
    ) -> Self {
        let config = WorkerConfig {
            concurrency,
            upload_dir: dir.path().to_path_buf(),
            claim_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        tokio::fs::create_dir_all(config.incoming_dir()).await.unwrap();

        let processor = Arc::new(JobProcessor::new(config.clone(), videos.clone(), transcoder));
        let pool = Arc::new(WorkerPool::new(Arc::clone(&queue), processor));
        let task = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.run().await.unwrap();
            })
        };

        Self {
            _dir: dir,
            config,
            videos,
            queue,
            pool,
            task,
        }
    }

    async fn submit(&self, id: &str) -> PathBuf {
        let input = self.config.incoming_dir().join(format!("{id}.mov"));
        tokio::fs::write(&input, b"raw upload").await.unwrap();
        let record = VideoRecord::new(
            VideoId::from(id),
            UploadMetadata {
                title: format!("video {id}"),
                ..Default::default()
            },
        );
        self.videos.create(record).await.unwrap();
        self.queue.enqueue(VideoId::from(id), input.clone()).await.unwrap();
        input
    }

    async fn status(&self, id: &str) -> VideoStatus {
        self.videos
            .get(&VideoId::from(id))
            .await
            .unwrap()
            .map(|record| record.status)
            .unwrap_or_default()
    }

    async fn wait_for<F>(&self, mut done: F)
    where
        F: FnMut(&Self) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !done(self) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn stop(self) {
        self.pool.shutdown();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("pool did not stop")
            .unwrap();
    }
}

#[tokio::test]
async fn test_fail_fail_succeed_ends_ready() {
    let transcoder = Arc::new(ScriptedTranscoder::new(2));
    let harness = Harness::start(transcoder.clone(), 2).await;
    let input = harness.submit("v1").await;

    harness.wait_for(|h| h.queue.stats().completed == 1).await;

    assert_eq!(transcoder.calls(), 3);
    assert_eq!(harness.status("v1").await, VideoStatus::Ready);
    let record = harness.videos.get(&VideoId::from("v1")).await.unwrap().unwrap();
    assert_eq!(record.file_url.as_deref(), Some("/media/v1.mp4"));
    assert_eq!(record.duration_sec, 12);
    assert!(!input.exists());

    // Every attempt targeted the same paths, so nothing accumulated.
    let outputs = transcoder.outputs.lock().unwrap().clone();
    assert_eq!(outputs.len(), 3);
    assert!(outputs.iter().all(|p| p == &outputs[0]));
    let mut files: Vec<String> = std::fs::read_dir(harness.config.processed_dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["v1.mp4".to_string(), "v1_thumb.jpg".to_string()]);

    let stats = harness.queue.stats();
    assert_eq!((stats.waiting, stats.active, stats.failed), (0, 0, 0));
    harness.stop().await;
}

#[tokio::test]
async fn test_exhausted_retries_mark_failed() {
    let transcoder = Arc::new(ScriptedTranscoder::new(u32::MAX));
    let harness = Harness::start(transcoder.clone(), 2).await;
    let failed_before = harness.queue.stats().failed;
    let input = harness.submit("v1").await;

    harness.wait_for(|h| h.queue.stats().failed == failed_before + 1).await;

    assert_eq!(transcoder.calls(), 3);
    assert_eq!(harness.status("v1").await, VideoStatus::Failed);
    assert_eq!(harness.queue.dead_letters().len(), 1);
    // Transient failures keep the upload for an operator retry.
    assert!(input.exists());
    harness.stop().await;
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let transcoder = Arc::new(ScriptedTranscoder::new(0).with_delay(Duration::from_millis(50)));
    let harness = Harness::start(transcoder.clone(), 2).await;
    for i in 0..6 {
        harness.submit(&format!("v{i}")).await;
    }

    harness.wait_for(|h| h.queue.stats().completed == 6).await;

    assert_eq!(transcoder.calls(), 6);
    assert!(transcoder.max_in_flight.load(Ordering::SeqCst) <= 2);
    for i in 0..6 {
        assert_eq!(harness.status(&format!("v{i}")).await, VideoStatus::Ready);
    }
    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_with_idle_workers() {
    let harness = Harness::start(Arc::new(ScriptedTranscoder::new(0)), 2).await;
    harness.stop().await;
}

#[tokio::test]
async fn test_job_dead_lettered_on_restart_marks_failed() {
    let dir = tempfile::tempdir().unwrap();
    let queue_config = QueueConfig {
        state_path: Some(dir.path().join("queue.json")),
        max_attempts: 1,
        ..Default::default()
    };
    let videos = Arc::new(InMemoryVideoRepository::new());
    let record = VideoRecord::new(
        VideoId::from("v1"),
        UploadMetadata {
            title: "video v1".to_string(),
            ..Default::default()
        },
    );
    videos.create(record).await.unwrap();

    // The process dies while the only attempt is in flight.
    {
        let queue = JobQueue::open(queue_config.clone()).await.unwrap();
        queue
            .enqueue(VideoId::from("v1"), dir.path().join("v1.mov"))
            .await
            .unwrap();
        queue.lease("worker-0").await.unwrap();
    }

    let queue = Arc::new(JobQueue::open(queue_config).await.unwrap());
    assert_eq!(queue.stats().failed, 1);
    let transcoder = Arc::new(ScriptedTranscoder::new(0));
    let harness = Harness::launch(dir, videos, queue, transcoder.clone(), 1).await;

    let videos = Arc::clone(&harness.videos);
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let record = videos.get(&VideoId::from("v1")).await.unwrap().unwrap();
            if record.status == VideoStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dead-lettered job left its record Uploading");

    assert_eq!(transcoder.calls(), 0);
    assert_eq!(harness.queue.dead_letters().len(), 1);
    harness.stop().await;
}
