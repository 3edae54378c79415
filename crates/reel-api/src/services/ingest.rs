//! Upload admission.
//!
//! An upload is staged to `incoming/`, its metadata and media are checked,
//! and only then are the video record and the transcode job created. A
//! rejected upload leaves no record, no job and no staged file behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use validator::Validate;

use reel_media::{MediaError, Transcoder};
use reel_models::{JobId, UploadMetadata, VideoId, VideoRecord};
use reel_queue::{JobQueue, QueueError};
use reel_store::{StoreError, VideoRepository};

use crate::metrics;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("Invalid metadata: {0}")]
    Validation(String),

    #[error("Upload interrupted: {0}")]
    Upload(String),

    #[error("Media inspection failed: {0}")]
    Media(MediaError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upload bytes written to the incoming directory, not yet admitted.
#[derive(Debug)]
pub struct StagedUpload {
    pub video_id: VideoId,
    pub path: PathBuf,
    pub bytes: u64,
}

/// An admitted upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedUpload {
    pub video_id: VideoId,
    pub job_id: JobId,
    pub status: &'static str,
}

pub struct IngestGate {
    videos: Arc<dyn VideoRepository>,
    queue: Arc<JobQueue>,
    transcoder: Arc<dyn Transcoder>,
    incoming_dir: PathBuf,
}

impl IngestGate {
    pub fn new(
        videos: Arc<dyn VideoRepository>,
        queue: Arc<JobQueue>,
        transcoder: Arc<dyn Transcoder>,
        incoming_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            videos,
            queue,
            transcoder,
            incoming_dir: incoming_dir.into(),
        }
    }

    /// Only `video/*` is accepted when a content type is supplied.
    pub fn check_content_type(content_type: Option<&str>) -> IngestResult<()> {
        match content_type {
            Some(ct) if !ct.trim().to_ascii_lowercase().starts_with("video/") => {
                metrics::record_upload_rejected("content_type");
                Err(IngestError::Validation(format!(
                    "unsupported content type {ct}, expected video/*"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Mint a video id and stream the body to `incoming/{id}{ext}`.
    pub async fn stage<S, E>(
        &self,
        file_name: Option<&str>,
        content_type: Option<&str>,
        body: S,
    ) -> IngestResult<StagedUpload>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        Self::check_content_type(content_type)?;

        let video_id = VideoId::new();
        let path = self
            .incoming_dir
            .join(format!("{}{}", video_id, extension_of(file_name)));
        tokio::fs::create_dir_all(&self.incoming_dir).await?;

        let mut file = tokio::fs::File::create(&path).await?;
        let mut staged = StagedUpload {
            video_id,
            path,
            bytes: 0,
        };

        futures_util::pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let written = match chunk {
                Ok(chunk) => file.write_all(&chunk).await.map(|()| chunk.len() as u64),
                Err(e) => {
                    drop(file);
                    discard(&staged.path).await;
                    metrics::record_upload_rejected("interrupted");
                    return Err(IngestError::Upload(e.to_string()));
                }
            };
            match written {
                Ok(n) => staged.bytes += n,
                Err(e) => {
                    drop(file);
                    discard(&staged.path).await;
                    return Err(e.into());
                }
            }
        }
        if let Err(e) = file.flush().await {
            drop(file);
            discard(&staged.path).await;
            return Err(e.into());
        }

        Ok(staged)
    }

    /// Validate a staged upload and, if it passes, create its record and job.
    pub async fn accept(
        &self,
        staged: StagedUpload,
        metadata: UploadMetadata,
    ) -> IngestResult<AcceptedUpload> {
        if let Err(e) = metadata.validate() {
            self.reject(&staged, "metadata").await;
            return Err(IngestError::Validation(e.to_string()));
        }

        let info = match self.transcoder.validate(&staged.path).await {
            Ok(info) => info,
            Err(MediaError::InvalidMedia(msg)) => {
                self.reject(&staged, "invalid_media").await;
                return Err(IngestError::InvalidMedia(msg));
            }
            Err(e) => {
                self.reject(&staged, "inspection").await;
                return Err(IngestError::Media(e));
            }
        };

        let video_id = staged.video_id.clone();
        let record = VideoRecord::new(video_id.clone(), metadata);
        if let Err(e) = self.videos.create(record).await {
            discard(&staged.path).await;
            return Err(e.into());
        }

        let job_id = match self.queue.enqueue(video_id.clone(), staged.path.clone()).await {
            Ok(job_id) => job_id,
            Err(e) => {
                // No job will ever pick the record up.
                if let Err(mark) = self.videos.mark_failed(&video_id).await {
                    warn!(video_id = %video_id, "Failed to mark video as failed: {}", mark);
                }
                discard(&staged.path).await;
                return Err(e.into());
            }
        };

        metrics::record_upload_accepted();
        info!(
            video_id = %video_id,
            job_id = %job_id,
            bytes = staged.bytes,
            duration_secs = info.duration,
            transcoder = self.transcoder.name(),
            "Upload accepted"
        );

        Ok(AcceptedUpload {
            video_id,
            job_id,
            status: "uploading",
        })
    }

    /// Drop a staged upload that will not be admitted.
    pub async fn discard(&self, staged: StagedUpload) {
        discard(&staged.path).await;
    }

    async fn reject(&self, staged: &StagedUpload, reason: &str) {
        metrics::record_upload_rejected(reason);
        info!(video_id = %staged.video_id, reason, "Upload rejected");
        discard(&staged.path).await;
    }
}

/// `.ext` from the client file name, if it is short and plain.
fn extension_of(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove staged upload: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use reel_media::{check_duration, MediaResult, VideoInfo};
    use reel_models::{TranscodeResult, VideoStatus};
    use reel_queue::QueueConfig;
    use reel_store::InMemoryVideoRepository;

    /// Reports a fixed duration and applies the 90s rule.
    struct FixedDuration(f64);

    #[async_trait]
    impl Transcoder for FixedDuration {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn validate(&self, _input: &Path) -> MediaResult<VideoInfo> {
            let info = VideoInfo {
                duration: self.0,
                width: 1080,
                height: 1920,
                codec: "h264".to_string(),
                has_audio: true,
            };
            check_duration(&info, 90)?;
            Ok(info)
        }

        async fn transcode(&self, _input: &Path, _out: &Path, _name: &str) -> MediaResult<TranscodeResult> {
            Err(MediaError::NotImplemented("not used here".to_string()))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        videos: Arc<InMemoryVideoRepository>,
        queue: Arc<JobQueue>,
        gate: IngestGate,
    }

    impl Fixture {
        fn new(duration: f64) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let videos = Arc::new(InMemoryVideoRepository::new());
            let queue = Arc::new(JobQueue::new(QueueConfig::default()));
            let gate = IngestGate::new(
                videos.clone(),
                queue.clone(),
                Arc::new(FixedDuration(duration)),
                dir.path().join("incoming"),
            );
            Self {
                dir,
                videos,
                queue,
                gate,
            }
        }

        async fn stage(&self) -> StagedUpload {
            let body = futures_util::stream::iter(vec![
                Ok::<_, std::io::Error>(Bytes::from_static(b"fake ")),
                Ok(Bytes::from_static(b"video")),
            ]);
            self.gate
                .stage(Some("clip.MOV"), Some("video/quicktime"), body)
                .await
                .unwrap()
        }

        fn incoming_files(&self) -> usize {
            std::fs::read_dir(self.dir.path().join("incoming")).unwrap().count()
        }
    }

    fn metadata(title: &str) -> UploadMetadata {
        UploadMetadata {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stage_writes_deterministic_path() {
        let fx = Fixture::new(30.0);
        let staged = fx.stage().await;
        assert_eq!(staged.bytes, 10);
        assert_eq!(
            staged.path,
            fx.dir.path().join("incoming").join(format!("{}.mov", staged.video_id))
        );
        assert_eq!(std::fs::read(&staged.path).unwrap(), b"fake video");
    }

    #[tokio::test]
    async fn test_accepted_upload_creates_record_and_job() {
        let fx = Fixture::new(30.0);
        let staged = fx.stage().await;
        let path = staged.path.clone();

        let accepted = fx.gate.accept(staged, metadata("first clip")).await.unwrap();

        let record = fx.videos.get(&accepted.video_id).await.unwrap().unwrap();
        assert_eq!(record.status, VideoStatus::Uploading);
        assert_eq!(record.title, "first clip");
        let job = fx.queue.job(&accepted.job_id).unwrap();
        assert_eq!(job.video_id, accepted.video_id);
        assert_eq!(job.input_path, path);
        assert_eq!(fx.queue.stats().waiting, 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_too_long_video_rejected_before_create() {
        let fx = Fixture::new(95.0);
        let staged = fx.stage().await;

        let err = fx.gate.accept(staged, metadata("long")).await.unwrap_err();

        assert!(matches!(err, IngestError::InvalidMedia(_)));
        assert!(fx.videos.is_empty());
        let stats = fx.queue.stats();
        assert_eq!((stats.waiting, stats.active), (0, 0));
        assert_eq!(fx.incoming_files(), 0);
    }

    #[tokio::test]
    async fn test_invalid_metadata_rejected() {
        let fx = Fixture::new(30.0);
        let staged = fx.stage().await;

        let err = fx.gate.accept(staged, metadata("")).await.unwrap_err();

        assert!(matches!(err, IngestError::Validation(_)));
        assert!(fx.videos.is_empty());
        assert_eq!(fx.incoming_files(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_marks_record_failed() {
        let fx = Fixture::new(30.0);
        let staged = fx.stage().await;
        let video_id = staged.video_id.clone();
        fx.queue.close();

        let err = fx.gate.accept(staged, metadata("late")).await.unwrap_err();

        assert!(matches!(err, IngestError::Queue(QueueError::Closed)));
        let record = fx.videos.get(&video_id).await.unwrap().unwrap();
        assert_eq!(record.status, VideoStatus::Failed);
        assert_eq!(fx.incoming_files(), 0);
    }

    #[tokio::test]
    async fn test_non_video_content_type_rejected() {
        let fx = Fixture::new(30.0);
        let body = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"x"))]);
        let err = fx
            .gate
            .stage(Some("notes.txt"), Some("text/plain"), body)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[tokio::test]
    async fn test_interrupted_body_leaves_nothing() {
        let fx = Fixture::new(30.0);
        let body = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let err = fx.gate.stage(Some("a.mp4"), None, body).await.unwrap_err();
        assert!(matches!(err, IngestError::Upload(_)));
        assert_eq!(fx.incoming_files(), 0);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Some("clip.MP4")), ".mp4");
        assert_eq!(extension_of(Some("../../etc/passwd")), "");
        assert_eq!(extension_of(Some("a.m p4")), "");
        assert_eq!(extension_of(None), "");
    }
}
