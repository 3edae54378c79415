//! Per-job handler.
//!
//! `process` never panics and never returns `Err`: every path ends in a
//! [`JobOutcome`] that the pool turns into an ack or a fail on the queue.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use reel_media::{output_paths, Transcoder};
use reel_models::{TranscodeResult, VideoId};
use reel_queue::Lease;
use reel_store::{ReadyUpdate, StoreError, VideoRepository};

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// How a single delivery of a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    /// Rendition produced and the record is Ready.
    Transcoded(TranscodeResult),
    /// The record was already Ready (redelivery of a finished job).
    AlreadyReady,
    /// Failed; another attempt may succeed.
    Retry(WorkerError),
    /// Failed in a way no retry will fix.
    Permanent(WorkerError),
}

impl JobOutcome {
    fn from_error(err: WorkerError) -> Self {
        if err.is_retryable() {
            JobOutcome::Retry(err)
        } else {
            JobOutcome::Permanent(err)
        }
    }
}

/// Drives the transcoder for one job and keeps the video record in step.
pub struct JobProcessor {
    config: WorkerConfig,
    videos: Arc<dyn VideoRepository>,
    transcoder: Arc<dyn Transcoder>,
}

impl JobProcessor {
    pub fn new(
        config: WorkerConfig,
        videos: Arc<dyn VideoRepository>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            config,
            videos,
            transcoder,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn process(&self, lease: &Lease) -> JobOutcome {
        let video_id = &lease.video_id;

        match self.videos.mark_processing(video_id).await {
            Ok(record) if record.is_ready() => return JobOutcome::AlreadyReady,
            Ok(_) => {}
            Err(StoreError::NotFound(id)) => {
                return JobOutcome::Permanent(WorkerError::RecordMissing(id));
            }
            Err(e) => return JobOutcome::from_error(e.into()),
        }

        match self.transcode(lease).await {
            Ok(result) => match self.finish(video_id, &result).await {
                Ok(()) => {
                    remove_best_effort(&lease.input_path).await;
                    JobOutcome::Transcoded(result)
                }
                // Outputs stay in place; the redelivery overwrites them.
                Err(e) => JobOutcome::from_error(e),
            },
            Err(e) => {
                self.record_failure(video_id).await;
                self.remove_partial_output(video_id).await;
                JobOutcome::from_error(e)
            }
        }
    }

    async fn transcode(&self, lease: &Lease) -> Result<TranscodeResult, WorkerError> {
        let output_dir = self.config.processed_dir();
        tokio::fs::create_dir_all(&output_dir).await?;
        let result = self
            .transcoder
            .transcode(&lease.input_path, &output_dir, lease.video_id.as_str())
            .await?;
        Ok(result)
    }

    async fn finish(&self, video_id: &VideoId, result: &TranscodeResult) -> Result<(), WorkerError> {
        let ready = ReadyUpdate {
            file_url: self.config.media_url(&file_name(&result.output_path)),
            thumb_url: self.config.media_url(&file_name(&result.thumbnail_path)),
            duration_sec: result.duration_sec,
        };
        self.videos.mark_ready(video_id, ready).await?;
        Ok(())
    }

    async fn record_failure(&self, video_id: &VideoId) {
        if let Err(e) = self.videos.mark_failed(video_id).await {
            warn!(video_id = %video_id, "Failed to mark video as failed: {}", e);
        }
    }

    /// Only the scratch file: the final rendition may belong to a redelivered
    /// attempt that already published it.
    async fn remove_partial_output(&self, video_id: &VideoId) {
        if let Ok(paths) = output_paths(&self.config.processed_dir(), video_id.as_str()) {
            remove_best_effort(&paths.partial).await;
        }
    }

    /// Final bookkeeping once the queue has given up on a job.
    ///
    /// The upload is deleted only when the failure was permanent; after
    /// exhausted transient failures it stays so an operator retry can reuse it.
    pub async fn on_dead_letter(&self, video_id: &VideoId, input_path: &Path, permanent: bool) {
        self.record_failure(video_id).await;
        if permanent {
            remove_best_effort(input_path).await;
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn remove_best_effort(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove file: {}", e),
    }
}
