//! Structured job logging.

use tracing::{error, info, warn, Span};

use reel_queue::Lease;

/// Lifecycle logging for one delivery of a job, with the job id, video id and
/// attempt attached to every line.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    video_id: String,
    attempt: u32,
    max_attempts: u32,
}

impl JobLogger {
    pub fn new(lease: &Lease) -> Self {
        Self {
            job_id: lease.job_id.to_string(),
            video_id: lease.video_id.to_string(),
            attempt: lease.attempt,
            max_attempts: lease.max_attempts,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt,
            max_attempts = self.max_attempts,
            "Job started: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt,
            max_attempts = self.max_attempts,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    /// Span wrapping everything the job does, so FFmpeg and store logs carry
    /// the job context too.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "transcode_job",
            job_id = %self.job_id,
            video_id = %self.video_id,
            attempt = self.attempt
        )
    }
}
