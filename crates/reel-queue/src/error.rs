//! Queue error types.

use thiserror::Error;

use reel_models::JobState;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The lease expired and the job was handed to someone else (or settled).
    #[error("Lease lost for job {0}")]
    LeaseLost(String),

    #[error("Job {job_id} is {state}")]
    InvalidState { job_id: String, state: JobState },

    #[error("Video {0} already has a job in flight")]
    AlreadyQueued(String),

    #[error("Queue is closed")]
    Closed,

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot(msg.into())
    }
}
