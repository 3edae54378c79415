//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Video record missing: {0}")]
    RecordMissing(String),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Store error: {0}")]
    Store(#[from] reel_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Check if another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_retryable(),
            WorkerError::Store(e) => e.is_retryable(),
            WorkerError::RecordMissing(_) => false,
            WorkerError::Io(_) => true,
        }
    }
}
