//! Store error types.

use thiserror::Error;

use reel_models::VideoStatus;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Video already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid status transition for {video_id}: {from} -> {to}")]
    InvalidTransition {
        video_id: String,
        from: VideoStatus,
        to: VideoStatus,
    },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Transient backend failures; redelivery may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Redis(_) | StoreError::Unavailable(_))
    }
}
