//! Shared data models for the reelcast ingestion backend.
//!
//! This crate provides Serde-serializable types for:
//! - Video records and their lifecycle status
//! - Transcode jobs and results
//! - Live engagement events and counter kinds

pub mod engagement;
pub mod job;
pub mod media;
pub mod video;

// Re-export common types
pub use engagement::{CounterKind, EngagementData, EngagementEvent, EngagementKind};
pub use job::{JobId, JobState};
pub use media::TranscodeResult;
pub use video::{UploadMetadata, VideoId, VideoRecord, VideoStatus};
