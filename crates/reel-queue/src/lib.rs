//! Transcode job queue.
//!
//! This crate provides:
//! - An explicit job table with a single-lease-per-job contract
//! - Exponential retry backoff and a dead-letter set
//! - Optional JSON snapshots so a restart redelivers in-flight work

pub mod config;
pub mod error;
pub mod job;
pub mod queue;
mod snapshot;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use job::{FailOutcome, Lease, QueueStats, ReclaimReport, VideoJob};
pub use queue::JobQueue;
