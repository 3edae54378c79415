//! Transcode worker pool.
//!
//! This crate provides:
//! - `WorkerPool`: N workers leasing jobs, lease heartbeats, expired-lease reclaim
//! - `JobProcessor`: the per-job state machine returning an explicit `JobOutcome`
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod processor;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pool::WorkerPool;
pub use processor::{JobOutcome, JobProcessor};
