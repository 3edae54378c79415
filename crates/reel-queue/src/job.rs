//! Job table entries and the values handed to workers.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reel_models::{JobId, JobState, VideoId};

/// One transcode job. `Failed` is the dead-letter state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoJob {
    pub id: JobId,
    pub video_id: VideoId,
    pub input_path: PathBuf,
    pub attempts: u32,
    pub max_attempts: u32,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Earliest time a pending retry may be leased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl VideoJob {
    pub fn new(video_id: VideoId, input_path: PathBuf, max_attempts: u32) -> Self {
        Self {
            id: JobId::new(),
            video_id,
            input_path,
            attempts: 0,
            max_attempts,
            state: JobState::Pending,
            enqueued_at: Utc::now(),
            last_error: None,
            retry_at: None,
            finished_at: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Exclusive right to work on one job until the lease deadline.
///
/// Only the holder of the current token may settle the job; a lease that
/// expired and was reclaimed is rejected with `QueueError::LeaseLost`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: JobId,
    pub video_id: VideoId,
    pub input_path: PathBuf,
    /// 1-based attempt number of this delivery
    pub attempt: u32,
    pub max_attempts: u32,
    pub worker: String,
    pub(crate) token: u64,
}

impl Lease {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// What `fail` did with the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to Pending; leasable again after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// Moved to the dead-letter set.
    DeadLettered { attempts: u32 },
}

/// Jobs moved by a reclaim sweep over expired leases, or by a snapshot restore.
#[derive(Debug, Clone, Default)]
pub struct ReclaimReport {
    pub requeued: Vec<JobId>,
    /// Jobs whose expired attempt was their last one
    pub dead_lettered: Vec<VideoJob>,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.dead_lettered.is_empty()
    }
}

/// Queue depth counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Pending jobs, including those waiting out a backoff
    pub waiting: usize,
    pub active: usize,
    /// Total completed since the table was created
    pub completed: u64,
    /// Dead-lettered jobs currently held
    pub failed: usize,
}
