//! Queue configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Attempts before a job is dead-lettered
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt
    pub backoff_base: Duration,
    /// Upper bound on a single retry delay
    pub backoff_max: Duration,
    /// How long a lease is valid without a heartbeat
    pub lease_timeout: Duration,
    /// Completed jobs kept in the table (the counter keeps counting)
    pub completed_retention: usize,
    /// JSON snapshot location; `None` keeps the table in memory only
    pub state_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(900),
            lease_timeout: Duration::from_secs(600), // 10 minutes
            completed_retention: 1000,
            state_path: None,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(3),
            backoff_base: Duration::from_secs(
                std::env::var("QUEUE_BACKOFF_BASE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            ),
            backoff_max: Duration::from_secs(
                std::env::var("QUEUE_BACKOFF_MAX_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
            lease_timeout: Duration::from_secs(
                std::env::var("QUEUE_LEASE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            completed_retention: std::env::var("QUEUE_COMPLETED_RETENTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            state_path: std::env::var("QUEUE_STATE_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at `backoff_max`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}
