//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of workers, i.e. concurrent transcodes
    pub concurrency: usize,
    /// Root of `incoming/` (raw uploads) and `processed/` (renditions)
    pub upload_dir: PathBuf,
    /// Public URL prefix the processed directory is served under
    pub media_url_prefix: String,
    /// Interval for extending the lease of a running job
    pub job_heartbeat_interval: Duration,
    /// How often expired leases are swept back into the queue
    pub claim_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            upload_dir: PathBuf::from("./uploads"),
            media_url_prefix: "/media".to_string(),
            job_heartbeat_interval: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(2),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./uploads")),
            media_url_prefix: std::env::var("MEDIA_URL_PREFIX")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "/media".to_string()),
            job_heartbeat_interval: Duration::from_secs(
                std::env::var("WORKER_JOB_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    pub fn incoming_dir(&self) -> PathBuf {
        self.upload_dir.join("incoming")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.upload_dir.join("processed")
    }

    /// Public URL for a file in the processed directory.
    pub fn media_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.media_url_prefix, file_name)
    }
}
