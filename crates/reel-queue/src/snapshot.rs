//! JSON snapshot of the job table.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{QueueError, QueueResult};
use crate::job::VideoJob;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct QueueSnapshot {
    pub saved_at: DateTime<Utc>,
    pub completed_total: u64,
    pub jobs: Vec<VideoJob>,
}

/// Writes snapshots with temp-file-then-rename so a crash mid-write leaves the
/// previous snapshot intact.
#[derive(Debug)]
pub(crate) struct SnapshotStore {
    path: PathBuf,
    /// Highest table version written so far
    written: Mutex<u64>,
}

impl SnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> QueueResult<Option<QueueSnapshot>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = serde_json::from_slice(&raw).map_err(|e| {
            QueueError::snapshot(format!("corrupt snapshot {}: {}", self.path.display(), e))
        })?;
        Ok(Some(snapshot))
    }

    /// Persist `bytes` as table `version`. Older versions that lose the race
    /// to a newer one are skipped.
    pub async fn save(&self, version: u64, bytes: Vec<u8>) -> QueueResult<()> {
        let mut written = self.written.lock().await;
        if version <= *written {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        *written = version;
        debug!(version, path = %self.path.display(), "Saved queue snapshot");
        Ok(())
    }
}
