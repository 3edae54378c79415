//! Video lifecycle repository.
//!
//! The relational store lives outside this workspace; the pipeline only needs
//! `create`, `get` and `update`. Status changes go through
//! [`VideoStatus::can_transition_to`], so a Ready record can never be pulled
//! back to Uploading or Failed by a late or duplicate job.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use reel_models::{VideoId, VideoRecord, VideoStatus};

use crate::error::{StoreError, StoreResult};

/// Partial update of a video record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoPatch {
    pub status: Option<VideoStatus>,
    pub file_url: Option<String>,
    pub thumb_url: Option<String>,
    pub duration_sec: Option<u32>,
}

impl VideoPatch {
    pub fn status(status: VideoStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    fn apply(self, record: &mut VideoRecord) -> StoreResult<()> {
        if let Some(next) = self.status {
            if !record.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    video_id: record.id.to_string(),
                    from: record.status,
                    to: next,
                });
            }
            record.status = next;
        }
        if let Some(url) = self.file_url {
            record.file_url = Some(url);
        }
        if let Some(url) = self.thumb_url {
            record.thumb_url = Some(url);
        }
        if let Some(duration) = self.duration_sec {
            record.duration_sec = duration;
        }
        record.updated_at = Utc::now();
        Ok(())
    }
}

/// Fields written when a transcode succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyUpdate {
    pub file_url: String,
    pub thumb_url: String,
    pub duration_sec: u32,
}

impl From<ReadyUpdate> for VideoPatch {
    fn from(ready: ReadyUpdate) -> Self {
        Self {
            status: Some(VideoStatus::Ready),
            file_url: Some(ready.file_url),
            thumb_url: Some(ready.thumb_url),
            duration_sec: Some(ready.duration_sec),
        }
    }
}

#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Insert a new record. Fails if the id is taken.
    async fn create(&self, record: VideoRecord) -> StoreResult<()>;

    async fn get(&self, id: &VideoId) -> StoreResult<Option<VideoRecord>>;

    /// Apply `patch` and return the updated record.
    async fn update(&self, id: &VideoId, patch: VideoPatch) -> StoreResult<VideoRecord>;

    /// Put the record (back) into the processing state.
    ///
    /// A Ready record is returned unchanged so the caller can skip work that
    /// has already been done.
    async fn mark_processing(&self, id: &VideoId) -> StoreResult<VideoRecord> {
        let record = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;
        if record.is_ready() || record.status == VideoStatus::Uploading {
            return Ok(record);
        }
        match self.update(id, VideoPatch::status(VideoStatus::Uploading)).await {
            // Finished by someone else between the read and the write.
            Err(StoreError::InvalidTransition { .. }) => self
                .get(id)
                .await?
                .ok_or_else(|| StoreError::not_found(id.as_str())),
            other => other,
        }
    }

    async fn mark_ready(&self, id: &VideoId, ready: ReadyUpdate) -> StoreResult<VideoRecord> {
        self.update(id, ready.into()).await
    }

    async fn mark_failed(&self, id: &VideoId) -> StoreResult<VideoRecord> {
        self.update(id, VideoPatch::status(VideoStatus::Failed)).await
    }
}

/// Process-local repository used in development and tests.
#[derive(Debug, Default)]
pub struct InMemoryVideoRepository {
    records: RwLock<HashMap<VideoId, VideoRecord>>,
}

impl InMemoryVideoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl VideoRepository for InMemoryVideoRepository {
    async fn create(&self, record: VideoRecord) -> StoreResult<()> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.to_string()));
        }
        info!(video_id = %record.id, "Created video record");
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &VideoId) -> StoreResult<Option<VideoRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn update(&self, id: &VideoId, patch: VideoPatch) -> StoreResult<VideoRecord> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;
        patch.apply(record)?;
        debug!(video_id = %id, status = %record.status, "Updated video record");
        Ok(record.clone())
    }
}
