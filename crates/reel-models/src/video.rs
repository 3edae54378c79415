//! Video record models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Unique identifier for an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is safe to embed in a filename.
    ///
    /// Output paths are derived from the id, so anything that could escape the
    /// upload directory is rejected.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Upload accepted, transcoding pending or in progress
    #[default]
    Uploading,
    /// Rendition and thumbnail are available
    Ready,
    /// Processing failed
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploading => "uploading",
            VideoStatus::Ready => "ready",
            VideoStatus::Failed => "failed",
        }
    }

    /// Ready is sticky: once a rendition is published the record never goes back.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        match self {
            VideoStatus::Ready => next == VideoStatus::Ready,
            VideoStatus::Uploading | VideoStatus::Failed => true,
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata supplied alongside an upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, Validate)]
pub struct UploadMetadata {
    /// Video title
    #[validate(length(min = 1, max = 200))]
    pub title: String,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2000))]
    pub description: Option<String>,

    /// Free-form tags
    #[serde(default)]
    #[validate(length(max = 10))]
    pub tags: Vec<String>,
}

/// Video record as stored by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    /// Unique video ID
    pub id: VideoId,

    /// Lifecycle status
    #[serde(default)]
    pub status: VideoStatus,

    /// Public URL of the transcoded rendition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,

    /// Public URL of the thumbnail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,

    /// Duration of the rendition, filled in after transcoding
    #[serde(default)]
    pub duration_sec: u32,

    /// Video title
    pub title: String,

    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Create a fresh record in the `Uploading` state.
    pub fn new(id: VideoId, metadata: UploadMetadata) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: VideoStatus::Uploading,
            file_url: None,
            thumb_url: None,
            duration_sec: 0,
            title: metadata.title,
            description: metadata.description,
            tags: metadata.tags,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the record has reached a terminal status.
    pub fn is_ready(&self) -> bool {
        self.status == VideoStatus::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_never_reverts() {
        assert!(!VideoStatus::Ready.can_transition_to(VideoStatus::Uploading));
        assert!(!VideoStatus::Ready.can_transition_to(VideoStatus::Failed));
        assert!(VideoStatus::Ready.can_transition_to(VideoStatus::Ready));
        assert!(VideoStatus::Failed.can_transition_to(VideoStatus::Uploading));
        assert!(VideoStatus::Uploading.can_transition_to(VideoStatus::Ready));
    }

    #[test]
    fn test_path_safe_ids() {
        assert!(VideoId::new().is_path_safe());
        assert!(VideoId::from("clip_01-a").is_path_safe());
        assert!(!VideoId::from("../etc/passwd").is_path_safe());
        assert!(!VideoId::from("").is_path_safe());
    }

    #[test]
    fn test_upload_metadata_validation() {
        let ok = UploadMetadata {
            title: "Contract law in 60 seconds".to_string(),
            description: None,
            tags: vec!["law".to_string()],
        };
        assert!(ok.validate().is_ok());

        let empty_title = UploadMetadata {
            title: String::new(),
            ..ok.clone()
        };
        assert!(empty_title.validate().is_err());

        let too_many_tags = UploadMetadata {
            tags: (0..11).map(|i| format!("t{i}")).collect(),
            ..ok
        };
        assert!(too_many_tags.validate().is_err());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = VideoRecord::new(VideoId::from("v1"), UploadMetadata {
            title: "t".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "uploading");
        assert_eq!(json["durationSec"], 0);
        assert!(json.get("fileUrl").is_none());
    }
}
