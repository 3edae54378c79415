//! Live engagement events.
//!
//! Wire format: `{"type": "view" | "like" | "comment", "videoId": "...", "data": {...}}`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::VideoId;

/// Counters tracked per video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Views,
    Likes,
    Comments,
}

impl CounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::Views => "views",
            CounterKind::Likes => "likes",
            CounterKind::Comments => "comments",
        }
    }

    /// Key under which the counter is stored, e.g. `video:abc:likes`.
    pub fn key(&self, video_id: &VideoId) -> String {
        format!("video:{}:{}", video_id, self.as_str())
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engagement event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    View,
    Like,
    Comment,
}

impl EngagementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementKind::View => "view",
            EngagementKind::Like => "like",
            EngagementKind::Comment => "comment",
        }
    }
}

/// Event payload. Each variant carries the counter value observed by the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum EngagementData {
    View {
        #[serde(rename = "viewCount")]
        view_count: u64,
    },
    Like {
        #[serde(rename = "likeCount")]
        like_count: u64,
        liked: bool,
    },
    Comment {
        #[serde(rename = "commentCount")]
        comment_count: u64,
    },
}

/// Event pushed to live subscribers of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EngagementEvent {
    #[serde(rename = "type")]
    pub kind: EngagementKind,
    #[serde(rename = "videoId")]
    pub video_id: VideoId,
    pub data: EngagementData,
}

impl EngagementEvent {
    pub fn view(video_id: VideoId, view_count: u64) -> Self {
        Self {
            kind: EngagementKind::View,
            video_id,
            data: EngagementData::View { view_count },
        }
    }

    pub fn like(video_id: VideoId, like_count: u64, liked: bool) -> Self {
        Self {
            kind: EngagementKind::Like,
            video_id,
            data: EngagementData::Like { like_count, liked },
        }
    }

    pub fn comment(video_id: VideoId, comment_count: u64) -> Self {
        Self {
            kind: EngagementKind::Comment,
            video_id,
            data: EngagementData::Comment { comment_count },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_wire_format() {
        let event = EngagementEvent::view(VideoId::from("v1"), 42);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "view", "videoId": "v1", "data": {"viewCount": 42}})
        );
    }

    #[test]
    fn test_like_wire_format() {
        let event = EngagementEvent::like(VideoId::from("v1"), 3, false);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"like""#));
        assert!(json.contains(r#""likeCount":3"#));
        assert!(json.contains(r#""liked":false"#));
    }

    #[test]
    fn test_comment_event_parses() {
        let raw = r#"{"type":"comment","videoId":"v9","data":{"commentCount":7}}"#;
        let event: EngagementEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event, EngagementEvent::comment(VideoId::from("v9"), 7));
    }

    #[test]
    fn test_counter_keys() {
        let id = VideoId::from("abc");
        assert_eq!(CounterKind::Likes.key(&id), "video:abc:likes");
        assert_eq!(CounterKind::Views.key(&id), "video:abc:views");
    }
}
