//! View, like and comment counters with live fan-out.
//!
//! Each operation bumps the counter and then publishes the value it got back.
//! The two steps are separate, so concurrent publishers may reach a
//! subscriber out of order; the counter itself is always exact.

use std::sync::Arc;

use tracing::debug;

use reel_models::{CounterKind, EngagementEvent, VideoId};
use reel_store::{CounterCache, StoreResult};

use crate::broadcast::Broadcaster;

pub struct EngagementService {
    counters: Arc<dyn CounterCache>,
    broadcaster: Arc<Broadcaster>,
}

impl EngagementService {
    pub fn new(counters: Arc<dyn CounterCache>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            counters,
            broadcaster,
        }
    }

    pub async fn record_view(&self, video_id: &VideoId) -> StoreResult<u64> {
        let views = self.counters.increment(video_id, CounterKind::Views).await?;
        self.publish(EngagementEvent::view(video_id.clone(), views));
        Ok(views)
    }

    pub async fn like(&self, video_id: &VideoId) -> StoreResult<u64> {
        let likes = self.counters.increment(video_id, CounterKind::Likes).await?;
        self.publish(EngagementEvent::like(video_id.clone(), likes, true));
        Ok(likes)
    }

    pub async fn unlike(&self, video_id: &VideoId) -> StoreResult<u64> {
        let likes = self.counters.decrement(video_id, CounterKind::Likes).await?;
        self.publish(EngagementEvent::like(video_id.clone(), likes, false));
        Ok(likes)
    }

    pub async fn comment(&self, video_id: &VideoId) -> StoreResult<u64> {
        let comments = self.counters.increment(video_id, CounterKind::Comments).await?;
        self.publish(EngagementEvent::comment(video_id.clone(), comments));
        Ok(comments)
    }

    pub async fn count(&self, video_id: &VideoId, kind: CounterKind) -> StoreResult<u64> {
        self.counters.get(video_id, kind).await
    }

    fn publish(&self, event: EngagementEvent) {
        let report = self.broadcaster.publish(&event);
        debug!(
            video_id = %event.video_id,
            event_type = event.kind.as_str(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Engagement event published"
        );
    }
}
