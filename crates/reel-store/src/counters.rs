//! Engagement counters.
//!
//! Keys: `video:{id}:views`, `video:{id}:likes`, `video:{id}:comments`.
//! Every operation returns the post-operation value, which callers forward to
//! the broadcaster.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{AsyncCommands, Script};
use tracing::debug;

use reel_models::{CounterKind, VideoId};

use crate::error::StoreResult;

/// Decrement that stops at zero, in one round trip.
const DECREMENT_FLOOR_ZERO: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current > 0 then
    return redis.call('DECR', KEYS[1])
end
return 0
"#;

#[async_trait]
pub trait CounterCache: Send + Sync {
    async fn increment(&self, video_id: &VideoId, kind: CounterKind) -> StoreResult<u64>;

    /// Never goes below zero.
    async fn decrement(&self, video_id: &VideoId, kind: CounterKind) -> StoreResult<u64>;

    async fn get(&self, video_id: &VideoId, kind: CounterKind) -> StoreResult<u64>;
}

/// Redis-backed counters shared across API instances.
pub struct RedisCounterCache {
    client: redis::Client,
    decrement: Script,
}

impl RedisCounterCache {
    pub fn new(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            decrement: Script::new(DECREMENT_FLOOR_ZERO),
        })
    }

    /// Round-trip a PING, for startup checks.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CounterCache for RedisCounterCache {
    async fn increment(&self, video_id: &VideoId, kind: CounterKind) -> StoreResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = kind.key(video_id);
        let value: i64 = conn.incr(&key, 1).await?;
        debug!(key = %key, value, "Incremented counter");
        Ok(value.max(0) as u64)
    }

    async fn decrement(&self, video_id: &VideoId, kind: CounterKind) -> StoreResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = kind.key(video_id);
        let value: i64 = self.decrement.key(&key).invoke_async(&mut conn).await?;
        debug!(key = %key, value, "Decremented counter");
        Ok(value.max(0) as u64)
    }

    async fn get(&self, video_id: &VideoId, kind: CounterKind) -> StoreResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<i64> = conn.get(kind.key(video_id)).await?;
        Ok(value.unwrap_or(0).max(0) as u64)
    }
}

/// Single-process counters for tests and Redis-less development.
#[derive(Debug, Default)]
pub struct InMemoryCounterCache {
    values: Mutex<HashMap<String, u64>>,
}

impl InMemoryCounterCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterCache for InMemoryCounterCache {
    async fn increment(&self, video_id: &VideoId, kind: CounterKind) -> StoreResult<u64> {
        let mut values = self.values.lock();
        let value = values.entry(kind.key(video_id)).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn decrement(&self, video_id: &VideoId, kind: CounterKind) -> StoreResult<u64> {
        let mut values = self.values.lock();
        let value = values.entry(kind.key(video_id)).or_insert(0);
        *value = value.saturating_sub(1);
        Ok(*value)
    }

    async fn get(&self, video_id: &VideoId, kind: CounterKind) -> StoreResult<u64> {
        Ok(self
            .values
            .lock()
            .get(&kind.key(video_id))
            .copied()
            .unwrap_or(0))
    }
}
