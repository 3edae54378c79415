//! Application state.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use reel_media::{build_transcoder, MediaConfig, Transcoder};
use reel_queue::{JobQueue, QueueConfig};
use reel_store::{
    CounterCache, InMemoryCounterCache, InMemoryVideoRepository, RedisCounterCache, VideoRepository,
};
use reel_worker::WorkerConfig;

use crate::broadcast::Broadcaster;
use crate::config::ApiConfig;
use crate::services::{EngagementService, IngestGate};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub worker_config: Arc<WorkerConfig>,
    pub videos: Arc<dyn VideoRepository>,
    pub queue: Arc<JobQueue>,
    pub transcoder: Arc<dyn Transcoder>,
    pub broadcaster: Arc<Broadcaster>,
    pub ingest: Arc<IngestGate>,
    pub engagement: Arc<EngagementService>,
}

impl AppState {
    /// Build state from the environment: open the queue (restoring its
    /// snapshot if configured) and pick Redis or in-memory counters.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let media_config = MediaConfig::from_env();
        let worker_config = WorkerConfig::from_env();
        let queue_config = QueueConfig::from_env();

        let transcoder = build_transcoder(&media_config);
        info!(
            transcoder = transcoder.name(),
            max_duration_secs = media_config.max_duration_secs,
            "Transcoder selected"
        );

        let queue = JobQueue::open(queue_config)
            .await
            .context("failed to open job queue")?;

        let counters: Arc<dyn CounterCache> = match &config.redis_url {
            Some(url) => {
                let redis = RedisCounterCache::new(url).context("invalid REDIS_URL")?;
                if let Err(e) = redis.ping().await {
                    warn!("Redis not reachable yet: {}", e);
                }
                info!("Using Redis engagement counters");
                Arc::new(redis)
            }
            None => {
                info!("REDIS_URL not set, using in-memory engagement counters");
                Arc::new(InMemoryCounterCache::new())
            }
        };

        Ok(Self::from_parts(
            config,
            worker_config,
            Arc::new(InMemoryVideoRepository::new()),
            counters,
            Arc::new(queue),
            transcoder,
        ))
    }

    /// Wire state from already-built collaborators.
    pub fn from_parts(
        config: ApiConfig,
        worker_config: WorkerConfig,
        videos: Arc<dyn VideoRepository>,
        counters: Arc<dyn CounterCache>,
        queue: Arc<JobQueue>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let broadcaster = Arc::new(Broadcaster::new());
        let ingest = IngestGate::new(
            Arc::clone(&videos),
            Arc::clone(&queue),
            Arc::clone(&transcoder),
            worker_config.incoming_dir(),
        );
        let engagement = EngagementService::new(counters, Arc::clone(&broadcaster));

        Self {
            config: Arc::new(config),
            worker_config: Arc::new(worker_config),
            videos,
            queue,
            transcoder,
            broadcaster,
            ingest: Arc::new(ingest),
            engagement: Arc::new(engagement),
        }
    }
}
