//! Persistence seams for the ingestion pipeline.
//!
//! - `VideoRepository`: lifecycle store for `VideoRecord`s, with guarded status helpers
//! - `CounterCache`: atomic, never-negative engagement counters (Redis or in-memory)

pub mod counters;
pub mod error;
pub mod videos;

pub use counters::{CounterCache, InMemoryCounterCache, RedisCounterCache};
pub use error::{StoreError, StoreResult};
pub use videos::{InMemoryVideoRepository, ReadyUpdate, VideoPatch, VideoRepository};
