//! Live engagement fan-out.
//!
//! The registry maps a video id to the send halves of its live connections.
//! It never owns a connection: the socket task holds the receiving half and
//! unsubscribes on close, and a handle whose receiver is gone is pruned on the
//! next publish. An entry exists only while at least one handle is registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use reel_models::{EngagementEvent, VideoId};

use crate::metrics;

/// Per-connection outbound queue depth.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 32;

/// Identifies one live connection within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Receiving side of a subscription, owned by the connection's writer task.
#[derive(Debug)]
pub struct Subscription {
    pub video_id: VideoId,
    pub connection_id: ConnectionId,
    pub receiver: mpsc::Receiver<Arc<str>>,
}

/// Result of one `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Handles that were full or closed; they have been unregistered.
    pub dropped: usize,
}

type Handles = HashMap<ConnectionId, mpsc::Sender<Arc<str>>>;

pub struct Broadcaster {
    registry: RwLock<HashMap<VideoId, Handles>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a new connection for `video_id`.
    pub fn subscribe(&self, video_id: &VideoId) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let connection_id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let subscribers = {
            let mut registry = self.registry.write();
            let handles = registry.entry(video_id.clone()).or_default();
            handles.insert(connection_id, sender);
            handles.len()
        };
        debug!(
            video_id = %video_id,
            connection_id = %connection_id,
            subscribers,
            "Subscriber added"
        );

        Subscription {
            video_id: video_id.clone(),
            connection_id,
            receiver,
        }
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn unsubscribe(&self, video_id: &VideoId, connection_id: ConnectionId) -> bool {
        let mut registry = self.registry.write();
        let Some(handles) = registry.get_mut(video_id) else {
            return false;
        };
        let removed = handles.remove(&connection_id).is_some();
        if handles.is_empty() {
            registry.remove(video_id);
        }
        if removed {
            debug!(video_id = %video_id, connection_id = %connection_id, "Subscriber removed");
        }
        removed
    }

    /// Deliver `event` to every connection subscribed to its video.
    ///
    /// Never blocks: a connection whose queue is full or closed loses the
    /// event and is unregistered. No lock is held while sending.
    pub fn publish(&self, event: &EngagementEvent) -> PublishReport {
        let video_id = &event.video_id;
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(video_id = %video_id, "Failed to serialize engagement event: {}", e);
                return PublishReport::default();
            }
        };

        let targets: Vec<(ConnectionId, mpsc::Sender<Arc<str>>)> = {
            let registry = self.registry.read();
            match registry.get(video_id) {
                Some(handles) => handles
                    .iter()
                    .map(|(id, sender)| (*id, sender.clone()))
                    .collect(),
                None => return PublishReport::default(),
            }
        };

        let mut report = PublishReport::default();
        let mut failed = Vec::new();
        for (connection_id, sender) in targets {
            match sender.try_send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(video_id = %video_id, connection_id = %connection_id, "Subscriber queue full, dropping");
                    failed.push(connection_id);
                }
                Err(TrySendError::Closed(_)) => failed.push(connection_id),
            }
        }
        report.dropped = failed.len();

        if !failed.is_empty() {
            let mut registry = self.registry.write();
            if let Some(handles) = registry.get_mut(video_id) {
                for connection_id in &failed {
                    handles.remove(connection_id);
                }
                if handles.is_empty() {
                    registry.remove(video_id);
                }
            }
        }

        metrics::record_publish(event.kind.as_str(), report.dropped);
        report
    }

    pub fn subscriber_count(&self, video_id: &VideoId) -> usize {
        self.registry
            .read()
            .get(video_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Number of videos with at least one live subscriber.
    pub fn video_count(&self) -> usize {
        self.registry.read().len()
    }
}
