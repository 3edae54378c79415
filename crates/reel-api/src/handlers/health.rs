//! Liveness and readiness probes.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use reel_models::{CounterKind, VideoId};
use reel_queue::QueueStats;

use crate::state::AppState;

#[derive(Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// `GET /health`
pub async fn health() -> Json<Liveness> {
    Json(Liveness {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub transcoder: &'static str,
    pub queue_open: bool,
    pub queue: QueueStats,
    pub live_videos: usize,
    pub counters_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters_error: Option<String>,
}

/// `GET /ready`. 503 while the queue is closed or the counter store is down.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let probe = VideoId::from("readiness-probe");
    let started = Instant::now();
    let (counters_ms, counters_error) =
        match state.engagement.count(&probe, CounterKind::Views).await {
            Ok(_) => (Some(started.elapsed().as_millis() as u64), None),
            Err(e) => (None, Some(e.to_string())),
        };

    let queue_open = !state.queue.is_closed();
    let ready = queue_open && counters_error.is_none();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(Readiness {
            ready,
            transcoder: state.transcoder.name(),
            queue_open,
            queue: state.queue.stats(),
            live_videos: state.broadcaster.video_count(),
            counters_ms,
            counters_error,
        }),
    )
}
