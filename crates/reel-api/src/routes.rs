//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;

use crate::handlers::{
    comment_video, get_video, health, like_video, list_dead_letters, queue_stats, ready,
    retry_dead_letter, unlike_video, upload_video,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;
use crate::ws::{ws_live_path, ws_live_query};

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let video_routes = Router::new()
        .route("/videos", post(upload_video))
        .route("/videos/:video_id", get(get_video))
        .route("/videos/:video_id/like", post(like_video).delete(unlike_video))
        .route("/videos/:video_id/comments", post(comment_video));

    let queue_routes = Router::new()
        .route("/queue/stats", get(queue_stats))
        .route("/queue/dead-letters", get(list_dead_letters))
        .route("/queue/dead-letters/:job_id/retry", post(retry_dead_letter));

    let ws_routes = Router::new()
        .route("/ws", get(ws_live_query))
        .route("/videos/:video_id/live", get(ws_live_path));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
    } else {
        Router::new()
    };

    let media = ServeDir::new(state.worker_config.processed_dir());
    let max_upload = state.config.max_upload_bytes;

    Router::new()
        .merge(video_routes)
        .merge(queue_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .nest_service(&media_mount(&state.worker_config.media_url_prefix), media)
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(RequestBodyLimitLayer::new(max_upload))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_logging))
        .layer(middleware::from_fn(request_id))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

/// Mount point for rendered media; only absolute, non-root prefixes are usable.
fn media_mount(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.starts_with('/') && trimmed.len() > 1 && !trimmed.contains(':') && !trimmed.contains('*') {
        trimmed.to_string()
    } else {
        "/media".to_string()
    }
}
