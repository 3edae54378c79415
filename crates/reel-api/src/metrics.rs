//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the Prometheus recorder and return the handle `/metrics` renders.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "reel_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "reel_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "reel_http_requests_in_flight";

    // Live engagement metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "reel_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "reel_ws_connections_active";
    pub const EVENTS_PUBLISHED_TOTAL: &str = "reel_events_published_total";
    pub const DELIVERIES_DROPPED_TOTAL: &str = "reel_deliveries_dropped_total";

    // Ingest metrics
    pub const UPLOADS_ACCEPTED_TOTAL: &str = "reel_uploads_accepted_total";
    pub const UPLOADS_REJECTED_TOTAL: &str = "reel_uploads_rejected_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record WebSocket connection.
pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record WebSocket disconnection.
pub fn record_ws_disconnection() {
    gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record one fan-out of an engagement event.
pub fn record_publish(kind: &str, dropped: usize) {
    let labels = [("type", kind.to_string())];
    counter!(names::EVENTS_PUBLISHED_TOTAL, &labels).increment(1);
    if dropped > 0 {
        counter!(names::DELIVERIES_DROPPED_TOTAL).increment(dropped as u64);
    }
}

pub fn record_upload_accepted() {
    counter!(names::UPLOADS_ACCEPTED_TOTAL).increment(1);
}

pub fn record_upload_rejected(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::UPLOADS_REJECTED_TOTAL, &labels).increment(1);
}

/// Sanitize path for metrics labels (collapse ids to placeholders).
fn sanitize_path(path: &str) -> String {
    let mut out = Vec::new();
    let mut previous = "";
    for segment in path.split('/') {
        let replaced = match previous {
            "videos" => ":video_id",
            "dead-letters" => ":job_id",
            "media" => ":file",
            _ => segment,
        };
        out.push(replaced);
        previous = segment;
    }
    out.join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
