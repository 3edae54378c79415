//! Axum HTTP API server.
//!
//! This crate provides:
//! - Upload ingest with reject-before-create validation
//! - Like/view/comment counters with live WebSocket fan-out
//! - Queue inspection and dead-letter retry endpoints
//! - Prometheus metrics

pub mod broadcast;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod ws;

pub use broadcast::{Broadcaster, ConnectionId, PublishReport, Subscription};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{EngagementService, IngestGate};
pub use state::AppState;
