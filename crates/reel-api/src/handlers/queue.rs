//! Queue inspection and dead-letter handlers.

use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

use reel_models::JobId;
use reel_queue::{QueueStats, VideoJob};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `GET /queue/stats`
pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.queue.stats())
}

/// `GET /queue/dead-letters`
pub async fn list_dead_letters(State(state): State<AppState>) -> Json<Vec<VideoJob>> {
    Json(state.queue.dead_letters())
}

/// `POST /queue/dead-letters/:job_id/retry`
///
/// Refused with 409 when the upload was already deleted, which happens after
/// a permanent failure.
pub async fn retry_dead_letter(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<VideoJob>> {
    let job_id = JobId::from_string(job_id);
    let job = state
        .queue
        .job(&job_id)
        .ok_or_else(|| ApiError::not_found(format!("job {job_id}")))?;

    if !tokio::fs::try_exists(&job.input_path).await.unwrap_or(false) {
        return Err(ApiError::conflict(format!(
            "upload for job {job_id} is no longer available"
        )));
    }

    let job = state.queue.retry_dead_letter(&job_id).await?;
    info!(job_id = %job.id, video_id = %job.video_id, "Dead letter retried by operator");
    Ok(Json(job))
}
