//! Video upload, lookup and engagement handlers.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::warn;

use reel_models::{CounterKind, UploadMetadata, VideoId, VideoRecord};

use crate::error::{ApiError, ApiResult};
use crate::services::{AcceptedUpload, StagedUpload};
use crate::state::AppState;

#[derive(Default)]
struct UploadForm {
    title: Option<String>,
    description: Option<String>,
    tags: Option<String>,
    staged: Option<StagedUpload>,
}

impl UploadForm {
    fn metadata(&self) -> ApiResult<UploadMetadata> {
        let tags = match self.tags.as_deref().map(str::trim) {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str::<Vec<String>>(raw)
                .map_err(|_| ApiError::Validation("tags must be a JSON array of strings".into()))?,
        };
        Ok(UploadMetadata {
            title: self.title.clone().unwrap_or_default().trim().to_string(),
            description: self
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            tags,
        })
    }
}

/// `POST /videos` (multipart: `file`, `title`, `description`, `tags`).
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<AcceptedUpload>)> {
    let mut form = UploadForm::default();
    if let Err(e) = read_form(&state, &mut multipart, &mut form).await {
        if let Some(staged) = form.staged.take() {
            state.ingest.discard(staged).await;
        }
        return Err(e);
    }

    let metadata = match form.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            if let Some(staged) = form.staged.take() {
                state.ingest.discard(staged).await;
            }
            return Err(e);
        }
    };
    let staged = form
        .staged
        .take()
        .ok_or_else(|| ApiError::bad_request("missing file field"))?;

    let accepted = state.ingest.accept(staged, metadata).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn read_form(state: &AppState, multipart: &mut Multipart, form: &mut UploadForm) -> ApiResult<()> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if form.staged.is_some() {
                    return Err(ApiError::bad_request("only one file per upload"));
                }
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let staged = state
                    .ingest
                    .stage(file_name.as_deref(), content_type.as_deref(), field)
                    .await?;
                form.staged = Some(staged);
            }
            "title" | "description" | "tags" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                match name.as_str() {
                    "title" => form.title = Some(value),
                    "description" => form.description = Some(value),
                    _ => form.tags = Some(value),
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Video record with its engagement counters.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    #[serde(flatten)]
    pub video: VideoRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u64>,
}

/// `GET /videos/:video_id`. Counts as a view.
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<VideoDetails>> {
    let video = find_video(&state, video_id).await?;
    let id = video.id.clone();

    // Counter trouble degrades the response, it does not fail it.
    let view_count = match state.engagement.record_view(&id).await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(video_id = %id, "Failed to record view: {}", e);
            None
        }
    };
    let like_count = state.engagement.count(&id, CounterKind::Likes).await.ok();
    let comment_count = state.engagement.count(&id, CounterKind::Comments).await.ok();

    Ok(Json(VideoDetails {
        video,
        view_count,
        like_count,
        comment_count,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub video_id: VideoId,
    pub like_count: u64,
    pub liked: bool,
}

/// `POST /videos/:video_id/like`
pub async fn like_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<LikeResponse>> {
    let video = find_video(&state, video_id).await?;
    let like_count = state.engagement.like(&video.id).await?;
    Ok(Json(LikeResponse {
        video_id: video.id,
        like_count,
        liked: true,
    }))
}

/// `DELETE /videos/:video_id/like`
pub async fn unlike_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<LikeResponse>> {
    let video = find_video(&state, video_id).await?;
    let like_count = state.engagement.unlike(&video.id).await?;
    Ok(Json(LikeResponse {
        video_id: video.id,
        like_count,
        liked: false,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResponse {
    pub video_id: VideoId,
    pub comment_count: u64,
}

/// `POST /videos/:video_id/comments`. Comment bodies are stored elsewhere;
/// this only bumps and broadcasts the count.
pub async fn comment_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<(StatusCode, Json<CommentResponse>)> {
    let video = find_video(&state, video_id).await?;
    let comment_count = state.engagement.comment(&video.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            video_id: video.id,
            comment_count,
        }),
    ))
}

async fn find_video(state: &AppState, video_id: String) -> ApiResult<VideoRecord> {
    let video_id = VideoId::from(video_id);
    if !video_id.is_path_safe() {
        return Err(ApiError::bad_request("invalid video id"));
    }
    state
        .videos
        .get(&video_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("video {video_id}")))
}
