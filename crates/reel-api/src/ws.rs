//! Live engagement WebSocket.
//!
//! One connection follows one video. A writer task drains the connection's
//! broadcaster queue to the socket and pings on an interval; the read half
//! only watches for close.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::interval;
use tracing::{debug, info};

use reel_models::VideoId;

use crate::broadcast::Subscription;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveQuery {
    pub video_id: String,
}

/// `GET /ws?videoId=...`
pub async fn ws_live_query(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
) -> ApiResult<Response> {
    upgrade(ws, state, query.video_id)
}

/// `GET /videos/:video_id/live`
pub async fn ws_live_path(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Response> {
    upgrade(ws, state, video_id)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState, video_id: String) -> ApiResult<Response> {
    let video_id = VideoId::from(video_id);
    if !video_id.is_path_safe() {
        return Err(ApiError::bad_request("invalid video id"));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, video_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, video_id: VideoId) {
    let subscription = state.broadcaster.subscribe(&video_id);
    let connection_id = subscription.connection_id;
    metrics::record_ws_connection();
    info!(video_id = %video_id, connection_id = %connection_id, "Live connection opened");

    let (sender, mut receiver) = socket.split();
    let mut writer = tokio::spawn(write_loop(sender, subscription));

    loop {
        tokio::select! {
            _ = &mut writer => break,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, "WebSocket read error: {}", e);
                    break;
                }
            },
        }
    }

    writer.abort();
    state.broadcaster.unsubscribe(&video_id, connection_id);
    metrics::record_ws_disconnection();
    info!(video_id = %video_id, connection_id = %connection_id, "Live connection closed");
}

async fn write_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut subscription: Subscription,
) {
    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            payload = subscription.receiver.recv() => {
                // None: the broadcaster pruned this connection.
                let Some(payload) = payload else { break };
                if sender.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sender.close().await;
}
