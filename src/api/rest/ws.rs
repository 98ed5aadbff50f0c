use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use crate::tracking::tracker::TrackingState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let rx = state.trackers.start(id)?;

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, id, rx))
        .into_response())
}

pub fn tracking_messages(rx: watch::Receiver<TrackingState>) -> impl Stream<Item = String> {
    WatchStream::new(rx).filter_map(|tracking| async move {
        match serde_json::to_string(&tracking) {
            Ok(json) => Some(json),
            Err(err) => {
                warn!(error = %err, "failed to serialize tracking state for ws");
                None
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, order_id: Uuid, rx: watch::Receiver<TrackingState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = Box::pin(tracking_messages(rx));

    info!(order_id = %order_id, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(json) = updates.next().await {
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(order_id = %order_id, "websocket client disconnected");
}
