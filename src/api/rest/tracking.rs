use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::api::rest::ws;
use crate::error::AppError;
use crate::state::AppState;
use crate::tracking::tracker::TrackingState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/orders/:id/tracking",
            get(get_tracking).post(start_tracking).delete(stop_tracking),
        )
        .route("/orders/:id/tracking/ws", get(ws::ws_handler))
}

async fn start_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingState>, AppError> {
    let rx = state.trackers.start(id)?;
    let tracking = rx.borrow().clone();
    Ok(Json(tracking))
}

async fn get_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingState>, AppError> {
    let tracking = state
        .trackers
        .snapshot(id)
        .ok_or_else(|| AppError::NotFound(format!("order {} is not being tracked", id)))?;

    Ok(Json(tracking))
}

async fn stop_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.trackers.stop(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!(
            "order {} is not being tracked",
            id
        )))
    }
}
