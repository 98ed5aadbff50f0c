use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::fleet::validate_point;
use crate::error::AppError;
use crate::models::assignment::DeliveryAssignment;
use crate::models::order::{Order, OrderStatus};
use crate::models::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_order_status))
        .route("/orders/:id/assignment", post(assign_drone).get(get_assignment))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub merchant_id: Uuid,
    pub delivery_address: String,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Deserialize)]
pub struct AssignDroneRequest {
    pub drone_id: Uuid,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.delivery_address.trim().is_empty() {
        return Err(AppError::BadRequest(
            "delivery_address cannot be empty".to_string(),
        ));
    }
    if state.store.merchant(payload.merchant_id).is_none() {
        return Err(AppError::NotFound(format!(
            "merchant {} not found",
            payload.merchant_id
        )));
    }

    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        merchant_id: payload.merchant_id,
        delivery_address: payload.delivery_address,
        status: OrderStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    state.store.insert_order(order.clone());
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .store
        .order(id)
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(order))
}

async fn update_order_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.status == OrderStatus::Shipping {
        return Err(AppError::BadRequest(
            "orders start shipping through a drone assignment".to_string(),
        ));
    }

    let order = state.store.update_order_status(id, payload.status)?;
    Ok(Json(order))
}

async fn assign_drone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignDroneRequest>,
) -> Result<Json<DeliveryAssignment>, AppError> {
    for point in [payload.pickup.as_ref(), payload.dropoff.as_ref()]
        .into_iter()
        .flatten()
    {
        validate_point(point)?;
    }

    let assignment = DeliveryAssignment {
        order_id: id,
        drone_id: payload.drone_id,
        assigned_at: Utc::now(),
        pickup: payload.pickup,
        dropoff: payload.dropoff,
    };

    state.store.assign(assignment.clone())?;
    Ok(Json(assignment))
}

async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryAssignment>, AppError> {
    let assignment = state
        .store
        .assignment(id)
        .ok_or_else(|| AppError::NotFound(format!("order {} has no assignment", id)))?;

    Ok(Json(assignment))
}
