use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::drone::{Drone, DroneStatus};
use crate::models::merchant::Merchant;
use crate::models::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/merchants", post(create_merchant).get(list_merchants))
        .route("/drones", post(create_drone).get(list_drones))
}

#[derive(Deserialize)]
pub struct CreateMerchantRequest {
    pub name: String,
    pub address: String,
}

#[derive(Deserialize)]
pub struct CreateDroneRequest {
    pub name: String,
    pub location: GeoPoint,
}

async fn create_merchant(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateMerchantRequest>,
) -> Result<Json<Merchant>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if payload.address.trim().is_empty() {
        return Err(AppError::BadRequest("address cannot be empty".to_string()));
    }

    let merchant = Merchant {
        id: Uuid::new_v4(),
        name: payload.name,
        address: payload.address,
    };

    state.store.insert_merchant(merchant.clone());
    Ok(Json(merchant))
}

async fn list_merchants(State(state): State<Arc<AppState>>) -> Json<Vec<Merchant>> {
    Json(state.store.merchants())
}

async fn create_drone(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDroneRequest>,
) -> Result<Json<Drone>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    validate_point(&payload.location)?;

    let drone = Drone {
        id: Uuid::new_v4(),
        name: payload.name,
        location: payload.location,
        status: DroneStatus::Idle,
        current_order: None,
        updated_at: Utc::now(),
    };

    state.store.insert_drone(drone.clone());
    Ok(Json(drone))
}

async fn list_drones(State(state): State<Arc<AppState>>) -> Json<Vec<Drone>> {
    Json(state.store.drones())
}

pub(crate) fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lng) {
        return Err(AppError::BadRequest(format!(
            "coordinates out of range: {}, {}",
            point.lat, point.lng
        )));
    }
    Ok(())
}
