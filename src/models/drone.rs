use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum DroneStatus {
    Idle,
    Delivering,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drone {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub status: DroneStatus,
    pub current_order: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}
