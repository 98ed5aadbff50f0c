use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAssignment {
    pub order_id: Uuid,
    pub drone_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
}
