use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipping,
    Completed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, next) {
            (Pending, Confirmed | Shipping | Cancelled | Failed) => true,
            (Confirmed, Shipping | Cancelled | Failed) => true,
            (Shipping, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub delivery_address: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
