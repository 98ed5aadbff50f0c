use chrono::{DateTime, Duration, Utc};

use crate::models::order::OrderStatus;

pub fn is_stale(
    status: OrderStatus,
    assigned_at: DateTime<Utc>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> bool {
    status == OrderStatus::Shipping && now - assigned_at > stale_after
}
