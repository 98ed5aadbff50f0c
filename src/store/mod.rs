use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::DeliveryAssignment;
use crate::models::drone::{Drone, DroneStatus};
use crate::models::merchant::Merchant;
use crate::models::order::{Order, OrderStatus};
use crate::models::GeoPoint;

pub struct Store {
    orders: DashMap<Uuid, Order>,
    assignments: DashMap<Uuid, DeliveryAssignment>,
    merchants: DashMap<Uuid, Merchant>,
    drones: DashMap<Uuid, Drone>,
    order_events_tx: broadcast::Sender<Order>,
}

impl Store {
    pub fn new(event_buffer_size: usize) -> Self {
        let (order_events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            orders: DashMap::new(),
            assignments: DashMap::new(),
            merchants: DashMap::new(),
            drones: DashMap::new(),
            order_events_tx,
        }
    }

    pub fn insert_merchant(&self, merchant: Merchant) {
        self.merchants.insert(merchant.id, merchant);
    }

    pub fn merchant(&self, id: Uuid) -> Option<Merchant> {
        self.merchants.get(&id).map(|entry| entry.value().clone())
    }

    pub fn merchants(&self) -> Vec<Merchant> {
        self.merchants
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn insert_drone(&self, drone: Drone) {
        self.drones.insert(drone.id, drone);
    }

    pub fn drone(&self, id: Uuid) -> Option<Drone> {
        self.drones.get(&id).map(|entry| entry.value().clone())
    }

    pub fn drones(&self) -> Vec<Drone> {
        self.drones.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn move_drone_for_order(
        &self,
        drone_id: Uuid,
        order_id: Uuid,
        location: GeoPoint,
        status: DroneStatus,
    ) -> Result<Drone, AppError> {
        let mut drone = self
            .drones
            .get_mut(&drone_id)
            .ok_or_else(|| AppError::NotFound(format!("drone {drone_id} not found")))?;

        if drone.current_order != Some(order_id) {
            return Err(AppError::Conflict(format!(
                "drone {drone_id} is no longer assigned to order {order_id}"
            )));
        }

        drone.location = location;
        drone.status = status;
        if status == DroneStatus::Idle {
            drone.current_order = None;
        }
        drone.updated_at = Utc::now();

        Ok(drone.clone())
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.insert(order.id, order.clone());
        self.publish(order);
    }

    pub fn order(&self, id: Uuid) -> Option<Order> {
        self.orders.get(&id).map(|entry| entry.value().clone())
    }

    pub fn update_order_status(&self, id: Uuid, next: OrderStatus) -> Result<Order, AppError> {
        let updated = {
            let mut order = self
                .orders
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

            if !order.status.can_transition_to(next) {
                return Err(AppError::Conflict(format!(
                    "order {id} cannot move from {:?} to {:?}",
                    order.status, next
                )));
            }

            order.status = next;
            order.updated_at = Utc::now();
            order.clone()
        };

        self.publish(updated.clone());
        Ok(updated)
    }

    pub fn transition_order_if(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order, AppError> {
        let updated = {
            let mut order = self
                .orders
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

            if order.status != expected {
                return Err(AppError::Conflict(format!(
                    "order {id} is {:?}, expected {:?}",
                    order.status, expected
                )));
            }

            order.status = next;
            order.updated_at = Utc::now();
            order.clone()
        };

        self.publish(updated.clone());
        Ok(updated)
    }

    pub fn assign(&self, assignment: DeliveryAssignment) -> Result<Order, AppError> {
        let updated = {
            // Drone entry stays locked until the assignment is recorded.
            let mut drone = self
                .drones
                .get_mut(&assignment.drone_id)
                .ok_or_else(|| {
                    AppError::NotFound(format!("drone {} not found", assignment.drone_id))
                })?;

            if drone.status != DroneStatus::Idle {
                return Err(AppError::Conflict(format!("drone {} is busy", drone.id)));
            }

            let order = {
                let mut order = self.orders.get_mut(&assignment.order_id).ok_or_else(|| {
                    AppError::NotFound(format!("order {} not found", assignment.order_id))
                })?;

                if !order.status.can_transition_to(OrderStatus::Shipping) {
                    return Err(AppError::Conflict(format!(
                        "order {} cannot move from {:?} to Shipping",
                        order.id, order.status
                    )));
                }

                order.status = OrderStatus::Shipping;
                order.updated_at = Utc::now();
                order.clone()
            };

            drone.location = assignment.pickup.unwrap_or(drone.location);
            drone.status = DroneStatus::Delivering;
            drone.current_order = Some(order.id);
            drone.updated_at = Utc::now();

            self.assignments.insert(order.id, assignment);
            order
        };

        debug!(order_id = %updated.id, "delivery assigned");
        self.publish(updated.clone());
        Ok(updated)
    }

    pub fn assignment(&self, order_id: Uuid) -> Option<DeliveryAssignment> {
        self.assignments
            .get(&order_id)
            .map(|entry| entry.value().clone())
    }

    pub fn insert_assignment(&self, assignment: DeliveryAssignment) {
        self.assignments.insert(assignment.order_id, assignment);
    }

    pub fn subscribe(&self, order_id: Uuid) -> OrderSubscription {
        OrderSubscription {
            order_id,
            rx: self.order_events_tx.subscribe(),
        }
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn drone_count(&self) -> usize {
        self.drones.len()
    }

    pub fn merchant_count(&self) -> usize {
        self.merchants.len()
    }

    fn publish(&self, order: Order) {
        let _ = self.order_events_tx.send(order);
    }
}

pub struct OrderSubscription {
    order_id: Uuid,
    rx: broadcast::Receiver<Order>,
}

impl OrderSubscription {
    pub async fn next(&mut self) -> Option<Order> {
        loop {
            match self.rx.recv().await {
                Ok(order) if order.id == self.order_id => return Some(order),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    // Missed changes are picked up by the next poll.
                    warn!(order_id = %self.order_id, skipped, "order subscription lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
