use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::geo::geocoder::Geocoder;
use crate::geo::haversine_km;
use crate::models::assignment::DeliveryAssignment;
use crate::models::drone::DroneStatus;
use crate::models::order::{Order, OrderStatus};
use crate::models::GeoPoint;
use crate::observability::metrics::Metrics;
use crate::store::Store;
use crate::tracking::policy;
use crate::tracking::simulator::{simulate, SimulationParams};

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub poll_interval: Duration,
    pub stale_after: chrono::Duration,
    pub simulation: SimulationParams,
    pub simulator_mode: bool,
    pub geocode_retry_after: Duration,
    pub finished_snapshot_limit: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            stale_after: chrono::Duration::minutes(60),
            simulation: SimulationParams::default(),
            simulator_mode: false,
            geocode_retry_after: Duration::from_secs(30),
            finished_snapshot_limit: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackingState {
    pub order_id: Uuid,
    pub order_status: Option<OrderStatus>,
    pub remaining_km: Option<f64>,
    pub arrived: bool,
    pub position: Option<GeoPoint>,
    pub loading: bool,
    pub updated_at: DateTime<Utc>,
}

impl TrackingState {
    fn new(order_id: Uuid) -> Self {
        Self {
            order_id,
            order_status: None,
            remaining_km: None,
            arrived: false,
            position: None,
            loading: true,
            updated_at: Utc::now(),
        }
    }
}

enum Flow {
    Continue,
    Halt,
}

pub struct TrackerHandle {
    order_id: Uuid,
    state_rx: watch::Receiver<TrackingState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TrackerHandle {
    pub fn spawn(
        order_id: Uuid,
        store: Arc<Store>,
        geocoder: Geocoder,
        metrics: Metrics,
        settings: TrackerSettings,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(TrackingState::new(order_id));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let tracker = Tracker {
            order_id,
            store,
            geocoder,
            metrics,
            settings,
            pickup: None,
            dropoff: None,
            geocode_after: None,
            drone_released: false,
            state_tx,
        };
        let task = tokio::spawn(tracker.run(shutdown_rx));

        Self {
            order_id,
            state_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn snapshot(&self) -> TrackingState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackingState> {
        self.state_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    pub async fn stop(mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(order_id = %self.order_id, error = %err, "tracker task failed");
            }
        }
    }

    pub async fn finished(&mut self) {
        if let Some(task) = self.task.as_mut() {
            let _ = task.await;
            self.task = None;
        }
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

struct Tracker {
    order_id: Uuid,
    store: Arc<Store>,
    geocoder: Geocoder,
    metrics: Metrics,
    settings: TrackerSettings,
    pickup: Option<GeoPoint>,
    dropoff: Option<GeoPoint>,
    geocode_after: Option<Instant>,
    drone_released: bool,
    state_tx: watch::Sender<TrackingState>,
}

impl Tracker {
    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        self.metrics.active_trackers.inc();
        info!(order_id = %self.order_id, "tracker started");

        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut changes = self.store.subscribe(self.order_id);
        let mut notifications_open = true;

        // Both the timer and change notifications feed the same refresh.
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {}
                change = changes.next(), if notifications_open => {
                    match change {
                        Some(order) => debug!(order_id = %order.id, status = ?order.status, "order changed"),
                        None => {
                            notifications_open = false;
                            continue;
                        }
                    }
                }
            }

            let flow = tokio::select! {
                flow = self.refresh() => flow,
                _ = &mut shutdown_rx => break,
            };

            if let Flow::Halt = flow {
                break;
            }
        }

        self.metrics.active_trackers.dec();
        info!(order_id = %self.order_id, "tracker stopped");
    }

    async fn refresh(&mut self) -> Flow {
        let start = Instant::now();
        let (flow, outcome) = self.recompute().await;

        self.state_tx.send_modify(|state| state.loading = false);

        self.metrics
            .refresh_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .tracker_refreshes_total
            .with_label_values(&[outcome])
            .inc();

        flow
    }

    async fn recompute(&mut self) -> (Flow, &'static str) {
        let Some(order) = self.store.order(self.order_id) else {
            warn!(order_id = %self.order_id, "tracked order not found");
            return (Flow::Continue, "unavailable");
        };

        let now = Utc::now();
        self.state_tx.send_modify(|state| {
            state.order_status = Some(order.status);
            state.updated_at = now;
        });

        if order.status.is_terminal() {
            info!(order_id = %order.id, status = ?order.status, "order is final; tracking halted");
            return (Flow::Halt, "terminal");
        }

        if order.status != OrderStatus::Shipping {
            return (Flow::Continue, "idle");
        }

        let Some(assignment) = self.store.assignment(order.id) else {
            warn!(order_id = %order.id, "shipping order has no delivery assignment");
            return (Flow::Continue, "unavailable");
        };

        if policy::is_stale(
            order.status,
            assignment.assigned_at,
            now,
            self.settings.stale_after,
        ) {
            self.auto_fail(&assignment);
            return (Flow::Halt, "auto_failed");
        }

        let Some((pickup, dropoff)) = self.endpoints(&order, &assignment).await else {
            return (Flow::Continue, "unavailable");
        };

        let total_km = haversine_km(&pickup, &dropoff);
        let elapsed_secs = (now - assignment.assigned_at).num_milliseconds() as f64 / 1_000.0;
        let progress = simulate(total_km, elapsed_secs, &self.settings.simulation);
        let position = progress.position(&pickup, &dropoff);

        self.state_tx.send_modify(|state| {
            state.remaining_km = Some(progress.remaining_km);
            state.arrived = progress.arrived;
            state.position = Some(position);
            state.updated_at = now;
        });

        debug!(
            order_id = %order.id,
            remaining_km = progress.remaining_km,
            ratio = progress.travel_ratio,
            arrived = progress.arrived,
            "delivery progress"
        );

        if self.settings.simulator_mode {
            let status = if progress.arrived {
                DroneStatus::Idle
            } else {
                DroneStatus::Delivering
            };
            self.move_drone(assignment.drone_id, position, status);
        }

        (Flow::Continue, "updated")
    }

    // Fire-and-forget: a failed write is logged and tracking halts anyway.
    fn auto_fail(&mut self, assignment: &DeliveryAssignment) {
        match self.store.transition_order_if(
            self.order_id,
            OrderStatus::Shipping,
            OrderStatus::Failed,
        ) {
            Ok(order) => {
                self.metrics.deliveries_auto_failed_total.inc();
                warn!(
                    order_id = %order.id,
                    assigned_at = %assignment.assigned_at,
                    "delivery stalled; order marked failed"
                );
                self.state_tx.send_modify(|state| {
                    state.order_status = Some(order.status);
                    state.updated_at = Utc::now();
                });
            }
            Err(err) => {
                warn!(order_id = %self.order_id, error = %err, "failed to mark stalled order as failed");
            }
        }

        if self.settings.simulator_mode {
            if let Some(drone) = self.store.drone(assignment.drone_id) {
                self.move_drone(drone.id, drone.location, DroneStatus::Idle);
            }
        }
    }

    // Once the drone is idle or serving another order this tracker no longer
    // writes it.
    fn move_drone(&mut self, drone_id: Uuid, position: GeoPoint, status: DroneStatus) {
        if self.drone_released {
            return;
        }

        match self
            .store
            .move_drone_for_order(drone_id, self.order_id, position, status)
        {
            Ok(drone) if drone.status == DroneStatus::Idle => {
                debug!(order_id = %self.order_id, drone_id = %drone_id, "drone released");
                self.drone_released = true;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(order_id = %self.order_id, drone_id = %drone_id, error = %err, "drone no longer writable for this order");
                self.drone_released = true;
            }
        }
    }

    async fn endpoints(
        &mut self,
        order: &Order,
        assignment: &DeliveryAssignment,
    ) -> Option<(GeoPoint, GeoPoint)> {
        self.pickup = self.pickup.or(assignment.pickup);
        self.dropoff = self.dropoff.or(assignment.dropoff);

        if let (Some(pickup), Some(dropoff)) = (self.pickup, self.dropoff) {
            return Some((pickup, dropoff));
        }

        if self.geocode_after.is_some_and(|at| Instant::now() < at) {
            return None;
        }

        if self.pickup.is_none() {
            self.pickup = match self.store.merchant(order.merchant_id) {
                Some(merchant) => self.geocoder.geocode(&merchant.address).await,
                None => {
                    warn!(order_id = %order.id, merchant_id = %order.merchant_id, "merchant not found");
                    None
                }
            };
        }

        if self.dropoff.is_none() {
            self.dropoff = self.geocoder.geocode(&order.delivery_address).await;
        }

        match (self.pickup, self.dropoff) {
            (Some(pickup), Some(dropoff)) => {
                self.geocode_after = None;
                Some((pickup, dropoff))
            }
            _ => {
                warn!(
                    order_id = %order.id,
                    pickup = self.pickup.is_some(),
                    dropoff = self.dropoff.is_some(),
                    retry_after_secs = self.settings.geocode_retry_after.as_secs(),
                    "delivery coordinates unavailable"
                );
                self.geocode_after = Some(Instant::now() + self.settings.geocode_retry_after);
                None
            }
        }
    }
}
