use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::geocoder::Geocoder;
use crate::observability::metrics::Metrics;
use crate::store::Store;
use crate::tracking::tracker::{TrackerHandle, TrackerSettings, TrackingState};

struct Tracked {
    generation: u64,
    handle: TrackerHandle,
}

pub struct TrackerRegistry {
    trackers: Arc<DashMap<Uuid, Tracked>>,
    finished: Arc<Mutex<VecDeque<TrackingState>>>,
    next_generation: AtomicU64,
    store: Arc<Store>,
    geocoder: Geocoder,
    metrics: Metrics,
    settings: TrackerSettings,
}

impl TrackerRegistry {
    pub fn new(
        store: Arc<Store>,
        geocoder: Geocoder,
        metrics: Metrics,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            trackers: Arc::new(DashMap::new()),
            finished: Arc::new(Mutex::new(VecDeque::new())),
            next_generation: AtomicU64::new(0),
            store,
            geocoder,
            metrics,
            settings,
        }
    }

    pub fn start(&self, order_id: Uuid) -> Result<watch::Receiver<TrackingState>, AppError> {
        if self.store.order(order_id).is_none() {
            return Err(AppError::NotFound(format!("order {order_id} not found")));
        }

        forget(&self.finished, order_id);

        let rx = match self.trackers.entry(order_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().handle.is_finished() {
                    entry.insert(self.spawn(order_id));
                }
                entry.get().handle.subscribe()
            }
            Entry::Vacant(entry) => entry.insert(self.spawn(order_id)).handle.subscribe(),
        };

        Ok(rx)
    }

    pub fn snapshot(&self, order_id: Uuid) -> Option<TrackingState> {
        if let Some(tracked) = self.trackers.get(&order_id) {
            return Some(tracked.handle.snapshot());
        }

        lock(&self.finished)
            .iter()
            .rev()
            .find(|state| state.order_id == order_id)
            .cloned()
    }

    pub async fn stop(&self, order_id: Uuid) -> bool {
        match self.trackers.remove(&order_id) {
            Some((_, tracked)) => {
                tracked.handle.stop().await;
                info!(order_id = %order_id, "tracking stopped on request");
                true
            }
            None => forget(&self.finished, order_id),
        }
    }

    pub fn active(&self) -> usize {
        self.trackers
            .iter()
            .filter(|entry| !entry.handle.is_finished())
            .count()
    }

    pub fn tracked(&self) -> usize {
        self.trackers.len()
    }

    fn spawn(&self, order_id: Uuid) -> Tracked {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handle = TrackerHandle::spawn(
            order_id,
            self.store.clone(),
            self.geocoder.clone(),
            self.metrics.clone(),
            self.settings.clone(),
        );

        let mut rx = handle.subscribe();
        let trackers = self.trackers.clone();
        let finished = self.finished.clone();
        let limit = self.settings.finished_snapshot_limit;

        // The state channel closes when the tracker task ends.
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {}
            let last = rx.borrow().clone();

            let removed = trackers
                .remove_if(&order_id, |_, tracked| tracked.generation == generation)
                .is_some();
            if removed {
                remember(&finished, limit, last);
                debug!(order_id = %order_id, "halted tracker released");
            }
        });

        Tracked { generation, handle }
    }
}

fn lock(finished: &Mutex<VecDeque<TrackingState>>) -> std::sync::MutexGuard<'_, VecDeque<TrackingState>> {
    finished.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn remember(finished: &Mutex<VecDeque<TrackingState>>, limit: usize, state: TrackingState) {
    if limit == 0 {
        return;
    }

    let mut history = lock(finished);
    history.retain(|kept| kept.order_id != state.order_id);
    history.push_back(state);
    while history.len() > limit {
        history.pop_front();
    }
}

fn forget(finished: &Mutex<VecDeque<TrackingState>>, order_id: Uuid) -> bool {
    let mut history = lock(finished);
    let before = history.len();
    history.retain(|kept| kept.order_id != order_id);
    history.len() != before
}
