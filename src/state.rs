use std::sync::Arc;

use crate::error::AppError;
use crate::geo::geocoder::{Geocoder, GeocoderConfig};
use crate::observability::metrics::Metrics;
use crate::store::Store;
use crate::tracking::registry::TrackerRegistry;
use crate::tracking::tracker::TrackerSettings;

pub struct AppState {
    pub store: Arc<Store>,
    pub trackers: TrackerRegistry,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        event_buffer_size: usize,
        geocoder: GeocoderConfig,
        settings: TrackerSettings,
    ) -> Result<Self, AppError> {
        let metrics = Metrics::new();
        let store = Arc::new(Store::new(event_buffer_size));
        let geocoder = Geocoder::new(geocoder, metrics.clone())?;
        let trackers = TrackerRegistry::new(store.clone(), geocoder, metrics.clone(), settings);

        Ok(Self {
            store,
            trackers,
            metrics,
        })
    }
}
