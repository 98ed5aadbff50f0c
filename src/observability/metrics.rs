use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub tracker_refreshes_total: IntCounterVec,
    pub refresh_latency_seconds: HistogramVec,
    pub geocode_requests_total: IntCounterVec,
    pub deliveries_auto_failed_total: IntCounter,
    pub active_trackers: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let tracker_refreshes_total = IntCounterVec::new(
            Opts::new("tracker_refreshes_total", "Tracker refresh cycles by outcome"),
            &["outcome"],
        )
        .expect("valid tracker_refreshes_total metric");

        let refresh_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "refresh_latency_seconds",
                "Latency of a tracker refresh cycle in seconds",
            ),
            &["outcome"],
        )
        .expect("valid refresh_latency_seconds metric");

        let geocode_requests_total = IntCounterVec::new(
            Opts::new("geocode_requests_total", "Geocoding requests by outcome"),
            &["outcome"],
        )
        .expect("valid geocode_requests_total metric");

        let deliveries_auto_failed_total = IntCounter::new(
            "deliveries_auto_failed_total",
            "Shipping orders force-failed after stalling",
        )
        .expect("valid deliveries_auto_failed_total metric");

        let active_trackers = IntGauge::new("active_trackers", "Currently running order trackers")
            .expect("valid active_trackers metric");

        registry
            .register(Box::new(tracker_refreshes_total.clone()))
            .expect("register tracker_refreshes_total");
        registry
            .register(Box::new(refresh_latency_seconds.clone()))
            .expect("register refresh_latency_seconds");
        registry
            .register(Box::new(geocode_requests_total.clone()))
            .expect("register geocode_requests_total");
        registry
            .register(Box::new(deliveries_auto_failed_total.clone()))
            .expect("register deliveries_auto_failed_total");
        registry
            .register(Box::new(active_trackers.clone()))
            .expect("register active_trackers");

        Self {
            registry,
            tracker_refreshes_total,
            refresh_latency_seconds,
            geocode_requests_total,
            deliveries_auto_failed_total,
            active_trackers,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
