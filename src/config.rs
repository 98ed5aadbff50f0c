use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::geo::geocoder::GeocoderConfig;
use crate::tracking::simulator::SimulationParams;
use crate::tracking::tracker::TrackerSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub geocoder_url: String,
    pub geocoder_country: String,
    pub geocoder_limit: u8,
    pub geocoder_retries: u32,
    pub geocoder_backoff_ms: u64,
    pub geocoder_user_agent: String,
    pub poll_interval_ms: u64,
    pub simulation_duration_secs: f64,
    pub arrival_threshold_km: f64,
    pub stale_after_minutes: i64,
    pub simulator_mode: bool,
    pub geocode_retry_after_secs: u64,
    pub finished_snapshot_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            geocoder_url: env::var("GEOCODER_URL")
                .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string()),
            geocoder_country: env::var("GEOCODER_COUNTRY").unwrap_or_else(|_| "vn".to_string()),
            geocoder_limit: parse_or_default("GEOCODER_LIMIT", 1)?,
            geocoder_retries: parse_or_default("GEOCODER_RETRIES", 3)?,
            geocoder_backoff_ms: parse_or_default("GEOCODER_BACKOFF_MS", 1000)?,
            geocoder_user_agent: env::var("GEOCODER_USER_AGENT").unwrap_or_else(|_| {
                format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
            }),
            poll_interval_ms: parse_or_default("POLL_INTERVAL_MS", 1000)?,
            simulation_duration_secs: parse_or_default("SIMULATION_DURATION_SECS", 60.0)?,
            arrival_threshold_km: parse_or_default("ARRIVAL_THRESHOLD_KM", 0.1)?,
            stale_after_minutes: parse_or_default("STALE_AFTER_MINUTES", 60)?,
            simulator_mode: parse_or_default("SIMULATOR_MODE", false)?,
            geocode_retry_after_secs: parse_or_default("GEOCODE_RETRY_AFTER_SECS", 30)?,
            finished_snapshot_limit: parse_or_default("FINISHED_SNAPSHOT_LIMIT", 256)?,
        };

        if config.simulation_duration_secs <= 0.0 {
            return Err(AppError::Internal(
                "SIMULATION_DURATION_SECS must be > 0".to_string(),
            ));
        }
        if config.poll_interval_ms == 0 {
            return Err(AppError::Internal("POLL_INTERVAL_MS must be > 0".to_string()));
        }

        Ok(config)
    }

    pub fn geocoder(&self) -> GeocoderConfig {
        GeocoderConfig {
            base_url: self.geocoder_url.clone(),
            country: self.geocoder_country.clone(),
            limit: self.geocoder_limit,
            retries: self.geocoder_retries,
            backoff: Duration::from_millis(self.geocoder_backoff_ms),
            user_agent: self.geocoder_user_agent.clone(),
        }
    }

    pub fn tracker(&self) -> TrackerSettings {
        TrackerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stale_after: chrono::Duration::minutes(self.stale_after_minutes),
            simulation: SimulationParams {
                duration_secs: self.simulation_duration_secs,
                arrival_threshold_km: self.arrival_threshold_km,
            },
            simulator_mode: self.simulator_mode,
            geocode_retry_after: Duration::from_secs(self.geocode_retry_after_secs),
            finished_snapshot_limit: self.finished_snapshot_limit,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
