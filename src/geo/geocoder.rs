use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::GeoPoint;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub country: String,
    pub limit: u8,
    pub retries: u32,
    pub backoff: Duration,
    pub user_agent: String,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            country: "vn".to_string(),
            limit: 1,
            retries: 3,
            backoff: Duration::from_secs(1),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Error)]
enum SearchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid coordinate {value:?}: {source}")]
    Coordinate {
        value: String,
        source: std::num::ParseFloatError,
    },
}

// Nominatim-style `/search` result.
#[derive(Debug, Deserialize)]
struct Candidate {
    lat: String,
    lon: String,
}

#[derive(Clone)]
pub struct Geocoder {
    client: reqwest::Client,
    config: GeocoderConfig,
    metrics: Metrics,
}

impl Geocoder {
    pub fn new(config: GeocoderConfig, metrics: Metrics) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            config,
            metrics,
        })
    }

    pub async fn geocode(&self, address: &str) -> Option<GeoPoint> {
        self.geocode_address(address, self.config.retries).await
    }

    // Each retry, simplified query or backoff after an error, spends one unit
    // of `retries`. Never fails: `None` means coordinates are unavailable.
    pub async fn geocode_address(&self, address: &str, retries: u32) -> Option<GeoPoint> {
        let mut query = address.trim().to_string();
        let mut remaining = retries;

        loop {
            match self.search(&query).await {
                Ok(Some(point)) => {
                    self.metrics
                        .geocode_requests_total
                        .with_label_values(&["hit"])
                        .inc();
                    debug!(query = %query, lat = point.lat, lng = point.lng, "address geocoded");
                    return Some(point);
                }
                Ok(None) => {
                    self.metrics
                        .geocode_requests_total
                        .with_label_values(&["miss"])
                        .inc();

                    match simplify_address(&query) {
                        Some(simplified) if remaining > 0 => {
                            debug!(query = %query, simplified = %simplified, "no match; retrying with simplified address");
                            query = simplified.to_string();
                            remaining -= 1;
                        }
                        _ => {
                            warn!(address = %address, "no geocoding match");
                            return None;
                        }
                    }
                }
                Err(err) => {
                    self.metrics
                        .geocode_requests_total
                        .with_label_values(&["error"])
                        .inc();

                    if remaining == 0 {
                        warn!(address = %address, error = %err, "geocoding retries exhausted");
                        return None;
                    }

                    warn!(query = %query, error = %err, remaining, "geocoding request failed; backing off");
                    remaining -= 1;
                    sleep(self.config.backoff).await;
                }
            }
        }
    }

    async fn search(&self, query: &str) -> Result<Option<GeoPoint>, SearchError> {
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let limit = self.config.limit.max(1).to_string();

        let candidates: Vec<Candidate> = self
            .client
            .get(&url)
            .query(&[
                ("format", "json"),
                ("q", query),
                ("countrycodes", self.config.country.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(first) = candidates.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(GeoPoint {
            lat: parse_coordinate(first.lat)?,
            lng: parse_coordinate(first.lon)?,
        }))
    }
}

fn parse_coordinate(value: String) -> Result<f64, SearchError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|source| SearchError::Coordinate { value, source })
}

fn simplify_address(address: &str) -> Option<&str> {
    let head = address.split(',').next()?.trim();
    if head.is_empty() || head == address.trim() {
        None
    } else {
        Some(head)
    }
}
