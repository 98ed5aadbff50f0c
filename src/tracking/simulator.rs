use crate::geo::interpolate;
use crate::models::GeoPoint;

#[derive(Debug, Clone, Copy)]
pub struct SimulationParams {
    pub duration_secs: f64,
    pub arrival_threshold_km: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            duration_secs: 60.0,
            arrival_threshold_km: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub speed_km_per_sec: f64,
    pub traveled_km: f64,
    pub remaining_km: f64,
    pub travel_ratio: f64,
    pub arrived: bool,
}

impl Progress {
    pub fn position(&self, pickup: &GeoPoint, dropoff: &GeoPoint) -> GeoPoint {
        interpolate(pickup, dropoff, self.travel_ratio)
    }
}

pub fn simulate(total_km: f64, elapsed_secs: f64, params: &SimulationParams) -> Progress {
    let total_km = total_km.max(0.0);
    let elapsed_secs = elapsed_secs.max(0.0);

    let speed_km_per_sec = total_km / params.duration_secs;
    let traveled_km = elapsed_secs * speed_km_per_sec;
    let remaining_km = (total_km - traveled_km).max(0.0);

    let travel_ratio = if total_km > 0.0 {
        (traveled_km / total_km).clamp(0.0, 1.0)
    } else {
        1.0
    };

    Progress {
        speed_km_per_sec,
        traveled_km,
        remaining_km,
        travel_ratio,
        arrived: remaining_km < params.arrival_threshold_km,
    }
}
