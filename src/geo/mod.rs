pub mod geocoder;

use crate::models::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    // Rounding can push the term marginally above 1 for antipodal points.
    let central_angle = 2.0 * haversine.min(1.0).sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

pub fn interpolate(from: &GeoPoint, to: &GeoPoint, ratio: f64) -> GeoPoint {
    let t = ratio.clamp(0.0, 1.0);

    GeoPoint {
        lat: from.lat + (to.lat - from.lat) * t,
        lng: from.lng + (to.lng - from.lng) * t,
    }
}
