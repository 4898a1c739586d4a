//! Great-circle distance and naive ETA helpers

use geo::geometry::Point;

/// Mean Earth radius used by every distance in the crate
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Speed assumed by ETA estimates when the caller has nothing better
pub const DEFAULT_ASSUMED_SPEED_KMH: f64 = 30.0;

/// Haversine distance in kilometers between two coordinates in degrees
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();

    let half_lat = (dlat / 2.0).sin();
    let half_lng = (dlng / 2.0).sin();

    let a = half_lat * half_lat
        + lat1.to_radians().cos() * lat2.to_radians().cos() * half_lng * half_lng;
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Distance in meters between two points (x = lng, y = lat)
pub fn distance_m(from: &Point, to: &Point) -> f64 {
    haversine_km(from.y(), from.x(), to.y(), to.x()) * 1000.0
}

/// Linear ETA in whole minutes at a constant speed
///
/// Returns `None` when the speed is not a positive number.
pub fn estimate_eta_minutes(distance_km: f64, assumed_speed_kmh: f64) -> Option<u32> {
    if assumed_speed_kmh.is_nan() || assumed_speed_kmh <= 0.0 || !distance_km.is_finite() {
        return None;
    }

    Some((distance_km.max(0.0) / assumed_speed_kmh * 60.0).round() as u32)
}
