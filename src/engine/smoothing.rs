//! Accuracy weighted smoothing

use geo::geometry::Point;

use super::filter::round_coordinate;
use super::sample::LocationSample;

/// Fixes worse than this are never blended
pub const MAX_SMOOTHING_ACCURACY_M: f64 = 200.0;

/// Weight stand-in for samples that carry no accuracy
const ASSUMED_ACCURACY_M: f64 = 100.0;

fn weight(sample: &LocationSample) -> f64 {
    1.0 / sample
        .accuracy
        .unwrap_or(ASSUMED_ACCURACY_M)
        .clamp(1.0, MAX_SMOOTHING_ACCURACY_M)
}

/// Blend the current sample with the previous accepted one
///
/// Each side weighs `1 / clamp(accuracy, 1, 200)`, so a precise fix pulls
/// the result harder than a vague one. Latitude and longitude are averaged
/// independently and re-rounded to 6 decimals.
pub fn smooth(
    previous: Option<&LocationSample>,
    current: &LocationSample,
    enabled: bool,
) -> LocationSample {
    let previous = match previous {
        Some(p) if enabled => p,
        _ => return current.clone(),
    };

    if current.decision_accuracy() > MAX_SMOOTHING_ACCURACY_M {
        return current.clone();
    }

    let wp = weight(previous);
    let wc = weight(current);
    let total = wp + wc;

    let lat = (previous.latitude() * wp + current.latitude() * wc) / total;
    let lng = (previous.longitude() * wp + current.longitude() * wc) / total;

    LocationSample {
        coordinates: Point::new(round_coordinate(lng), round_coordinate(lat)),
        ..current.clone()
    }
}
