//! Raw sample validation and correction

use geo::geometry::Point;
use tracing::debug;

use super::sample::{LocationSample, RawSample};

/// Round to 6 decimal places, about 0.11m at the equator
pub fn round_coordinate(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Sanitize a raw reading
///
/// Garbage fixes are routine, so rejection is a `None`, not an error.
pub fn filter(raw: &RawSample) -> Option<LocationSample> {
    let mut lat = raw.latitude;
    let mut lng = raw.longitude;

    if !lat.is_finite() || !lng.is_finite() {
        debug!(lat, lng, "dropping non finite sample");
        return None;
    }

    // (0, 0) is what sources report when they have no fix
    if lat == 0.0 && lng == 0.0 {
        debug!("dropping zero sentinel sample");
        return None;
    }

    // Some sources hand us the fields in the wrong order
    if lat.abs() > 90.0 && lng.abs() <= 90.0 {
        debug!(lat, lng, "swapping latitude and longitude");
        std::mem::swap(&mut lat, &mut lng);
    }

    let lat = round_coordinate(lat.clamp(-90.0, 90.0));
    let lng = round_coordinate(lng.clamp(-180.0, 180.0));

    Some(LocationSample {
        coordinates: Point::new(lng, lat),
        accuracy: raw.accuracy,
        speed: raw.speed,
        heading: raw.heading,
        captured_at: raw.captured_at,
    })
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn raw(lat: f64, lng: f64) -> RawSample {
        RawSample::basic(lat, lng, datetime!(2024-03-01 8:00 UTC))
    }

    #[test]
    fn keeps_valid_samples() -> Result<(), String> {
        let mut input = raw(36.7538, 3.0588).with_accuracy(12.0);
        input.speed = Some(8.5);
        input.heading = Some(271.0);

        let sample = filter(&input).ok_or("sample rejected")?;
        assert_eq!(36.7538, sample.latitude());
        assert_eq!(3.0588, sample.longitude());
        assert_eq!(Some(12.0), sample.accuracy);
        assert_eq!(Some(8.5), sample.speed);
        assert_eq!(Some(271.0), sample.heading);
        assert_eq!(input.captured_at, sample.captured_at);

        Ok(())
    }

    #[test]
    fn rejects_zero_sentinel() {
        assert_eq!(None, filter(&raw(0.0, 0.0)));
        assert_eq!(None, filter(&raw(0.0, 0.0).with_accuracy(3.0)));
        assert_eq!(None, filter(&raw(-0.0, 0.0)));
    }

    #[test]
    fn rejects_non_finite() {
        assert_eq!(None, filter(&raw(f64::NAN, 3.0)));
        assert_eq!(None, filter(&raw(36.0, f64::INFINITY)));
        assert_eq!(None, filter(&raw(f64::NEG_INFINITY, f64::NAN)));
    }

    #[test]
    fn keeps_single_zero_axis() -> Result<(), String> {
        let sample = filter(&raw(0.0, 3.05)).ok_or("equator rejected")?;
        assert_eq!(0.0, sample.latitude());
        assert_eq!(3.05, sample.longitude());

        Ok(())
    }

    #[test]
    fn swaps_axes() -> Result<(), String> {
        let sample = filter(&raw(120.0, 45.0)).ok_or("sample rejected")?;
        assert_eq!(45.0, sample.latitude());
        assert_eq!(120.0, sample.longitude());

        let sample = filter(&raw(-170.5, -12.25)).ok_or("sample rejected")?;
        assert_eq!(-12.25, sample.latitude());
        assert_eq!(-170.5, sample.longitude());

        Ok(())
    }

    #[test]
    fn clamps_out_of_range() -> Result<(), String> {
        // both axes out of range: no swap, just clamp
        let sample = filter(&raw(95.0, 200.0)).ok_or("sample rejected")?;
        assert_eq!(90.0, sample.latitude());
        assert_eq!(180.0, sample.longitude());

        let sample = filter(&raw(-91.0, -181.0)).ok_or("sample rejected")?;
        assert_eq!(-90.0, sample.latitude());
        assert_eq!(-180.0, sample.longitude());

        // swap first, then the new longitude is clamped
        let sample = filter(&raw(250.0, 10.0)).ok_or("sample rejected")?;
        assert_eq!(10.0, sample.latitude());
        assert_eq!(180.0, sample.longitude());

        Ok(())
    }

    #[test]
    fn range_holds_for_any_finite_input() {
        let values = [-1e9, -400.0, -180.5, -90.5, -45.0, 0.0, 1e-9, 45.0, 90.5, 180.5, 400.0, 1e9];

        for lat in values {
            for lng in values {
                if let Some(sample) = filter(&raw(lat, lng)) {
                    assert!((-90.0..=90.0).contains(&sample.latitude()), "{} {}", lat, lng);
                    assert!((-180.0..=180.0).contains(&sample.longitude()), "{} {}", lat, lng);
                }
            }
        }
    }

    #[test]
    fn rounds_to_six_decimals() -> Result<(), String> {
        let sample = filter(&raw(36.123456789, 3.987654321)).ok_or("sample rejected")?;
        assert_eq!(36.123457, sample.latitude());
        assert_eq!(3.987654, sample.longitude());
        assert_eq!(sample.latitude(), round_coordinate(sample.latitude()));

        Ok(())
    }
}
