//! Location sample definitions

use std::fmt;
use std::str::FromStr;

use geo::geometry::Point;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Accuracy assumed for gating decisions when the source did not report one
pub const UNKNOWN_ACCURACY_M: f64 = 9999.0;

/// Who is being tracked
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectRole {
    Driver,
    Passenger,
}

impl SubjectRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectRole::Driver => "driver",
            SubjectRole::Passenger => "passenger",
        }
    }
}

impl fmt::Display for SubjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "driver" => Ok(SubjectRole::Driver),
            "passenger" => Ok(SubjectRole::Passenger),
            other => Err(format!("Unknown role `{}`, expected driver or passenger", other)),
        }
    }
}

/// Reading exactly as the position source delivered it
#[derive(Clone, Debug, PartialEq)]
pub struct RawSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub captured_at: OffsetDateTime,
}

impl RawSample {
    pub fn basic(latitude: f64, longitude: f64, captured_at: OffsetDateTime) -> Self {
        Self {
            latitude,
            longitude,
            captured_at,
            accuracy: None,
            speed: None,
            heading: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);

        self
    }
}

/// Sanitized reading, safe to smooth and persist
#[derive(Clone, Debug, PartialEq)]
pub struct LocationSample {
    /// x = longitude, y = latitude
    pub coordinates: Point,
    /// Meters, `None` when the source did not say
    pub accuracy: Option<f64>,
    /// Meters per second
    pub speed: Option<f64>,
    /// Degrees
    pub heading: Option<f64>,
    pub captured_at: OffsetDateTime,
}

impl LocationSample {
    pub fn latitude(&self) -> f64 {
        self.coordinates.y()
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates.x()
    }

    /// Accuracy used by the persistence gate
    pub fn decision_accuracy(&self) -> f64 {
        self.accuracy.unwrap_or(UNKNOWN_ACCURACY_M)
    }
}

#[cfg(test)]
mod tests {
    use super::SubjectRole;

    #[test]
    fn parse_roles() {
        assert_eq!(Ok(SubjectRole::Driver), "driver".parse());
        assert_eq!(Ok(SubjectRole::Passenger), " Passenger ".parse());
        assert!("dispatcher".parse::<SubjectRole>().is_err());
        assert_eq!("driver", SubjectRole::Driver.to_string());
    }
}
