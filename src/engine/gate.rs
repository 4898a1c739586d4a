//! Persistence throttle

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use super::geometry::distance_m;
use super::sample::LocationSample;

/// Safeguard ticks never run faster than this
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1000);

/// Knobs of a tracking session
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackingTuning {
    /// Safeguard heartbeat period in milliseconds
    pub frequency_ms: u64,
    /// Worst accuracy, in meters, that may trigger a movement write
    pub accuracy_threshold_m: f64,
    /// Movement, in meters, that triggers a write
    pub min_distance_m: f64,
    /// Longest time, in milliseconds, without any write
    pub max_stale_ms: u64,
    /// Blend consecutive samples
    pub smoothing: bool,
    /// Stop republishing once the last sample is this old, in milliseconds
    pub offline_after_ms: Option<u64>,
}

impl Default for TrackingTuning {
    fn default() -> Self {
        Self {
            frequency_ms: 2000,
            accuracy_threshold_m: 50.0,
            min_distance_m: 10.0,
            max_stale_ms: 15000,
            smoothing: true,
            offline_after_ms: None,
        }
    }
}

impl TrackingTuning {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.frequency_ms).max(MIN_TICK_PERIOD)
    }

    pub fn max_stale(&self) -> Duration {
        Duration::from_millis(self.max_stale_ms)
    }

    pub fn offline_after(&self) -> Option<Duration> {
        self.offline_after_ms.map(Duration::from_millis)
    }
}

/// Decide whether `current` is written right away or left to the heartbeat
///
/// `last` is the previous accepted sample, `last_saved_at` the last write of
/// any kind.
pub fn should_persist_now(
    last: Option<&LocationSample>,
    current: &LocationSample,
    last_saved_at: Option<Instant>,
    now: Instant,
    tuning: &TrackingTuning,
) -> bool {
    let last = match last {
        Some(l) => l,
        None => {
            debug!("first sample of the session");
            return true;
        }
    };

    let moved = distance_m(&last.coordinates, &current.coordinates);
    let accuracy = current.decision_accuracy();

    if accuracy <= tuning.accuracy_threshold_m && moved >= tuning.min_distance_m {
        debug!(moved, accuracy, "moved far enough");
        return true;
    }

    let stale = match last_saved_at {
        Some(saved) => now.saturating_duration_since(saved) >= tuning.max_stale(),
        None => true,
    };
    if stale {
        debug!(moved, accuracy, "last write too old");
    }

    stale
}
