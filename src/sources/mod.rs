//! Position sources API

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::AcquisitionError;
use crate::RawSample;

mod channel;
pub use channel::{ChannelSource, SampleFeed};

#[cfg(feature = "csv")]
mod csv_file;
#[cfg(feature = "csv")]
pub use csv_file::CsvSource;

/// Where a watching source delivers its readings
pub type SampleSender = mpsc::UnboundedSender<Result<RawSample, AcquisitionError>>;
pub type SampleReceiver = mpsc::UnboundedReceiver<Result<RawSample, AcquisitionError>>;

/// Acquisition options handed to the source
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PositionOptions {
    /// Prefer GPS over network positioning
    pub high_accuracy: bool,
    /// Give up when no fix arrives within this window
    pub timeout_ms: u64,
    /// Oldest cached fix accepted, 0 forces a fresh one
    pub max_cache_age_ms: u64,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: 10_000,
            max_cache_age_ms: 0,
        }
    }
}

impl PositionOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_millis(self.max_cache_age_ms)
    }
}

/// Live subscription to a source, cancelled on `stop` or drop
pub struct WatchHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn stop(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

/// Device location capability
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Start delivering readings into `sink`
    ///
    /// Platforms without the capability fail right here with
    /// [`AcquisitionError::Unsupported`].
    fn watch(
        &self,
        options: &PositionOptions,
        sink: SampleSender,
    ) -> Result<WatchHandle, AcquisitionError>;

    /// Single fresh reading
    async fn get_once(&self, options: &PositionOptions) -> Result<RawSample, AcquisitionError>;
}

/// Column names used to read recorded positions
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct FieldsConfiguration {
    pub coordinates: String,
    pub time: String,
    pub accuracy: String,
    pub speed: String,
    pub heading: String,
    /// Coordinates column holds `lat, lng` instead of `lng, lat`
    pub flip_coordinates: bool,
}

impl Default for FieldsConfiguration {
    fn default() -> Self {
        Self {
            coordinates: "coordinates".to_string(),
            time: "time".to_string(),
            accuracy: "accuracy".to_string(),
            speed: "speed".to_string(),
            heading: "heading".to_string(),
            flip_coordinates: false,
        }
    }
}

impl FieldsConfiguration {
    pub fn coordinates(mut self, name: &str) -> Self {
        self.coordinates = name.to_lowercase();

        self
    }

    pub fn time(mut self, name: &str) -> Self {
        self.time = name.to_lowercase();

        self
    }

    pub fn accuracy(mut self, name: &str) -> Self {
        self.accuracy = name.to_lowercase();

        self
    }

    pub fn flip_coordinates(mut self) -> Self {
        self.flip_coordinates = true;

        self
    }
}
