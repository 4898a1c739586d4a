//! ridetrack - live driver and passenger location tracking

mod engine;
mod error;
mod service;

pub mod config;
pub mod export;
pub mod sources;
pub mod storage;

pub use engine::filter::{filter, round_coordinate};
pub use engine::gate::{should_persist_now, TrackingTuning};
pub use engine::geometry::{
    distance_m, estimate_eta_minutes, haversine_km, haversine_km as calculate_distance,
    DEFAULT_ASSUMED_SPEED_KMH,
};
pub use engine::sample::{LocationSample, RawSample, SubjectRole};
pub use engine::session::{TrackingRequest, TrackingSession, UpdateCallback};
pub use engine::smoothing::smooth;
pub use error::{AcquisitionError, LogNotifier, Notifier, StoreError};
pub use service::LocationService;
