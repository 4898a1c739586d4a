//! Public location operations

use std::sync::{Arc, Mutex};

use geo::geometry::Point;
use tracing::{debug, warn};

use crate::engine::filter::{filter, round_coordinate};
use crate::engine::geometry::haversine_km;
use crate::engine::session::{SessionLink, TrackingRequest, TrackingSession};
use crate::error::{LogNotifier, Notifier};
use crate::sources::{PositionOptions, PositionSource};
use crate::storage::{PersistedLocationRecord, StorageStrategy};
use crate::{LocationSample, SubjectRole};

/// Entry point used by the app screens
///
/// Source and storage are picked once here; every session started from the
/// service shares them.
pub struct LocationService {
    source: Arc<dyn PositionSource>,
    storage: StorageStrategy,
    notifier: Arc<dyn Notifier>,
    options: PositionOptions,
    sessions: Mutex<Vec<SessionLink>>,
}

impl LocationService {
    pub fn new(source: Arc<dyn PositionSource>, storage: StorageStrategy) -> Self {
        Self {
            source,
            storage,
            notifier: Arc::new(LogNotifier),
            options: PositionOptions::default(),
            sessions: Mutex::new(vec![]),
        }
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;

        self
    }

    /// Options for one shot fixes
    pub fn options(mut self, options: PositionOptions) -> Self {
        self.options = options;

        self
    }

    /// Start tracking a subject
    ///
    /// Resolves once the first sample is accepted. `None` means the platform
    /// cannot locate the subject right now; the user was already notified.
    pub async fn start_tracking(&self, request: &TrackingRequest) -> Option<TrackingSession> {
        let session = TrackingSession::start(
            self.source.as_ref(),
            self.storage.clone(),
            Arc::clone(&self.notifier),
            request,
        )
        .await?;

        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.retain(|s| s.is_tracking());
            sessions.push(session.link());
        }

        Some(session)
    }

    /// Stop every session started from this service
    pub fn stop_tracking(&self) {
        let sessions = match self.sessions.lock() {
            Ok(mut s) => std::mem::take(&mut *s),
            Err(_) => return,
        };

        for session in sessions {
            session.stop();
        }
    }

    pub fn is_currently_tracking(&self) -> bool {
        self.sessions
            .lock()
            .map(|s| s.iter().any(|s| s.is_tracking()))
            .unwrap_or(false)
    }

    /// One shot fix, unrelated to running sessions
    pub async fn get_current_location(&self) -> Option<LocationSample> {
        match self.source.get_once(&self.options).await {
            Ok(raw) => {
                let sample = filter(&raw);
                if sample.is_none() {
                    debug!("one shot fix rejected by the filter");
                }
                sample
            }
            Err(e) => {
                self.notifier.notify(&e);
                None
            }
        }
    }

    pub async fn get_last_known_location(
        &self,
        subject_id: &str,
        role: SubjectRole,
    ) -> Option<Point> {
        match self.storage.store.last_known(role, subject_id).await {
            Ok(found) => found.map(|r| r.point()),
            Err(e) => {
                warn!(subject = subject_id, role = %role, error = %e, "failed on read the last location");
                None
            }
        }
    }

    /// Write a position for manual corrections
    ///
    /// Skips smoothing and the gate, but the coordinates must be usable:
    /// non-finite or out of range values are refused, the rest is rounded
    /// like any tracked position.
    pub async fn update_location(
        &self,
        subject_id: &str,
        latitude: f64,
        longitude: f64,
        role: SubjectRole,
    ) -> bool {
        let usable = latitude.is_finite()
            && longitude.is_finite()
            && latitude.abs() <= 90.0
            && longitude.abs() <= 180.0;
        if !usable {
            warn!(subject = subject_id, role = %role, latitude, longitude, "refused manual location");
            return false;
        }

        let record = PersistedLocationRecord::manual(
            subject_id,
            role,
            round_coordinate(latitude),
            round_coordinate(longitude),
        );

        match self.storage.store.upsert_latest(&record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(subject = subject_id, role = %role, error = %e, "failed on update the location");
                false
            }
        }
    }

    /// Kilometers between two coordinates
    pub fn calculate_distance(&self, lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
        haversine_km(lat1, lng1, lat2, lng2)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use time::macros::datetime;
    use tokio::time::sleep;

    use super::*;
    use crate::error::AcquisitionError;
    use crate::sources::{ChannelSource, SampleFeed};
    use crate::storage::LocalStore;
    use crate::RawSample;

    #[derive(Default)]
    struct Collect(Mutex<Vec<AcquisitionError>>);

    impl Notifier for Collect {
        fn notify(&self, error: &AcquisitionError) {
            self.0.lock().unwrap().push(*error);
        }
    }

    /// Run `feed_with` once someone waits on `feed`
    fn when_listening<F>(feed: &SampleFeed, feed_with: F)
    where
        F: FnOnce(&SampleFeed) + Send + 'static,
    {
        let feed = feed.clone();

        tokio::spawn(async move {
            while !feed.is_watched() && !feed.is_requested() {
                sleep(Duration::from_millis(1)).await;
            }
            feed_with(&feed);
        });
    }

    fn service(source: ChannelSource, store: Arc<LocalStore>) -> (LocationService, Arc<Collect>) {
        let notes = Arc::new(Collect::default());
        let service = LocationService::new(Arc::new(source), StorageStrategy::latest_only(store))
            .notifier(notes.clone());

        (service, notes)
    }

    #[tokio::test(start_paused = true)]
    async fn current_location_filtered() {
        let (source, feed) = ChannelSource::new();
        let (service, _) = service(source, Arc::new(LocalStore::in_memory()));

        when_listening(&feed, |f| {
            f.push(RawSample::basic(120.0, 36.0, datetime!(2024-03-01 8:00 UTC)))
        });
        let sample = service.get_current_location().await.unwrap();
        assert_eq!(36.0, sample.latitude());
        assert_eq!(120.0, sample.longitude());

        when_listening(&feed, |f| {
            f.push(RawSample::basic(0.0, 0.0, datetime!(2024-03-01 8:00 UTC)))
        });
        assert_eq!(None, service.get_current_location().await);
    }

    #[tokio::test(start_paused = true)]
    async fn current_location_denied() {
        let (source, feed) = ChannelSource::new();
        let (service, notes) = service(source, Arc::new(LocalStore::in_memory()));

        when_listening(&feed, |f| f.fail(AcquisitionError::PermissionDenied));
        assert_eq!(None, service.get_current_location().await);
        assert_eq!(vec![AcquisitionError::PermissionDenied], *notes.0.lock().unwrap());
    }

    #[tokio::test]
    async fn manual_update_then_last_known() {
        let (source, _feed) = ChannelSource::new();
        let store = Arc::new(LocalStore::in_memory());
        let (service, _) = service(source, store.clone());

        assert_eq!(None, service.get_last_known_location("d1", SubjectRole::Driver).await);

        assert!(
            service
                .update_location("d1", 36.123456789, 3.987654321, SubjectRole::Driver)
                .await
        );

        let point = service
            .get_last_known_location("d1", SubjectRole::Driver)
            .await
            .unwrap();
        assert_eq!(36.123457, point.y());
        assert_eq!(3.987654, point.x());
        assert_eq!(0, store.get_data().history_len(SubjectRole::Driver, "d1"));
    }

    #[tokio::test]
    async fn manual_update_refuses_unusable_coordinates() {
        let (source, _feed) = ChannelSource::new();
        let store = Arc::new(LocalStore::in_memory());
        let (service, _) = service(source, store.clone());

        assert!(!service.update_location("d1", f64::NAN, 3.05, SubjectRole::Driver).await);
        assert!(!service.update_location("d1", 36.75, f64::INFINITY, SubjectRole::Driver).await);
        assert!(!service.update_location("d1", 36.75, 500.0, SubjectRole::Driver).await);
        assert!(!service.update_location("d1", -91.0, 3.05, SubjectRole::Driver).await);

        assert!(store.get_data().latest.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tracking_stops_every_session() {
        let (source, feed) = ChannelSource::new();
        let (service, _) = service(source, Arc::new(LocalStore::in_memory()));
        assert!(!service.is_currently_tracking());

        when_listening(&feed, |f| {
            f.push(RawSample::basic(36.75, 3.05, datetime!(2024-03-01 8:00 UTC)))
        });
        let driver = service
            .start_tracking(&TrackingRequest::new("d1", SubjectRole::Driver))
            .await
            .unwrap();
        assert!(service.is_currently_tracking());

        service.stop_tracking();
        assert!(!service.is_currently_tracking());
        assert!(!driver.is_tracking());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_session_not_tracking() {
        let (source, feed) = ChannelSource::new();
        let (service, _) = service(source, Arc::new(LocalStore::in_memory()));

        when_listening(&feed, |f| {
            f.push(RawSample::basic(36.75, 3.05, datetime!(2024-03-01 8:00 UTC)))
        });
        let session = service
            .start_tracking(&TrackingRequest::new("p1", SubjectRole::Passenger))
            .await
            .unwrap();
        drop(session);

        assert!(!service.is_currently_tracking());
    }

    #[test]
    fn distance() {
        let (source, _feed) = ChannelSource::new();
        let (service, _) = service(source, Arc::new(LocalStore::in_memory()));

        assert_eq!(0.0, service.calculate_distance(36.75, 3.05, 36.75, 3.05));
        assert!(service.calculate_distance(36.75, 3.05, 36.76, 3.05) > 1.0);
    }
}
