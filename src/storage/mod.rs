//! Location stores API

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use geo::geometry::Point;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::{LocationSample, SubjectRole};

mod local;
pub use local::{LocalData, LocalStore, DEFAULT_HISTORY_CAP};

#[cfg(feature = "mongo")]
mod mongo;
#[cfg(feature = "mongo")]
pub use mongo::MongoStore;

/// What ends up in storage for one subject
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedLocationRecord {
    pub subject_id: String,
    pub role: SubjectRole,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    /// `false` marks the point where the feed went quiet
    #[serde(default = "online")]
    pub online: bool,
}

fn online() -> bool {
    true
}

impl PersistedLocationRecord {
    pub fn from_sample(subject_id: &str, role: SubjectRole, sample: &LocationSample) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            role,
            latitude: sample.latitude(),
            longitude: sample.longitude(),
            accuracy: sample.accuracy,
            speed: sample.speed,
            heading: sample.heading,
            captured_at: sample.captured_at,
            online: true,
        }
    }

    /// Record of a hand entered position
    pub fn manual(subject_id: &str, role: SubjectRole, latitude: f64, longitude: f64) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            role,
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            heading: None,
            captured_at: OffsetDateTime::now_utc(),
            online: true,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }
}

/// Where persisted locations go
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Replace the live record of the subject
    async fn upsert_latest(&self, record: &PersistedLocationRecord) -> Result<(), StoreError>;

    /// Add to the subject trail
    async fn append_history(&self, _record: &PersistedLocationRecord) -> Result<(), StoreError> {
        Err(StoreError::HistoryUnsupported)
    }

    /// Live record of the subject, if any
    async fn last_known(
        &self,
        role: SubjectRole,
        subject_id: &str,
    ) -> Result<Option<PersistedLocationRecord>, StoreError>;

    /// Recorded trail of the subject, oldest first
    async fn history(
        &self,
        _role: SubjectRole,
        _subject_id: &str,
    ) -> Result<Vec<PersistedLocationRecord>, StoreError> {
        Ok(vec![])
    }
}

/// Store plus the write semantics picked for it
#[derive(Clone)]
pub struct StorageStrategy {
    pub store: Arc<dyn LocationStore>,
    /// Also append every write to the trail
    pub keep_history: bool,
}

impl StorageStrategy {
    /// Only the live record is kept
    pub fn latest_only(store: Arc<dyn LocationStore>) -> Self {
        Self {
            store,
            keep_history: false,
        }
    }

    /// Live record plus a trail
    pub fn with_history(store: Arc<dyn LocationStore>) -> Self {
        Self {
            store,
            keep_history: true,
        }
    }
}

pub type PersistenceErrorCallback = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// Writes records and never lets a storage failure escape
pub struct Persister {
    strategy: StorageStrategy,
    on_error: Option<PersistenceErrorCallback>,
    failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Persister {
    pub fn new(strategy: StorageStrategy, on_error: Option<PersistenceErrorCallback>) -> Self {
        Self {
            strategy,
            on_error,
            failures: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Returns whether every write went through
    pub async fn persist(&self, record: &PersistedLocationRecord) -> bool {
        if let Err(e) = self.strategy.store.upsert_latest(record).await {
            self.failed(record, e);
            return false;
        }

        if self.strategy.keep_history {
            if let Err(e) = self.strategy.store.append_history(record).await {
                self.failed(record, e);
                return false;
            }
        }

        debug!(
            subject = %record.subject_id,
            role = %record.role,
            lat = record.latitude,
            lng = record.longitude,
            online = record.online,
            "location persisted"
        );

        true
    }

    fn failed(&self, record: &PersistedLocationRecord, error: StoreError) {
        warn!(
            subject = %record.subject_id,
            role = %record.role,
            error = %error,
            "failed on persist the location"
        );

        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error.to_string());
        }
        if let Some(cb) = &self.on_error {
            cb(&error);
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|l| l.clone())
    }
}
