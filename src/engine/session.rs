//! Live tracking session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::filter::filter;
use super::gate::{should_persist_now, TrackingTuning};
use super::sample::{LocationSample, RawSample, SubjectRole};
use super::smoothing::smooth;
use crate::error::{AcquisitionError, Notifier};
use crate::sources::{PositionOptions, PositionSource, SampleReceiver, WatchHandle};
use crate::storage::{
    PersistedLocationRecord, PersistenceErrorCallback, Persister, StorageStrategy,
};

pub type UpdateCallback = Arc<dyn Fn(&LocationSample) + Send + Sync>;

type WriteSender = mpsc::UnboundedSender<PersistedLocationRecord>;
type WriteReceiver = mpsc::UnboundedReceiver<PersistedLocationRecord>;

/// Everything needed to start tracking one subject
#[derive(Clone)]
pub struct TrackingRequest {
    pub subject_id: String,
    pub role: SubjectRole,
    pub options: PositionOptions,
    pub tuning: TrackingTuning,
    /// Called with every accepted sample, persisted or not
    pub on_update: Option<UpdateCallback>,
    pub on_persistence_error: Option<PersistenceErrorCallback>,
}

impl TrackingRequest {
    pub fn new(subject_id: &str, role: SubjectRole) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            role,
            options: PositionOptions::default(),
            tuning: TrackingTuning::default(),
            on_update: None,
            on_persistence_error: None,
        }
    }

    pub fn options(&mut self, options: PositionOptions) -> &mut Self {
        self.options = options;

        self
    }

    pub fn tuning(&mut self, tuning: TrackingTuning) -> &mut Self {
        self.tuning = tuning;

        self
    }

    pub fn on_update<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&LocationSample) + Send + Sync + 'static,
    {
        self.on_update = Some(Arc::new(callback));

        self
    }

    pub fn on_persistence_error<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&crate::error::StoreError) + Send + Sync + 'static,
    {
        self.on_persistence_error = Some(Arc::new(callback));

        self
    }
}

#[derive(Default)]
struct SessionState {
    last_accepted: Option<LocationSample>,
    last_accepted_at: Option<Instant>,
    last_saved_at: Option<Instant>,
    offline: bool,
}

/// State shared between the handle, the session task and the writer
struct SessionCore {
    subject_id: String,
    role: SubjectRole,
    tuning: TrackingTuning,
    active: AtomicBool,
    state: Mutex<SessionState>,
    persister: Persister,
    on_update: Option<UpdateCallback>,
    watch: Mutex<Option<WatchHandle>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Feeds the session writer, dropped on stop
    writes: Mutex<Option<WriteSender>>,
}

impl SessionCore {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Filter, smooth and maybe persist one reading
    ///
    /// Returns whether the reading was accepted.
    fn ingest(&self, raw: &RawSample) -> bool {
        let sample = match filter(raw) {
            Some(s) => s,
            None => return false,
        };
        let now = Instant::now();

        let (smoothed, persist) = {
            let mut state = self.state();

            // movement is judged on the fix itself, not on the blend
            let persist = should_persist_now(
                state.last_accepted.as_ref(),
                &sample,
                state.last_saved_at,
                now,
                &self.tuning,
            );
            let smoothed = smooth(state.last_accepted.as_ref(), &sample, self.tuning.smoothing);

            state.last_accepted = Some(smoothed.clone());
            state.last_accepted_at = Some(now);
            state.offline = false;
            if persist {
                state.last_saved_at = Some(now);
            }

            (smoothed, persist)
        };

        if let Some(cb) = &self.on_update {
            cb(&smoothed);
        }

        if persist {
            self.queue_write(PersistedLocationRecord::from_sample(
                &self.subject_id,
                self.role,
                &smoothed,
            ));
        }

        true
    }

    /// Safeguard heartbeat
    fn tick(&self) {
        let now = Instant::now();

        let record = {
            let mut state = self.state();

            let last = match &state.last_accepted {
                Some(l) => l.clone(),
                None => return,
            };

            let quiet = match (self.tuning.offline_after(), state.last_accepted_at) {
                (Some(limit), Some(at)) => now.saturating_duration_since(at) >= limit,
                _ => false,
            };

            let mut record = PersistedLocationRecord::from_sample(&self.subject_id, self.role, &last);
            if quiet {
                if state.offline {
                    return;
                }
                info!(subject = %self.subject_id, role = %self.role, "no fresh position, marking offline");
                state.offline = true;
                record.online = false;
            }

            state.last_saved_at = Some(now);
            record
        };

        debug!(subject = %self.subject_id, "safeguard tick");
        self.queue_write(record);
    }

    /// Nothing new is written once this returns
    fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.close_writes();

        if let Some(watch) = self.watch.lock().ok().and_then(|mut w| w.take()) {
            watch.stop();
        }
        if let Some(task) = self.task.lock().ok().and_then(|mut t| t.take()) {
            task.abort();
        }

        info!(subject = %self.subject_id, role = %self.role, "tracking stopped");
    }

    /// Hand a record to the writer, never waiting on the store
    fn queue_write(&self, record: PersistedLocationRecord) {
        let queued = match self.writes.lock() {
            Ok(w) => w.as_ref().map(|tx| tx.send(record).is_ok()),
            Err(_) => None,
        };

        if queued != Some(true) {
            debug!(subject = %self.subject_id, "session closed, write skipped");
        }
    }

    fn close_writes(&self) {
        if let Ok(mut w) = self.writes.lock() {
            w.take();
        }
    }
}

/// Single writer per session, so records land in the order they were made
async fn write_loop(core: Arc<SessionCore>, mut rx: WriteReceiver) {
    while let Some(record) = rx.recv().await {
        if !core.active.load(Ordering::SeqCst) {
            break;
        }
        core.persister.persist(&record).await;
    }
}

async fn run(core: Arc<SessionCore>, mut rx: SampleReceiver, notifier: Arc<dyn Notifier>) {
    let period = core.tuning.tick_period();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut source_open = true;
    let mut reported: Option<AcquisitionError> = None;

    loop {
        tokio::select! {
            reading = rx.recv(), if source_open => match reading {
                Some(Ok(raw)) => {
                    if core.ingest(&raw) {
                        reported = None;
                    }
                }
                Some(Err(e)) => {
                    warn!(subject = %core.subject_id, error = %e, "position source failed");
                    if reported != Some(e) {
                        notifier.notify(&e);
                        reported = Some(e);
                    }
                }
                None => {
                    debug!(subject = %core.subject_id, "position source closed");
                    source_open = false;
                }
            },
            _ = ticker.tick() => core.tick(),
        }
    }
}

/// Weak view of a session, kept by the service
#[derive(Clone)]
pub(crate) struct SessionLink(Weak<SessionCore>);

impl SessionLink {
    pub(crate) fn stop(&self) {
        if let Some(core) = self.0.upgrade() {
            core.stop();
        }
    }

    pub(crate) fn is_tracking(&self) -> bool {
        self.0
            .upgrade()
            .map(|core| core.active.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// Handle of a running session, stopping on drop
pub struct TrackingSession {
    core: Arc<SessionCore>,
}

impl TrackingSession {
    /// Subscribe to `source` and wait for the first accepted sample
    pub(crate) async fn start(
        source: &dyn PositionSource,
        strategy: StorageStrategy,
        notifier: Arc<dyn Notifier>,
        request: &TrackingRequest,
    ) -> Option<TrackingSession> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();

        let watch = match source.watch(&request.options, tx) {
            Ok(w) => w,
            Err(e) => {
                notifier.notify(&e);
                return None;
            }
        };

        let core = Arc::new(SessionCore {
            subject_id: request.subject_id.clone(),
            role: request.role,
            tuning: request.tuning.clone(),
            active: AtomicBool::new(true),
            state: Mutex::new(SessionState::default()),
            persister: Persister::new(strategy, request.on_persistence_error.clone()),
            on_update: request.on_update.clone(),
            watch: Mutex::new(None),
            task: Mutex::new(None),
            writes: Mutex::new(Some(writes_tx)),
        });
        tokio::spawn(write_loop(Arc::clone(&core), writes_rx));

        let deadline = Instant::now() + request.options.timeout();
        loop {
            let failure = match timeout_at(deadline, rx.recv()).await {
                Ok(Some(Ok(raw))) => {
                    if core.ingest(&raw) {
                        break;
                    }
                    continue;
                }
                Ok(Some(Err(e))) => e,
                Ok(None) => AcquisitionError::PositionUnavailable,
                Err(_) => AcquisitionError::Timeout,
            };

            core.active.store(false, Ordering::SeqCst);
            core.close_writes();
            watch.stop();
            notifier.notify(&failure);
            return None;
        }

        info!(subject = %request.subject_id, role = %request.role, "tracking started");

        let task = tokio::spawn(run(Arc::clone(&core), rx, notifier));
        if let Ok(mut w) = core.watch.lock() {
            *w = Some(watch);
        }
        if let Ok(mut t) = core.task.lock() {
            *t = Some(task);
        }

        Some(TrackingSession { core })
    }

    pub(crate) fn link(&self) -> SessionLink {
        SessionLink(Arc::downgrade(&self.core))
    }

    /// Stop sampling and ticking
    ///
    /// Nothing new is written once this returns; a write already handed to
    /// the store may still land.
    pub fn stop(&self) {
        self.core.stop();
    }

    pub fn is_tracking(&self) -> bool {
        self.core.active.load(Ordering::SeqCst)
    }

    pub fn subject_id(&self) -> &str {
        &self.core.subject_id
    }

    pub fn role(&self) -> SubjectRole {
        self.core.role
    }

    /// Latest smoothed sample
    pub fn last_accepted(&self) -> Option<LocationSample> {
        self.core.state().last_accepted.clone()
    }

    /// Whether the heartbeat gave up on a quiet source
    pub fn is_offline(&self) -> bool {
        self.core.state().offline
    }

    pub fn persistence_failures(&self) -> u64 {
        self.core.persister.failures()
    }

    pub fn last_persistence_error(&self) -> Option<String> {
        self.core.persister.last_error()
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.stop();
    }
}
