//! Push source fed by the host application

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

use super::{PositionOptions, PositionSource, SampleSender, WatchHandle};
use crate::error::AcquisitionError;
use crate::RawSample;

type Reading = Result<RawSample, AcquisitionError>;

#[derive(Default)]
struct Shared {
    watcher: Option<(u64, SampleSender)>,
    next_watch: u64,
    /// Newest fix pushed while nobody listened
    cached: Option<RawSample>,
    waiting: Vec<oneshot::Sender<Reading>>,
}

impl Shared {
    /// Cached fix, if young enough for `options`
    fn take_cached(&mut self, options: &PositionOptions) -> Option<RawSample> {
        let sample = self.cached.take()?;

        let age = OffsetDateTime::now_utc() - sample.captured_at;
        if age.whole_milliseconds() > i128::from(options.max_cache_age_ms) {
            debug!(age_ms = %age.whole_milliseconds(), "cached fix too old, dropped");
            return None;
        }

        Some(sample)
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Source whose readings come from platform callbacks, a socket, a test...
///
/// The newest fix pushed while nobody listens is cached. The next watcher or
/// one shot request only gets it when it is within the requested
/// `max_cache_age_ms`. Errors reach live listeners only.
pub struct ChannelSource {
    shared: Arc<Mutex<Shared>>,
    supported: bool,
}

/// Producer side of a [`ChannelSource`]
#[derive(Clone)]
pub struct SampleFeed {
    shared: Arc<Mutex<Shared>>,
}

impl ChannelSource {
    pub fn new() -> (Self, SampleFeed) {
        let shared = Arc::new(Mutex::new(Shared::default()));

        (
            Self {
                shared: Arc::clone(&shared),
                supported: true,
            },
            SampleFeed { shared },
        )
    }

    /// Source of a platform without location capability
    pub fn unsupported() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            supported: false,
        }
    }
}

impl SampleFeed {
    pub fn push(&self, sample: RawSample) {
        self.deliver(Ok(sample));
    }

    pub fn fail(&self, error: AcquisitionError) {
        self.deliver(Err(error));
    }

    /// Whether someone currently watches the source
    pub fn is_watched(&self) -> bool {
        lock(&self.shared).watcher.is_some()
    }

    /// Whether a one shot request waits for the next reading
    pub fn is_requested(&self) -> bool {
        !lock(&self.shared).waiting.is_empty()
    }

    fn deliver(&self, reading: Reading) {
        let mut shared = lock(&self.shared);

        let mut answered = false;
        for waiter in shared.waiting.drain(..) {
            answered |= waiter.send(reading.clone()).is_ok();
        }

        let delivered = match &shared.watcher {
            Some((_, sink)) => sink.send(reading.clone()).is_ok(),
            None => false,
        };
        if delivered {
            return;
        }

        // receiver side went away
        shared.watcher = None;
        if answered {
            return;
        }

        match reading {
            Ok(sample) => shared.cached = Some(sample),
            Err(e) => debug!(error = %e, "nobody listening, error dropped"),
        }
    }
}

#[async_trait]
impl PositionSource for ChannelSource {
    fn watch(
        &self,
        options: &PositionOptions,
        sink: SampleSender,
    ) -> Result<WatchHandle, AcquisitionError> {
        if !self.supported {
            return Err(AcquisitionError::Unsupported);
        }

        let mut shared = lock(&self.shared);

        if let Some(sample) = shared.take_cached(options) {
            let _ = sink.send(Ok(sample));
        }

        shared.next_watch += 1;
        let id = shared.next_watch;
        shared.watcher = Some((id, sink));

        let cancel = Arc::clone(&self.shared);
        Ok(WatchHandle::new(move || {
            let mut shared = lock(&cancel);
            if matches!(shared.watcher, Some((current, _)) if current == id) {
                shared.watcher = None;
            }
        }))
    }

    async fn get_once(&self, options: &PositionOptions) -> Result<RawSample, AcquisitionError> {
        if !self.supported {
            return Err(AcquisitionError::Unsupported);
        }

        let rx = {
            let mut shared = lock(&self.shared);
            if let Some(sample) = shared.take_cached(options) {
                return Ok(sample);
            }

            let (tx, rx) = oneshot::channel();
            shared.waiting.push(tx);
            rx
        };

        match timeout(options.timeout(), rx).await {
            Ok(Ok(reading)) => reading,
            Ok(Err(_)) => Err(AcquisitionError::PositionUnavailable),
            Err(_) => Err(AcquisitionError::Timeout),
        }
    }
}
