//! In-process fallback store, optionally backed by a YAML file

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as FileLock;

use super::{LocationStore, PersistedLocationRecord};
use crate::error::StoreError;
use crate::SubjectRole;

/// Trail entries kept per subject
pub const DEFAULT_HISTORY_CAP: usize = 100;

fn key(role: SubjectRole, subject_id: &str) -> String {
    format!("{}:{}", role, subject_id)
}

/// Snapshot of everything the local store holds
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalData {
    #[serde(default)]
    pub latest: BTreeMap<String, PersistedLocationRecord>,
    #[serde(default)]
    pub history: BTreeMap<String, Vec<PersistedLocationRecord>>,
}

impl LocalData {
    pub fn latest(&self, role: SubjectRole, subject_id: &str) -> Option<&PersistedLocationRecord> {
        self.latest.get(&key(role, subject_id))
    }

    pub fn trail(&self, role: SubjectRole, subject_id: &str) -> &[PersistedLocationRecord] {
        match self.history.get(&key(role, subject_id)) {
            Some(h) => h.as_slice(),
            None => &[],
        }
    }

    pub fn history_len(&self, role: SubjectRole, subject_id: &str) -> usize {
        self.trail(role, subject_id).len()
    }
}

/// Local fallback store
///
/// Changes apply in memory under a short lock; the YAML file is written
/// afterwards with `tokio::fs`, newest snapshot wins.
pub struct LocalStore {
    data: Mutex<LocalData>,
    path: Option<PathBuf>,
    history_cap: usize,
    version: AtomicU64,
    /// Version of the snapshot on disk
    written: FileLock<u64>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self {
            data: Mutex::new(LocalData::default()),
            path: None,
            history_cap: DEFAULT_HISTORY_CAP,
            version: AtomicU64::new(0),
            written: FileLock::new(0),
        }
    }

    /// Load the store from `path`, starting empty when the file is missing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let data = match fs::read_to_string(&path) {
            Ok(s) if s.trim().is_empty() => LocalData::default(),
            Ok(s) => serde_yaml::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LocalData::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            data: Mutex::new(data),
            path: Some(path),
            history_cap: DEFAULT_HISTORY_CAP,
            version: AtomicU64::new(0),
            written: FileLock::new(0),
        })
    }

    pub fn history_cap(mut self, cap: usize) -> Self {
        self.history_cap = if cap < 1 { 1 } else { cap };

        self
    }

    pub fn get_data(&self) -> LocalData {
        match self.data.lock() {
            Ok(d) => d.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn save_data(&self, data: LocalData) -> Result<(), StoreError> {
        self.update(|current| *current = data).await
    }

    fn lock(&self) -> Result<MutexGuard<'_, LocalData>, StoreError> {
        self.data
            .lock()
            .map_err(|_| StoreError::Backend("local store lock poisoned".to_string()))
    }

    async fn update<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut LocalData),
    {
        let snapshot = {
            let mut current = self.lock()?;
            change(&mut current);

            match self.path {
                Some(_) => {
                    let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
                    Some((version, serde_yaml::to_string(&*current)?))
                }
                None => None,
            }
        };

        match snapshot {
            Some((version, yaml)) => self.flush(version, yaml).await,
            None => Ok(()),
        }
    }

    async fn flush(&self, version: u64, yaml: String) -> Result<(), StoreError> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };

        let mut written = self.written.lock().await;
        // a newer snapshot already landed
        if *written >= version {
            return Ok(());
        }

        tokio::fs::write(path, yaml).await?;
        *written = version;

        Ok(())
    }
}

#[async_trait]
impl LocationStore for LocalStore {
    async fn upsert_latest(&self, record: &PersistedLocationRecord) -> Result<(), StoreError> {
        self.update(|data| {
            data.latest
                .insert(key(record.role, &record.subject_id), record.clone());
        })
        .await
    }

    async fn append_history(&self, record: &PersistedLocationRecord) -> Result<(), StoreError> {
        let cap = self.history_cap;

        self.update(|data| {
            let trail = data
                .history
                .entry(key(record.role, &record.subject_id))
                .or_insert_with(Vec::new);
            trail.push(record.clone());
            if trail.len() > cap {
                let excess = trail.len() - cap;
                trail.drain(..excess);
            }
        })
        .await
    }

    async fn last_known(
        &self,
        role: SubjectRole,
        subject_id: &str,
    ) -> Result<Option<PersistedLocationRecord>, StoreError> {
        Ok(self.lock()?.latest(role, subject_id).cloned())
    }

    async fn history(
        &self,
        role: SubjectRole,
        subject_id: &str,
    ) -> Result<Vec<PersistedLocationRecord>, StoreError> {
        Ok(self.lock()?.trail(role, subject_id).to_vec())
    }
}
