//! File-backed store: one JSON object mapping key to record.
//!
//! Every operation re-reads the file so that several processes (the daemon
//! and one-shot CLI invocations) can share it. Mutations run under an
//! exclusive `<file>.lock` created with `create_new`, and write back through
//! a temp file + rename so readers never see a torn file.

use super::{CHANGE_CHANNEL_CAPACITY, DurableStore, StoreChange};
use crate::error::{Result, SnoozeError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;

/// How long a mutation waits for the lock file.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1500);

/// Lock files older than this are assumed abandoned.
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// JSON-file store.
pub struct JsonFileStore {
    path: PathBuf,
    lock_timeout: Duration,
    changes: broadcast::Sender<StoreChange>,
}

impl JsonFileStore {
    /// Store backed by `path`; the file is created on first write.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            changes,
        }
    }

    /// Override how long mutations wait for the lock.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a read-modify-write under the lock on a blocking thread.
    async fn mutate<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut BTreeMap<String, Value>) -> (T, bool) + Send + 'static,
    {
        let path = self.path.clone();
        let timeout = self.lock_timeout;
        tokio::task::spawn_blocking(move || {
            let _guard = acquire_lock(&path, timeout)?;
            let mut records = read_records(&path)?;
            let (out, dirty) = op(&mut records);
            if dirty {
                write_records(&path, &records)?;
            }
            Ok(out)
        })
        .await
        .map_err(|e| SnoozeError::StoreUnavailable(format!("store task failed: {e}")))?
    }

    async fn snapshot(&self) -> Result<BTreeMap<String, Value>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_records(&path))
            .await
            .map_err(|e| SnoozeError::StoreUnavailable(format!("store task failed: {e}")))?
    }

    fn notify(&self, change: StoreChange) {
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn get(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.snapshot().await?.remove(id))
    }

    async fn get_all(&self) -> Result<BTreeMap<String, Value>> {
        self.snapshot().await
    }

    async fn set(&self, id: &str, value: Value) -> Result<()> {
        let key = id.to_owned();
        let stored = value.clone();
        self.mutate(move |records| {
            let unchanged = records.get(&key) == Some(&stored);
            if !unchanged {
                records.insert(key, stored);
            }
            ((), !unchanged)
        })
        .await?;
        self.notify(StoreChange::Set {
            id: id.to_owned(),
            value,
        });
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<Option<Value>> {
        let key = id.to_owned();
        let removed = self
            .mutate(move |records| {
                let removed = records.remove(&key);
                let dirty = removed.is_some();
                (removed, dirty)
            })
            .await?;
        if removed.is_some() {
            self.notify(StoreChange::Removed { id: id.to_owned() });
        }
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

fn read_records(path: &Path) -> Result<BTreeMap<String, Value>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(SnoozeError::StoreUnavailable(format!(
                "cannot read {}: {e}",
                path.display()
            )));
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    serde_json::from_slice(&bytes).map_err(|e| {
        SnoozeError::StoreUnavailable(format!("cannot parse {}: {e}", path.display()))
    })
}

fn write_records(path: &Path, records: &BTreeMap<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            SnoozeError::StoreUnavailable(format!("cannot create store directory: {e}"))
        })?;
    }

    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(records)
        .map_err(|e| SnoozeError::StoreUnavailable(format!("cannot serialize store: {e}")))?;
    std::fs::write(&tmp_path, json)
        .map_err(|e| SnoozeError::StoreUnavailable(format!("cannot write store temp file: {e}")))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| SnoozeError::StoreUnavailable(format!("cannot finalize store file: {e}")))?;
    Ok(())
}

fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

fn acquire_lock(path: &Path, timeout: Duration) -> Result<StoreLockGuard> {
    let lock_path = lock_path(path);
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            SnoozeError::StoreUnavailable(format!("cannot create store lock directory: {e}"))
        })?;
    }

    let started = std::time::Instant::now();
    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                let stamp = std::process::id().to_string();
                let _ = file.write_all(stamp.as_bytes());
                return Ok(StoreLockGuard { path: lock_path });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                evict_stale_lock(&lock_path);
                if started.elapsed() > timeout {
                    return Err(SnoozeError::StoreUnavailable(format!(
                        "timed out waiting for store lock {}",
                        lock_path.display()
                    )));
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(e) => {
                return Err(SnoozeError::StoreUnavailable(format!(
                    "cannot create store lock {}: {e}",
                    lock_path.display()
                )));
            }
        }
    }
}

fn evict_stale_lock(lock_path: &Path) {
    if !is_stale(lock_path) {
        return;
    }

    // Rename is atomic, so at most one waiter takes any given lock file.
    // Another waiter may have replaced the stale lock with a fresh one since
    // the age check; `reclaim_evicted` puts such a lock back.
    let evicted = lock_path.with_extension(format!("lock.{}.stale", uuid::Uuid::new_v4().simple()));
    if std::fs::rename(lock_path, &evicted).is_err() {
        return;
    }
    reclaim_evicted(lock_path, &evicted);
}

fn reclaim_evicted(lock_path: &Path, evicted: &Path) {
    if is_stale(evicted) {
        tracing::warn!("evicted stale store lock {}", lock_path.display());
    } else if let Err(e) = std::fs::hard_link(evicted, lock_path) {
        tracing::warn!(
            "cannot restore live store lock {}: {e}",
            lock_path.display()
        );
    }
    let _ = std::fs::remove_file(evicted);
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

struct StoreLockGuard {
    path: PathBuf,
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
