//! In-process store.

use super::{CHANGE_CHANNEL_CAPACITY, DurableStore, StoreChange};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Map-backed store; contents are lost with the process.
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.records().get(id).cloned())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.records().clone())
    }

    async fn set(&self, id: &str, value: Value) -> Result<()> {
        self.records().insert(id.to_owned(), value.clone());
        self.notify(StoreChange::Set {
            id: id.to_owned(),
            value,
        });
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<Option<Value>> {
        let removed = self.records().remove(id);
        if removed.is_some() {
            self.notify(StoreChange::Removed { id: id.to_owned() });
        }
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
