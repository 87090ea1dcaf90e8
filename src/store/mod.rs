//! Durable key/value persistence.
//!
//! [`DurableStore`] is the flat, JSON-valued key space every record lives
//! in. [`Repository`] layers typed occurrence/schedule access on top of it
//! and partitions the key space by id prefix.

pub mod json_file;
pub mod memory;
pub mod repository;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use repository::{CorruptRecord, Repository, StoreScan};

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Capacity of the change-notification channel.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Advisory change notification. Nothing relies on these for correctness.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Set { id: String, value: Value },
    Removed { id: String },
}

impl StoreChange {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Set { id, .. } | Self::Removed { id } => id,
        }
    }
}

/// Key/value store holding every record.
///
/// `set` and `remove` are idempotent. `remove` is an atomic read-and-delete:
/// of two concurrent removes of the same key exactly one observes the value.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch one record.
    async fn get(&self, id: &str) -> Result<Option<Value>>;

    /// Fetch every record, ordered by key.
    async fn get_all(&self) -> Result<BTreeMap<String, Value>>;

    /// Insert or overwrite a record.
    async fn set(&self, id: &str, value: Value) -> Result<()>;

    /// Delete a record, returning what was stored (None if already absent).
    async fn remove(&self, id: &str) -> Result<Option<Value>>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}
