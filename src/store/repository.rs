//! Typed access to occurrence and schedule records.
//!
//! The flat key space is partitioned by id prefix; keys with other prefixes
//! belong to someone else and are never touched. Decoding is strict: a
//! record without a usable url, fire time or rule is reported as corrupt
//! instead of being guessed at.

use super::DurableStore;
use crate::error::{Result, SnoozeError};
use crate::scheduler::records::{
    Occurrence, OccurrenceId, RecordKind, RecurrenceRule, Schedule, ScheduleId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OccurrenceBody {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    fires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schedule_id: Option<ScheduleId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleBody {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    rule: RecurrenceRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_occurrence_at: Option<i64>,
}

/// A record that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRecord {
    pub id: String,
    pub kind: RecordKind,
    pub reason: String,
}

/// Everything the engine owns in the store, decoded.
#[derive(Debug, Clone, Default)]
pub struct StoreScan {
    /// Ordered by id.
    pub occurrences: Vec<Occurrence>,
    /// Ordered by id.
    pub schedules: Vec<Schedule>,
    pub corrupt: Vec<CorruptRecord>,
}

impl StoreScan {
    /// Occurrences belonging to `schedule_id`, ordered by id.
    pub fn occurrences_of<'a>(
        &'a self,
        schedule_id: &'a ScheduleId,
    ) -> impl Iterator<Item = &'a Occurrence> + 'a {
        self.occurrences
            .iter()
            .filter(move |occ| occ.schedule_id.as_ref() == Some(schedule_id))
    }
}

/// Typed repository over a [`DurableStore`].
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DurableStore>,
}

impl Repository {
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub async fn occurrence(&self, id: &OccurrenceId) -> Result<Option<Occurrence>> {
        self.store
            .get(id.as_str())
            .await?
            .map(|value| decode_occurrence(id, value))
            .transpose()
    }

    pub async fn put_occurrence(&self, occurrence: &Occurrence) -> Result<()> {
        let value = encode_occurrence(occurrence)?;
        self.store.set(occurrence.id.as_str(), value).await
    }

    /// Atomically remove an occurrence and return it.
    ///
    /// `Ok(None)` means another path removed it first. A record that was
    /// removed but cannot be decoded yields `RecordCorrupt`; it stays removed.
    pub async fn take_occurrence(&self, id: &OccurrenceId) -> Result<Option<Occurrence>> {
        self.store
            .remove(id.as_str())
            .await?
            .map(|value| decode_occurrence(id, value))
            .transpose()
    }

    pub async fn schedule(&self, id: &ScheduleId) -> Result<Option<Schedule>> {
        self.store
            .get(id.as_str())
            .await?
            .map(|value| decode_schedule(id, value))
            .transpose()
    }

    pub async fn put_schedule(&self, schedule: &Schedule) -> Result<()> {
        let value = encode_schedule(schedule)?;
        self.store.set(schedule.id.as_str(), value).await
    }

    /// Remove any record by key. Missing keys are fine.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(key).await.map(|_| ())
    }

    /// Decode every engine-owned record.
    pub async fn scan(&self) -> Result<StoreScan> {
        let mut scan = StoreScan::default();
        for (key, value) in self.store.get_all().await? {
            let Some(kind) = RecordKind::of_key(&key) else {
                continue;
            };
            let decoded = match kind {
                RecordKind::Occurrence => OccurrenceId::parse(&key)
                    .ok_or_else(|| SnoozeError::corrupt(&key, "empty id"))
                    .and_then(|id| decode_occurrence(&id, value))
                    .map(|occ| scan.occurrences.push(occ)),
                RecordKind::Schedule => ScheduleId::parse(&key)
                    .ok_or_else(|| SnoozeError::corrupt(&key, "empty id"))
                    .and_then(|id| decode_schedule(&id, value))
                    .map(|schedule| scan.schedules.push(schedule)),
            };
            if let Err(e) = decoded {
                scan.corrupt.push(CorruptRecord {
                    id: key,
                    kind,
                    reason: e.to_string(),
                });
            }
        }
        Ok(scan)
    }
}

fn encode_occurrence(occurrence: &Occurrence) -> Result<Value> {
    serde_json::to_value(OccurrenceBody {
        url: occurrence.url.clone(),
        title: occurrence.title.clone(),
        fires_at: occurrence.fires_at,
        schedule_id: occurrence.schedule_id.clone(),
    })
    .map_err(|e| SnoozeError::StoreUnavailable(format!("cannot encode occurrence: {e}")))
}

fn decode_occurrence(id: &OccurrenceId, value: Value) -> Result<Occurrence> {
    let body: OccurrenceBody =
        serde_json::from_value(value).map_err(|e| SnoozeError::corrupt(id.as_str(), e.to_string()))?;
    if body.url.trim().is_empty() {
        return Err(SnoozeError::corrupt(id.as_str(), "missing url"));
    }
    if body.fires_at <= 0 {
        return Err(SnoozeError::corrupt(id.as_str(), "missing firesAt"));
    }
    Ok(Occurrence {
        id: id.clone(),
        url: body.url,
        title: body.title,
        fires_at: body.fires_at,
        schedule_id: body.schedule_id,
    })
}

fn encode_schedule(schedule: &Schedule) -> Result<Value> {
    serde_json::to_value(ScheduleBody {
        url: schedule.url.clone(),
        title: schedule.title.clone(),
        rule: schedule.rule.clone(),
        next_occurrence_at: schedule.next_occurrence_at,
    })
    .map_err(|e| SnoozeError::StoreUnavailable(format!("cannot encode schedule: {e}")))
}

fn decode_schedule(id: &ScheduleId, value: Value) -> Result<Schedule> {
    let body: ScheduleBody =
        serde_json::from_value(value).map_err(|e| SnoozeError::corrupt(id.as_str(), e.to_string()))?;
    if body.url.trim().is_empty() {
        return Err(SnoozeError::corrupt(id.as_str(), "missing url"));
    }
    body.rule
        .validate()
        .map_err(|e| SnoozeError::corrupt(id.as_str(), e.to_string()))?;
    Ok(Schedule {
        id: id.clone(),
        url: body.url,
        title: body.title,
        rule: body.rule,
        next_occurrence_at: body.next_occurrence_at,
    })
}
