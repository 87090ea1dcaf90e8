//! Request API used by front ends (CLI, host bridges).
//!
//! Validates input, delegates to the engine, and closes the source once a
//! snooze has been durably recorded.

use crate::action::SourceRef;
use crate::error::{Result, SnoozeError};
use crate::scheduler::records::{
    Occurrence, OccurrenceId, RecordKind, RecurrenceRule, Schedule, ScheduleId,
};
use crate::scheduler::recurrence::Preset;
use crate::scheduler::{FireOutcome, ReconciliationEngine};
use std::sync::Arc;
use tracing::warn;

/// URL schemes of pages that cannot be reopened later.
const UNSNOOZABLE_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "edge://",
    "about:",
    "moz-extension://",
];

/// When a one-off snooze should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoozeTime {
    /// Absolute epoch milliseconds.
    At(i64),
    /// Relative to now, in the engine's zone.
    Preset(Preset),
}

/// Pending work, for listing.
#[derive(Debug, Clone, Default)]
pub struct PendingItems {
    /// Ordered by fire time, then id.
    pub occurrences: Vec<Occurrence>,
    /// Ordered by id.
    pub schedules: Vec<Schedule>,
}

/// Whether `url` can be snoozed.
#[must_use]
pub fn is_snoozable(url: &str) -> bool {
    let url = url.trim();
    !url.is_empty() && !UNSNOOZABLE_PREFIXES.iter().any(|p| url.starts_with(p))
}

/// Front-end facing snooze operations.
#[derive(Clone)]
pub struct SnoozeService {
    engine: Arc<ReconciliationEngine>,
}

impl SnoozeService {
    #[must_use]
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// Snooze `source` once.
    ///
    /// # Errors
    ///
    /// [`SnoozeError::UnsnoozableUrl`] for special pages,
    /// [`SnoozeError::InvalidTime`] unless the time is in the future.
    pub async fn snooze(&self, source: &SourceRef, when: SnoozeTime) -> Result<Occurrence> {
        check_url(&source.url)?;
        let fires_at = match when {
            SnoozeTime::At(at) => at,
            SnoozeTime::Preset(preset) => preset
                .fire_at(&self.engine.now_zoned()?)
                .map(|at| at.timestamp_millis())
                .ok_or(SnoozeError::InvalidTime)?,
        };
        let occurrence = self
            .engine
            .create_one_off_occurrence(&source.url, source.title.clone(), fires_at)
            .await?;
        self.close(source);
        Ok(occurrence)
    }

    /// Snooze `source` on a recurring rule.
    ///
    /// # Errors
    ///
    /// [`SnoozeError::UnsnoozableUrl`] for special pages,
    /// [`SnoozeError::InvalidRule`] for an empty or out-of-range rule.
    pub async fn snooze_recurring(
        &self,
        source: &SourceRef,
        rule: RecurrenceRule,
    ) -> Result<(Schedule, Occurrence)> {
        check_url(&source.url)?;
        let created = self
            .engine
            .create_recurring_schedule(&source.url, source.title.clone(), rule)
            .await?;
        self.close(source);
        Ok(created)
    }

    /// Open a pending occurrence now instead of at its fire time.
    ///
    /// A recurring occurrence advances its schedule as if it had fired.
    ///
    /// # Errors
    ///
    /// [`SnoozeError::AlreadyClaimed`] if the occurrence is no longer pending.
    pub async fn wake_now(&self, id: &OccurrenceId) -> Result<FireOutcome> {
        match self.engine.fire_occurrence(id).await? {
            FireOutcome::AlreadyClaimed => Err(SnoozeError::AlreadyClaimed(id.to_string())),
            outcome => Ok(outcome),
        }
    }

    /// Delete an occurrence or a schedule (with its occurrences) by id.
    ///
    /// Cancelling one occurrence of a schedule skips it; the schedule moves
    /// on to its following occurrence. Cancel the schedule id to stop it.
    ///
    /// # Errors
    ///
    /// [`SnoozeError::UnknownId`] for ids of neither kind.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        match RecordKind::of_key(id) {
            Some(RecordKind::Occurrence) => {
                let id = OccurrenceId::parse(id).ok_or_else(|| SnoozeError::UnknownId(id.to_owned()))?;
                self.engine.skip_occurrence(&id).await.map(|_| ())
            }
            Some(RecordKind::Schedule) => {
                let id = ScheduleId::parse(id).ok_or_else(|| SnoozeError::UnknownId(id.to_owned()))?;
                self.engine.delete_schedule(&id).await.map(|_| ())
            }
            None => Err(SnoozeError::UnknownId(id.to_owned())),
        }
    }

    /// Pending occurrences and schedules. Undecodable records are skipped.
    pub async fn list_pending(&self) -> Result<PendingItems> {
        let scan = self.engine.repository().scan().await?;
        let mut occurrences = scan.occurrences;
        occurrences.sort_by(|a, b| a.fires_at.cmp(&b.fires_at).then_with(|| a.id.cmp(&b.id)));
        Ok(PendingItems {
            occurrences,
            schedules: scan.schedules,
        })
    }

    fn close(&self, source: &SourceRef) {
        if let Err(e) = self.engine.actions().close_source(source) {
            warn!("cannot close source {}: {e}", source.url);
        }
    }
}

fn check_url(url: &str) -> Result<()> {
    if is_snoozable(url) {
        Ok(())
    } else {
        Err(SnoozeError::UnsnoozableUrl(url.to_owned()))
    }
}
