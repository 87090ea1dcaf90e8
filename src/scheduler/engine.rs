//! The reconciliation engine: record creation, the claim protocol, firing
//! and recurring advance.
//!
//! Every path that consumes an occurrence goes through [`ReconciliationEngine::claim`],
//! which removes the record with the store's atomic remove. Whichever path
//! gets the record back owns the firing; everyone else sees it as absent and
//! does nothing. There is no lock around anything else.

use crate::action::ActionExecutor;
use crate::clock::Clock;
use crate::error::{Result, SnoozeError};
use crate::scheduler::records::{Occurrence, OccurrenceId, RecurrenceRule, Schedule, ScheduleId};
use crate::scheduler::recurrence;
use crate::store::{DurableStore, Repository};
use crate::timer::{TimerFacility, TimerSpec};
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`ReconciliationEngine::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller removed the record and owns the firing.
    Claimed(Occurrence),
    /// Another path got there first.
    AlreadyClaimed,
}

/// Result of [`ReconciliationEngine::fire_occurrence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// The action was requested. `next` is the schedule's following
    /// occurrence for a recurring firing whose advance succeeded.
    Performed {
        occurrence: Occurrence,
        next: Option<Occurrence>,
    },
    /// Another path claimed the occurrence first.
    AlreadyClaimed,
    /// The occurrence pointed at a deleted schedule; it was discarded unfired.
    Orphaned(Occurrence),
}

/// Owns the pending-occurrence invariants over a store, a timer facility
/// and an action executor.
pub struct ReconciliationEngine {
    repo: Repository,
    timers: Arc<dyn TimerFacility>,
    actions: Arc<dyn ActionExecutor>,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl ReconciliationEngine {
    /// `tz` is the zone wall-clock recurrence rules are evaluated in.
    #[must_use]
    pub fn new(
        store: Arc<dyn DurableStore>,
        timers: Arc<dyn TimerFacility>,
        actions: Arc<dyn ActionExecutor>,
        clock: Arc<dyn Clock>,
        tz: Tz,
    ) -> Self {
        Self {
            repo: Repository::new(store),
            timers,
            actions,
            clock,
            tz,
        }
    }

    #[must_use]
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    #[must_use]
    pub fn timers(&self) -> &Arc<dyn TimerFacility> {
        &self.timers
    }

    #[must_use]
    pub fn actions(&self) -> &Arc<dyn ActionExecutor> {
        &self.actions
    }

    #[must_use]
    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    /// Current time in epoch milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Current time in the engine's zone.
    pub fn now_zoned(&self) -> Result<DateTime<Tz>> {
        self.zoned(self.now_ms())
    }

    pub(crate) fn zoned(&self, epoch_ms: i64) -> Result<DateTime<Tz>> {
        self.tz
            .timestamp_millis_opt(epoch_ms)
            .single()
            .ok_or(SnoozeError::InvalidTime)
    }

    /// Next firing of `rule` strictly after `after_ms`.
    pub(crate) fn next_fire_at(&self, rule: &RecurrenceRule, after_ms: i64) -> Result<i64> {
        let after = self.zoned(after_ms)?;
        recurrence::next_occurrence(rule, &after)
            .map(|next| next.timestamp_millis())
            .ok_or_else(|| SnoozeError::InvalidRule(format!("{rule} has no next occurrence")))
    }

    /// Persist a one-off occurrence and arm its timer.
    ///
    /// # Errors
    ///
    /// [`SnoozeError::InvalidTime`] unless `fires_at` is strictly in the future.
    pub async fn create_one_off_occurrence(
        &self,
        url: &str,
        title: Option<String>,
        fires_at: i64,
    ) -> Result<Occurrence> {
        if fires_at <= self.now_ms() {
            return Err(SnoozeError::InvalidTime);
        }
        let occurrence = Occurrence::one_off(url, title, fires_at);
        self.repo.put_occurrence(&occurrence).await?;
        self.arm(&occurrence);
        info!(
            occurrence_id = %occurrence.id,
            fires_at,
            "snoozed {url}"
        );
        Ok(occurrence)
    }

    /// Persist a schedule and its first occurrence, and arm that occurrence's timer.
    ///
    /// # Errors
    ///
    /// [`SnoozeError::InvalidRule`] if the rule selects no weekday, an
    /// out-of-range day or an invalid time.
    pub async fn create_recurring_schedule(
        &self,
        url: &str,
        title: Option<String>,
        rule: RecurrenceRule,
    ) -> Result<(Schedule, Occurrence)> {
        rule.validate()?;
        let first = self.next_fire_at(&rule, self.now_ms())?;

        let mut schedule = Schedule::new(url, title, rule);
        schedule.next_occurrence_at = Some(first);
        self.repo.put_schedule(&schedule).await?;

        let occurrence = Occurrence::for_schedule(&schedule, first);
        if let Err(e) = self.repo.put_occurrence(&occurrence).await {
            // A schedule with no occurrence would come alive at the next start.
            if let Err(undo) = self.repo.remove(schedule.id.as_str()).await {
                warn!(schedule_id = %schedule.id, "cannot roll back schedule: {undo}");
            }
            return Err(e);
        }
        self.arm(&occurrence);
        info!(
            schedule_id = %schedule.id,
            occurrence_id = %occurrence.id,
            first,
            "recurring snooze created: {}",
            schedule.rule
        );
        Ok((schedule, occurrence))
    }

    /// Atomically consume an occurrence.
    ///
    /// The timer is cancelled whether or not the claim wins; a missing timer
    /// is fine. A record that was removed but cannot be decoded is reported
    /// as [`SnoozeError::RecordCorrupt`] and stays removed.
    pub async fn claim(&self, id: &OccurrenceId) -> Result<ClaimOutcome> {
        let taken = self.repo.take_occurrence(id).await;
        self.timers.cancel(id.as_str());
        match taken? {
            Some(occurrence) => Ok(ClaimOutcome::Claimed(occurrence)),
            None => Ok(ClaimOutcome::AlreadyClaimed),
        }
    }

    /// Claim an occurrence and, if this call won, perform its action and
    /// advance its schedule.
    pub async fn fire_occurrence(&self, id: &OccurrenceId) -> Result<FireOutcome> {
        match self.claim(id).await? {
            ClaimOutcome::Claimed(occurrence) => self.consume(occurrence).await,
            ClaimOutcome::AlreadyClaimed => {
                debug!(occurrence_id = %id, "occurrence already claimed");
                Ok(FireOutcome::AlreadyClaimed)
            }
        }
    }

    /// Timer callback for an occurrence. Never fails; outcomes are logged.
    pub async fn handle_timer_fired(&self, id: &OccurrenceId) {
        match self.fire_occurrence(id).await {
            Ok(FireOutcome::Performed { occurrence, next }) => debug!(
                occurrence_id = %occurrence.id,
                next_occurrence_id = next.as_ref().map(|n| n.id.as_str()),
                "timer firing handled"
            ),
            Ok(FireOutcome::AlreadyClaimed) => {}
            Ok(FireOutcome::Orphaned(occurrence)) => {
                info!(occurrence_id = %occurrence.id, "discarded orphaned occurrence");
            }
            Err(e) => warn!(occurrence_id = %id, "timer firing failed: {e}"),
        }
    }

    /// Act on a claimed occurrence.
    async fn consume(&self, occurrence: Occurrence) -> Result<FireOutcome> {
        let mut owner_known = false;
        if let Some(schedule_id) = &occurrence.schedule_id {
            match self.repo.schedule(schedule_id).await {
                Ok(Some(_)) => owner_known = true,
                Ok(None) => {
                    info!(
                        occurrence_id = %occurrence.id,
                        schedule_id = %schedule_id,
                        "schedule gone, not firing"
                    );
                    return Ok(FireOutcome::Orphaned(occurrence));
                }
                // The claim already happened; fire and let reconciliation
                // repair the schedule.
                Err(e) => warn!(
                    occurrence_id = %occurrence.id,
                    schedule_id = %schedule_id,
                    "cannot read schedule, firing without advance: {e}"
                ),
            }
        }

        if let Err(e) = self.actions.perform_action(&occurrence.url) {
            warn!(occurrence_id = %occurrence.id, "action failed for {}: {e}", occurrence.url);
        }
        info!(occurrence_id = %occurrence.id, "woke {}", occurrence.url);

        let next = match (&occurrence.schedule_id, owner_known) {
            (Some(schedule_id), true) => match self.advance(schedule_id, occurrence.fires_at).await {
                Ok(next) => next,
                Err(e) => {
                    warn!(schedule_id = %schedule_id, "advance failed: {e}");
                    None
                }
            },
            _ => None,
        };
        Ok(FireOutcome::Performed { occurrence, next })
    }

    /// Move a schedule past `fired_at` and converge it to exactly one
    /// pending occurrence.
    ///
    /// Returns `None` if the schedule was deleted concurrently.
    pub async fn advance(&self, schedule_id: &ScheduleId, fired_at: i64) -> Result<Option<Occurrence>> {
        let Some(mut schedule) = self.repo.schedule(schedule_id).await? else {
            info!(schedule_id = %schedule_id, "schedule deleted before advance");
            return Ok(None);
        };

        let next_at = self.next_fire_at(&schedule.rule, self.now_ms().max(fired_at))?;
        schedule.next_occurrence_at = Some(next_at);
        self.repo.put_schedule(&schedule).await?;

        let scan = self.repo.scan().await?;
        let existing: Vec<Occurrence> = scan.occurrences_of(&schedule.id).cloned().collect();
        let converged = self.converge_schedule(&schedule, next_at, existing).await?;
        debug!(
            schedule_id = %schedule.id,
            next_at,
            "schedule advanced"
        );
        Ok(Some(converged.survivor))
    }

    /// Cancel an occurrence's timer and remove its record. Missing ids are fine.
    pub async fn delete_occurrence(&self, id: &OccurrenceId) -> Result<()> {
        self.timers.cancel(id.as_str());
        self.repo.remove(id.as_str()).await
    }

    /// Drop a pending occurrence without performing its action.
    ///
    /// A recurring occurrence is skipped rather than deleted: its schedule
    /// advances past it so it keeps exactly one pending occurrence. Returns
    /// that next occurrence if there is one.
    pub async fn skip_occurrence(&self, id: &OccurrenceId) -> Result<Option<Occurrence>> {
        let ClaimOutcome::Claimed(occurrence) = self.claim(id).await? else {
            return Ok(None);
        };
        let Some(schedule_id) = &occurrence.schedule_id else {
            info!(occurrence_id = %id, "cancelled snooze of {}", occurrence.url);
            return Ok(None);
        };
        let next = self.advance(schedule_id, occurrence.fires_at).await?;
        info!(
            occurrence_id = %id,
            schedule_id = %schedule_id,
            next_occurrence_id = next.as_ref().map(|n| n.id.as_str()),
            "skipped recurring occurrence"
        );
        Ok(next)
    }

    /// Delete a schedule and every pending occurrence it owns.
    ///
    /// The schedule record goes first, so an occurrence claimed while the
    /// cascade runs is treated as orphaned rather than advanced. Returns the
    /// number of occurrences removed.
    pub async fn delete_schedule(&self, id: &ScheduleId) -> Result<usize> {
        self.repo.remove(id.as_str()).await?;
        let scan = self.repo.scan().await?;
        let mut removed = 0;
        for occurrence in scan.occurrences_of(id) {
            self.delete_occurrence(&occurrence.id).await?;
            removed += 1;
        }
        info!(schedule_id = %id, removed, "schedule deleted");
        Ok(removed)
    }

    /// Arm a one-shot timer for `occurrence`, replacing any existing one.
    pub(crate) fn arm(&self, occurrence: &Occurrence) {
        self.timers.create(
            occurrence.id.as_str(),
            TimerSpec::At {
                fire_at_ms: occurrence.fires_at,
            },
        );
    }

    /// Arm `occurrence`'s timer unless one is live. Returns whether it was re-created.
    pub(crate) fn ensure_timer(&self, occurrence: &Occurrence) -> bool {
        if self.timers.get(occurrence.id.as_str()).is_some() {
            return false;
        }
        self.arm(occurrence);
        true
    }
}
