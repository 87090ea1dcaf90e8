//! Catch-up sweeps.
//!
//! [`ReconciliationEngine::reconcile_all`] runs once per process start;
//! [`ReconciliationEngine::overdue_check`] runs periodically as a safety net
//! for timers that never fired. Both isolate failures per record: a bad or
//! unreachable record is logged and skipped, never allowed to stop the sweep.

use super::engine::{FireOutcome, ReconciliationEngine};
use crate::error::Result;
use crate::scheduler::records::{Occurrence, RecordKind, Schedule, ScheduleId};
use crate::store::{CorruptRecord, StoreScan};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Due occurrences claimed and fired by the sweep.
    pub fired: usize,
    /// Future occurrences whose lost timer was re-created.
    pub rearmed: usize,
    /// Schedules whose cached next occurrence was missing or past.
    pub schedules_advanced: usize,
    /// Occurrences created for schedules that had none.
    pub created: usize,
    /// Duplicate or stale occurrences of a schedule that were removed.
    pub pruned: usize,
    /// Occurrences of deleted schedules that were removed unfired.
    pub orphans_discarded: usize,
    /// Undecodable records that were removed.
    pub corrupt_discarded: usize,
    /// Per-record failures that were logged and skipped.
    pub failures: usize,
}

/// Outcome of converging one schedule.
#[derive(Debug, Clone)]
pub(crate) struct Convergence {
    pub survivor: Occurrence,
    pub pruned: usize,
    pub created: bool,
    pub rearmed: bool,
}

impl ReconciliationEngine {
    /// Full start-up reconciliation.
    ///
    /// Pass 1 fires due one-off occurrences and re-arms future ones. Pass 2
    /// brings every schedule's cached next occurrence up to date and leaves
    /// it with exactly one pending occurrence with a live timer; missed
    /// recurring firings are skipped, not replayed. Occurrences of deleted
    /// schedules and undecodable records are removed.
    pub async fn reconcile_all(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let Some(scan) = self.scan_for_sweep(&mut report).await else {
            return report;
        };
        let now = self.now_ms();

        for corrupt in &scan.corrupt {
            self.discard_corrupt(corrupt, &mut report).await;
        }

        for occurrence in scan.occurrences.iter().filter(|o| !o.is_recurring()) {
            self.sweep_occurrence(occurrence, now, &mut report).await;
        }

        let live: BTreeSet<&ScheduleId> = scan.schedules.iter().map(|s| &s.id).collect();
        for schedule in &scan.schedules {
            if let Err(e) = self.reconcile_schedule(schedule, &scan, now, &mut report).await {
                report.failures += 1;
                warn!(schedule_id = %schedule.id, "schedule reconciliation failed: {e}");
            }
        }

        for orphan in scan
            .occurrences
            .iter()
            .filter(|o| o.schedule_id.as_ref().is_some_and(|id| !live.contains(id)))
        {
            match self.delete_occurrence(&orphan.id).await {
                Ok(()) => {
                    report.orphans_discarded += 1;
                    info!(occurrence_id = %orphan.id, "discarded orphaned occurrence");
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(occurrence_id = %orphan.id, "cannot discard orphan: {e}");
                }
            }
        }

        info!(?report, "start-up reconciliation complete");
        report
    }

    /// Periodic safety net: claim every due occurrence (one-off or recurring)
    /// regardless of its timer, and re-arm future ones whose timer is missing.
    pub async fn overdue_check(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let Some(scan) = self.scan_for_sweep(&mut report).await else {
            return report;
        };
        let now = self.now_ms();

        for corrupt in scan.corrupt.iter().filter(|c| c.kind == RecordKind::Occurrence) {
            self.discard_corrupt(corrupt, &mut report).await;
        }
        // Advancing a schedule converges its occurrences, so later snapshot
        // entries for it may already be gone.
        let mut advanced: BTreeSet<ScheduleId> = BTreeSet::new();
        for occurrence in &scan.occurrences {
            if let Some(schedule_id) = &occurrence.schedule_id {
                if advanced.contains(schedule_id) {
                    continue;
                }
                if self.sweep_occurrence(occurrence, now, &mut report).await {
                    advanced.insert(schedule_id.clone());
                }
            } else {
                self.sweep_occurrence(occurrence, now, &mut report).await;
            }
        }

        if report != ReconcileReport::default() {
            info!(?report, "overdue check acted");
        } else {
            debug!("overdue check found nothing to do");
        }
        report
    }

    async fn scan_for_sweep(&self, report: &mut ReconcileReport) -> Option<StoreScan> {
        match self.repository().scan().await {
            Ok(scan) => Some(scan),
            Err(e) => {
                report.failures += 1;
                warn!("cannot scan store, sweep skipped: {e}");
                None
            }
        }
    }

    /// Fire `occurrence` if due, otherwise make sure its timer is live.
    /// Returns whether this call fired it.
    async fn sweep_occurrence(&self, occurrence: &Occurrence, now: i64, report: &mut ReconcileReport) -> bool {
        if !occurrence.is_due(now) {
            if self.ensure_timer(occurrence) {
                report.rearmed += 1;
                debug!(occurrence_id = %occurrence.id, "re-armed lost timer");
            }
            return false;
        }

        match self.fire_occurrence(&occurrence.id).await {
            Ok(FireOutcome::Performed { .. }) => {
                report.fired += 1;
                return true;
            }
            Ok(FireOutcome::AlreadyClaimed) => {}
            Ok(FireOutcome::Orphaned(_)) => report.orphans_discarded += 1,
            Err(e) => {
                report.failures += 1;
                warn!(occurrence_id = %occurrence.id, "cannot fire overdue occurrence: {e}");
            }
        }
        false
    }

    async fn reconcile_schedule(
        &self,
        schedule: &Schedule,
        scan: &StoreScan,
        now: i64,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let mut schedule = schedule.clone();
        let next_at = match schedule.next_occurrence_at {
            Some(at) if at > now => at,
            _ => {
                let at = self.next_fire_at(&schedule.rule, now)?;
                schedule.next_occurrence_at = Some(at);
                self.repository().put_schedule(&schedule).await?;
                report.schedules_advanced += 1;
                debug!(schedule_id = %schedule.id, next_at = at, "recomputed next occurrence");
                at
            }
        };

        let existing: Vec<Occurrence> = scan.occurrences_of(&schedule.id).cloned().collect();
        let converged = self.converge_schedule(&schedule, next_at, existing).await?;
        report.pruned += converged.pruned;
        report.created += usize::from(converged.created);
        report.rearmed += usize::from(converged.rearmed);
        Ok(())
    }

    /// Leave `schedule` with exactly one pending occurrence at `next_at`.
    ///
    /// `existing` are the schedule's occurrences as last read. Among those at
    /// `next_at` the lexicographically smallest id survives; the rest, and
    /// any at other times, are removed with their timers. If none is at
    /// `next_at` one is created. The survivor always ends with a live timer.
    pub(crate) async fn converge_schedule(
        &self,
        schedule: &Schedule,
        next_at: i64,
        mut existing: Vec<Occurrence>,
    ) -> Result<Convergence> {
        existing.sort_by(|a, b| a.id.cmp(&b.id));
        let (mut matching, stale): (Vec<Occurrence>, Vec<Occurrence>) =
            existing.into_iter().partition(|o| o.fires_at == next_at);

        let mut pruned = 0;
        for occurrence in stale.iter().chain(matching.iter().skip(1)) {
            self.delete_occurrence(&occurrence.id).await?;
            pruned += 1;
            debug!(
                schedule_id = %schedule.id,
                occurrence_id = %occurrence.id,
                fires_at = occurrence.fires_at,
                "pruned surplus occurrence"
            );
        }

        if matching.is_empty() {
            let occurrence = Occurrence::for_schedule(schedule, next_at);
            self.repository().put_occurrence(&occurrence).await?;
            self.arm(&occurrence);
            return Ok(Convergence {
                survivor: occurrence,
                pruned,
                created: true,
                rearmed: false,
            });
        }

        let survivor = matching.swap_remove(0);
        let rearmed = self.ensure_timer(&survivor);
        Ok(Convergence {
            survivor,
            pruned,
            created: false,
            rearmed,
        })
    }

    async fn discard_corrupt(&self, corrupt: &CorruptRecord, report: &mut ReconcileReport) {
        warn!(
            record_id = %corrupt.id,
            kind = ?corrupt.kind,
            "discarding corrupt record: {}",
            corrupt.reason
        );
        self.timers().cancel(&corrupt.id);
        match self.repository().remove(&corrupt.id).await {
            Ok(()) => report.corrupt_discarded += 1,
            Err(e) => {
                report.failures += 1;
                warn!(record_id = %corrupt.id, "cannot discard corrupt record: {e}");
            }
        }
    }
}
