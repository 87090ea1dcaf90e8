//! Snooze scheduling and reconciliation.
//!
//! Records and recurrence math are pure; the engine ties them to a durable
//! store, a timer facility and an action executor, and the runner drives the
//! engine from timer events.

pub mod engine;
pub mod reconcile;
pub mod records;
pub mod recurrence;
pub mod runner;

pub use engine::{ClaimOutcome, FireOutcome, ReconciliationEngine};
pub use reconcile::ReconcileReport;
pub use records::{
    Occurrence, OccurrenceId, RecordKind, RecurrenceRule, Schedule, ScheduleId, TimeOfDay,
    WeekdaySet,
};
pub use recurrence::Preset;
pub use runner::{OVERDUE_CHECK_TIMER, SnoozeRunner};
