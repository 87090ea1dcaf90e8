//! Start-up reconciliation and the periodic overdue check.

use crate::helpers::{DAY, Harness, MINUTE, base_now};
use chrono::{Datelike, TimeZone, Timelike, Utc, Weekday};
use serde_json::json;
use snoozer::scheduler::records::{
    Occurrence, OccurrenceId, RecurrenceRule, Schedule, TimeOfDay, WeekdaySet,
};
use snoozer::store::DurableStore;
use snoozer::timer::TimerSpec;

fn weekly(days: &[Weekday], hour: u8, minute: u8) -> RecurrenceRule {
    RecurrenceRule::Weekly {
        days: WeekdaySet::from_days(days),
        time: TimeOfDay::new(hour, minute).unwrap(),
    }
}

#[tokio::test]
async fn restart_recreates_lost_timer_without_firing() {
    let h = Harness::at(base_now());
    let occ = h
        .engine
        .create_one_off_occurrence("https://later", None, base_now() + 5 * MINUTE)
        .await
        .unwrap();

    h.timers.clear();
    let report = h.engine.reconcile_all().await;

    assert_eq!(report.rearmed, 1);
    assert_eq!(report.fired, 0);
    assert!(h.actions.opened().is_empty());
    assert_eq!(h.occurrences().await, vec![occ.clone()]);
    assert_eq!(
        h.timers.spec(occ.id.as_str()),
        Some(TimerSpec::At {
            fire_at_ms: occ.fires_at
        })
    );
}

#[tokio::test]
async fn overdue_one_off_fires_at_startup() {
    let h = Harness::at(base_now());
    let occ = Occurrence::one_off("https://missed", None, base_now() - 3 * DAY);
    h.seed_occurrence(&occ).await;

    let report = h.engine.reconcile_all().await;

    assert_eq!(report.fired, 1);
    assert_eq!(h.actions.opened(), vec!["https://missed".to_owned()]);
    assert!(h.occurrences().await.is_empty());
}

#[tokio::test]
async fn weekly_schedule_missed_today_moves_to_next_week() {
    let h = Harness::at(base_now());
    // Wednesday 09:59, one minute before "now".
    let missed_at = base_now() - MINUTE;
    let mut schedule = Schedule::new("https://standup", None, weekly(&[Weekday::Wed], 9, 59));
    schedule.next_occurrence_at = Some(missed_at);
    h.seed_schedule(&schedule).await;
    let stale = Occurrence::for_schedule(&schedule, missed_at);
    h.seed_occurrence(&stale).await;

    let report = h.engine.reconcile_all().await;

    assert!(h.actions.opened().is_empty(), "missed recurring firing replayed");
    assert_eq!(report.schedules_advanced, 1);
    let schedules = h.schedules().await;
    let next = schedules[0].next_occurrence_at.unwrap();
    assert_eq!(next, missed_at + 7 * DAY);

    let occurrences = h.occurrences().await;
    assert_eq!(occurrences.len(), 1);
    assert_ne!(occurrences[0].id, stale.id);
    assert_eq!(occurrences[0].fires_at, next);
    assert!(h.timers.spec(occurrences[0].id.as_str()).is_some());
    assert!(h.timers.spec(stale.id.as_str()).is_none());
}

#[tokio::test]
async fn duplicate_occurrences_converge_to_lowest_id() {
    let h = Harness::at(base_now());
    let next_at = base_now() + DAY;
    let mut schedule = Schedule::new("https://dup", None, weekly(&[Weekday::Thu], 10, 0));
    schedule.next_occurrence_at = Some(next_at);
    h.seed_schedule(&schedule).await;

    let mut dupes: Vec<Occurrence> = (0..3)
        .map(|_| Occurrence::for_schedule(&schedule, next_at))
        .collect();
    for occ in &dupes {
        h.seed_occurrence(occ).await;
    }
    dupes.sort_by(|a, b| a.id.cmp(&b.id));

    let report = h.engine.reconcile_all().await;

    assert_eq!(report.pruned, 2);
    assert_eq!(h.occurrences().await, vec![dupes[0].clone()]);
    assert_eq!(h.timers.names(), vec![dupes[0].id.to_string()]);
    assert!(h.actions.opened().is_empty());
}

#[tokio::test]
async fn schedule_without_occurrence_gets_one() {
    let h = Harness::at(base_now());
    let schedule = Schedule::new("https://monthly", None, RecurrenceRule::Monthly {
        day: 31,
        time: TimeOfDay::new(8, 0).unwrap(),
    });
    h.seed_schedule(&schedule).await;

    let report = h.engine.reconcile_all().await;

    assert_eq!(report.schedules_advanced, 1);
    assert_eq!(report.created, 1);
    let occurrences = h.occurrences().await;
    assert_eq!(occurrences.len(), 1);
    let fires = Utc.timestamp_millis_opt(occurrences[0].fires_at).unwrap();
    assert_eq!((fires.month(), fires.day(), fires.hour()), (10, 31, 8));
    assert_eq!(
        h.schedules().await[0].next_occurrence_at,
        Some(occurrences[0].fires_at)
    );
}

#[tokio::test]
async fn orphaned_occurrence_is_discarded_without_action() {
    let h = Harness::at(base_now());
    let schedule = Schedule::new("https://gone", None, weekly(&[Weekday::Mon], 9, 0));
    let due = Occurrence::for_schedule(&schedule, base_now() - MINUTE);
    let future = Occurrence::for_schedule(&schedule, base_now() + DAY);
    h.seed_occurrence(&due).await;
    h.seed_occurrence(&future).await;

    let report = h.engine.reconcile_all().await;

    assert_eq!(report.orphans_discarded, 2);
    assert!(h.occurrences().await.is_empty());
    assert!(h.actions.opened().is_empty());
}

#[tokio::test]
async fn corrupt_records_are_discarded_and_others_still_reconciled() {
    let h = Harness::at(base_now());
    h.store
        .set("snoozedTab_broken", json!({"url": "", "firesAt": 5}))
        .await
        .unwrap();
    h.store
        .set("recurringSnooze_broken", json!({"url": "https://x"}))
        .await
        .unwrap();
    h.store.set("settings", json!({"theme": "dark"})).await.unwrap();
    let occ = Occurrence::one_off("https://ok", None, base_now() - MINUTE);
    h.seed_occurrence(&occ).await;

    let report = h.engine.reconcile_all().await;

    assert_eq!(report.corrupt_discarded, 2);
    assert_eq!(report.fired, 1);
    let keys: Vec<String> = h.store.get_all().await.unwrap().into_keys().collect();
    assert_eq!(keys, vec!["settings".to_owned()]);
}

#[tokio::test]
async fn store_failure_on_one_record_does_not_stop_the_sweep() {
    let h = Harness::at(base_now());
    let stuck = Occurrence::one_off("https://stuck", None, base_now() - 2 * MINUTE);
    let fine = Occurrence::one_off("https://fine", None, base_now() - MINUTE);
    h.seed_occurrence(&stuck).await;
    h.seed_occurrence(&fine).await;
    h.store.break_key(stuck.id.as_str());

    let report = h.engine.reconcile_all().await;

    assert_eq!(report.failures, 1);
    assert_eq!(report.fired, 1);
    assert_eq!(h.actions.opened(), vec!["https://fine".to_owned()]);
    assert_eq!(h.occurrences().await, vec![stuck]);
}

#[tokio::test]
async fn overdue_check_claims_due_occurrences_of_both_kinds() {
    let h = Harness::at(base_now());
    let (schedule, recurring) = h
        .engine
        .create_recurring_schedule("https://weekly", None, weekly(&[Weekday::Wed], 10, 30))
        .await
        .unwrap();
    let one_off = h
        .engine
        .create_one_off_occurrence("https://once", None, base_now() + 10 * MINUTE)
        .await
        .unwrap();
    let later = h
        .engine
        .create_one_off_occurrence("https://later", None, base_now() + DAY)
        .await
        .unwrap();

    // Timers silently lost, then time passes both fire times.
    h.timers.clear();
    h.clock.advance(45 * MINUTE);
    let report = h.engine.overdue_check().await;

    assert_eq!(report.fired, 2);
    assert_eq!(report.rearmed, 1);
    let mut opened = h.actions.opened();
    opened.sort();
    assert_eq!(opened, vec!["https://once".to_owned(), "https://weekly".to_owned()]);

    let remaining = h.occurrences().await;
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().any(|o| o.id == later.id));
    let next = remaining
        .iter()
        .find(|o| o.schedule_id.as_ref() == Some(&schedule.id))
        .unwrap();
    assert_eq!(next.fires_at, recurring.fires_at + 7 * DAY);
    assert!(h.timers.spec(later.id.as_str()).is_some());
    assert!(h.timers.spec(next.id.as_str()).is_some());
    assert!(h.timers.spec(one_off.id.as_str()).is_none());
}

#[tokio::test]
async fn overdue_check_does_not_rearm_siblings_pruned_by_an_advance() {
    let h = Harness::at(base_now());
    let (schedule, due) = h
        .engine
        .create_recurring_schedule("https://weekly", None, weekly(&[Weekday::Wed], 10, 30))
        .await
        .unwrap();
    // Sorts after the generated id, so the sweep reaches it after the advance.
    let stray = Occurrence {
        id: OccurrenceId::parse("snoozedTab_zz-stray").unwrap(),
        ..Occurrence::for_schedule(&schedule, due.fires_at + 3 * DAY)
    };
    h.seed_occurrence(&stray).await;

    h.timers.clear();
    h.clock.advance(45 * MINUTE);
    let report = h.engine.overdue_check().await;

    assert_eq!(report.fired, 1);
    assert_eq!(report.rearmed, 0);
    let remaining = h.occurrences().await;
    assert_eq!(remaining.len(), 1);
    assert_ne!(remaining[0].id, stray.id);
    assert_eq!(remaining[0].fires_at, due.fires_at + 7 * DAY);
    assert_eq!(h.timers.names(), vec![remaining[0].id.to_string()]);
}

#[tokio::test]
async fn overdue_check_with_nothing_due_only_rearms() {
    let h = Harness::at(base_now());
    let occ = h
        .engine
        .create_one_off_occurrence("https://a", None, base_now() + DAY)
        .await
        .unwrap();

    let report = h.engine.overdue_check().await;
    assert_eq!(report, Default::default());

    h.timers.clear();
    let report = h.engine.overdue_check().await;
    assert_eq!(report.rearmed, 1);
    assert!(h.timers.spec(occ.id.as_str()).is_some());
}
