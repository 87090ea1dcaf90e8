//! Recurring schedules: creation, firing, advance and cascade delete.

use crate::helpers::{DAY, HOUR, Harness, MINUTE, base_now};
use chrono::{TimeZone, Weekday};
use chrono_tz::America::New_York;
use snoozer::SnoozeError;
use snoozer::scheduler::FireOutcome;
use snoozer::scheduler::records::{
    Occurrence, RecurrenceRule, Schedule, TimeOfDay, WeekdaySet,
};

fn weekly(days: &[Weekday], hour: u8, minute: u8) -> RecurrenceRule {
    RecurrenceRule::Weekly {
        days: WeekdaySet::from_days(days),
        time: TimeOfDay::new(hour, minute).unwrap(),
    }
}

#[tokio::test]
async fn creation_links_schedule_and_first_occurrence() {
    let h = Harness::at(base_now());
    let (schedule, occ) = h
        .engine
        .create_recurring_schedule("https://w", Some("W".into()), weekly(&[Weekday::Fri, Weekday::Mon], 8, 0))
        .await
        .unwrap();

    // Wednesday 10:00 -> Friday 08:00.
    assert_eq!(occ.fires_at, base_now() + 2 * DAY - 2 * HOUR);
    assert_eq!(schedule.next_occurrence_at, Some(occ.fires_at));
    assert_eq!(occ.schedule_id.as_ref(), Some(&schedule.id));
    assert_eq!(occ.title.as_deref(), Some("W"));
    assert_eq!(h.schedules().await, vec![schedule]);
    assert!(h.timers.spec(occ.id.as_str()).is_some());
}

#[tokio::test]
async fn invalid_rules_are_rejected_before_anything_is_stored() {
    let h = Harness::at(base_now());
    let no_days = RecurrenceRule::Weekly {
        days: WeekdaySet::default(),
        time: TimeOfDay::new(9, 0).unwrap(),
    };
    let bad_day = RecurrenceRule::Monthly {
        day: 32,
        time: TimeOfDay::new(9, 0).unwrap(),
    };
    for rule in [no_days, bad_day] {
        let err = h
            .engine
            .create_recurring_schedule("https://x", None, rule)
            .await
            .unwrap_err();
        assert!(matches!(err, SnoozeError::InvalidRule(_)));
    }
    assert!(h.schedules().await.is_empty());
    assert!(h.occurrences().await.is_empty());
}

#[tokio::test]
async fn firing_leaves_exactly_one_later_occurrence() {
    let h = Harness::at(base_now());
    let (schedule, first) = h
        .engine
        .create_recurring_schedule("https://w", None, weekly(&[Weekday::Wed, Weekday::Sat], 10, 30))
        .await
        .unwrap();
    h.clock.set(first.fires_at);

    h.engine.handle_timer_fired(&first.id).await;

    assert_eq!(h.actions.opened(), vec!["https://w".to_owned()]);
    let occurrences = h.occurrences().await;
    assert_eq!(occurrences.len(), 1);
    let next = &occurrences[0];
    assert_eq!(next.schedule_id.as_ref(), Some(&schedule.id));
    assert_eq!(next.fires_at, first.fires_at + 3 * DAY);
    assert_eq!(h.schedules().await[0].next_occurrence_at, Some(next.fires_at));
    assert!(h.timers.spec(next.id.as_str()).is_some());
    assert!(h.timers.spec(first.id.as_str()).is_none());
}

#[tokio::test]
async fn late_firing_skips_to_the_next_future_slot() {
    let h = Harness::at(base_now());
    let (_, first) = h
        .engine
        .create_recurring_schedule("https://daily", None, weekly(&[
            Weekday::Sun,
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
        ], 12, 0))
        .await
        .unwrap();
    // The timer was two and a half days late.
    h.clock.set(first.fires_at + 2 * DAY + 12 * HOUR);

    let outcome = h.engine.fire_occurrence(&first.id).await.unwrap();

    let FireOutcome::Performed { next: Some(next), .. } = outcome else {
        panic!("expected a performed firing with a next occurrence, got {outcome:?}");
    };
    assert_eq!(next.fires_at, first.fires_at + 3 * DAY);
    assert_eq!(h.actions.opened().len(), 1);
}

#[tokio::test]
async fn advance_reuses_an_occurrence_a_sweep_already_created() {
    let h = Harness::at(base_now());
    let (schedule, first) = h
        .engine
        .create_recurring_schedule("https://w", None, weekly(&[Weekday::Thu], 9, 0))
        .await
        .unwrap();
    h.clock.set(first.fires_at);
    let expected_next = first.fires_at + 7 * DAY;

    // Another path already materialized next week's occurrence.
    let racer = Occurrence::for_schedule(&schedule, expected_next);
    h.seed_occurrence(&racer).await;
    h.engine.claim(&first.id).await.unwrap();

    let next = h.engine.advance(&schedule.id, first.fires_at).await.unwrap().unwrap();

    assert_eq!(next, racer);
    assert_eq!(h.occurrences().await, vec![racer.clone()]);
    assert!(h.timers.spec(racer.id.as_str()).is_some());
}

#[tokio::test]
async fn advance_after_concurrent_delete_creates_nothing() {
    let h = Harness::at(base_now());
    let (schedule, first) = h
        .engine
        .create_recurring_schedule("https://w", None, weekly(&[Weekday::Thu], 9, 0))
        .await
        .unwrap();
    h.engine.claim(&first.id).await.unwrap();
    h.engine.repository().remove(schedule.id.as_str()).await.unwrap();

    assert_eq!(h.engine.advance(&schedule.id, first.fires_at).await.unwrap(), None);
    assert!(h.occurrences().await.is_empty());
}

#[tokio::test]
async fn firing_an_occurrence_of_a_deleted_schedule_is_orphaned() {
    let h = Harness::at(base_now());
    let schedule = Schedule::new("https://gone", None, weekly(&[Weekday::Wed], 9, 0));
    let occ = Occurrence::for_schedule(&schedule, base_now() - MINUTE);
    h.seed_occurrence(&occ).await;

    let outcome = h.engine.fire_occurrence(&occ.id).await.unwrap();

    assert_eq!(outcome, FireOutcome::Orphaned(occ));
    assert!(h.actions.opened().is_empty());
    assert!(h.occurrences().await.is_empty());
}

#[tokio::test]
async fn delete_schedule_cascades_to_pending_occurrences() {
    let h = Harness::at(base_now());
    let (schedule, occ) = h
        .engine
        .create_recurring_schedule("https://w", None, weekly(&[Weekday::Mon], 9, 0))
        .await
        .unwrap();
    let stray = Occurrence::for_schedule(&schedule, occ.fires_at + 7 * DAY);
    h.seed_occurrence(&stray).await;
    let unrelated = h
        .engine
        .create_one_off_occurrence("https://other", None, base_now() + HOUR)
        .await
        .unwrap();

    assert_eq!(h.engine.delete_schedule(&schedule.id).await.unwrap(), 2);
    assert_eq!(h.engine.delete_schedule(&schedule.id).await.unwrap(), 0);

    assert!(h.schedules().await.is_empty());
    assert_eq!(h.occurrences().await, vec![unrelated.clone()]);
    assert_eq!(h.timers.names(), vec![unrelated.id.to_string()]);
}

#[tokio::test]
async fn monthly_day_31_clamps_in_short_months() {
    // 2026-11-15 12:00 UTC; November has 30 days.
    let now = chrono::Utc
        .with_ymd_and_hms(2026, 11, 15, 12, 0, 0)
        .unwrap()
        .timestamp_millis();
    let h = Harness::at(now);
    let (_, occ) = h
        .engine
        .create_recurring_schedule("https://rent", None, RecurrenceRule::Monthly {
            day: 31,
            time: TimeOfDay::new(9, 0).unwrap(),
        })
        .await
        .unwrap();

    let nov_30 = chrono::Utc.with_ymd_and_hms(2026, 11, 30, 9, 0, 0).unwrap();
    assert_eq!(occ.fires_at, nov_30.timestamp_millis());

    h.clock.set(occ.fires_at);
    let FireOutcome::Performed { next: Some(next), .. } =
        h.engine.fire_occurrence(&occ.id).await.unwrap()
    else {
        panic!("expected next occurrence");
    };
    let dec_31 = chrono::Utc.with_ymd_and_hms(2026, 12, 31, 9, 0, 0).unwrap();
    assert_eq!(next.fires_at, dec_31.timestamp_millis());
}

#[tokio::test]
async fn weekly_rule_keeps_wall_clock_time_across_dst() {
    // Sat 2026-10-31 12:00 in New York (EDT); DST ends Sunday 2026-11-01.
    let now = New_York
        .with_ymd_and_hms(2026, 10, 31, 12, 0, 0)
        .unwrap()
        .timestamp_millis();
    let h = Harness::in_zone(now, New_York);
    let (_, occ) = h
        .engine
        .create_recurring_schedule("https://news", None, weekly(&[Weekday::Mon], 9, 0))
        .await
        .unwrap();

    let monday_9am_est = New_York.with_ymd_and_hms(2026, 11, 2, 9, 0, 0).unwrap();
    assert_eq!(occ.fires_at, monday_9am_est.timestamp_millis());
}
