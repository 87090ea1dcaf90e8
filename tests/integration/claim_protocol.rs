//! The claim protocol: every occurrence is consumed at most once.

use crate::helpers::{Harness, MINUTE, base_now};
use serde_json::json;
use snoozer::SnoozeError;
use snoozer::scheduler::records::{Occurrence, OccurrenceId};
use snoozer::scheduler::{ClaimOutcome, FireOutcome};
use snoozer::store::DurableStore;
use snoozer::timer::TimerSpec;

#[tokio::test]
async fn one_off_creation_persists_and_arms_timer() {
    let h = Harness::at(base_now());
    let occ = h
        .engine
        .create_one_off_occurrence("https://example.com", Some("Example".into()), base_now() + 5 * MINUTE)
        .await
        .unwrap();

    assert_eq!(h.occurrences().await, vec![occ.clone()]);
    assert_eq!(
        h.timers.spec(occ.id.as_str()),
        Some(TimerSpec::At {
            fire_at_ms: base_now() + 5 * MINUTE
        })
    );
}

#[tokio::test]
async fn one_off_in_the_past_or_now_is_rejected() {
    let h = Harness::at(base_now());
    for fires_at in [base_now(), base_now() - MINUTE] {
        let err = h
            .engine
            .create_one_off_occurrence("https://example.com", None, fires_at)
            .await
            .unwrap_err();
        assert!(matches!(err, SnoozeError::InvalidTime));
    }
    assert!(h.occurrences().await.is_empty());
    assert!(h.timers.names().is_empty());
}

#[tokio::test]
async fn claim_returns_the_record_once() {
    let h = Harness::at(base_now());
    let occ = h
        .engine
        .create_one_off_occurrence("https://a", None, base_now() + MINUTE)
        .await
        .unwrap();

    assert_eq!(
        h.engine.claim(&occ.id).await.unwrap(),
        ClaimOutcome::Claimed(occ.clone())
    );
    assert_eq!(
        h.engine.claim(&occ.id).await.unwrap(),
        ClaimOutcome::AlreadyClaimed
    );
    assert!(h.timers.spec(occ.id.as_str()).is_none());
    assert!(h.occurrences().await.is_empty());
}

#[tokio::test]
async fn concurrent_fires_perform_the_action_once() {
    let h = Harness::at(base_now());
    let occ = h
        .engine
        .create_one_off_occurrence("https://a", None, base_now() + MINUTE)
        .await
        .unwrap();
    h.clock.advance(2 * MINUTE);

    let (timer_path, sweep_path) = tokio::join!(
        h.engine.fire_occurrence(&occ.id),
        h.engine.overdue_check()
    );

    let timer_won = matches!(timer_path.unwrap(), FireOutcome::Performed { .. });
    assert_eq!(usize::from(timer_won) + sweep_path.fired, 1);
    assert_eq!(h.actions.opened(), vec!["https://a".to_owned()]);
}

#[tokio::test]
async fn repeated_timer_callbacks_fire_once() {
    let h = Harness::at(base_now());
    let occ = h
        .engine
        .create_one_off_occurrence("https://a", None, base_now() + MINUTE)
        .await
        .unwrap();
    h.clock.advance(MINUTE);

    h.engine.handle_timer_fired(&occ.id).await;
    h.engine.handle_timer_fired(&occ.id).await;

    assert_eq!(h.actions.opened(), vec!["https://a".to_owned()]);
}

#[tokio::test]
async fn missing_occurrence_is_a_no_op() {
    let h = Harness::at(base_now());
    let id = OccurrenceId::generate();
    assert_eq!(
        h.engine.fire_occurrence(&id).await.unwrap(),
        FireOutcome::AlreadyClaimed
    );
    assert!(h.actions.opened().is_empty());
}

#[tokio::test]
async fn corrupt_record_is_removed_on_claim_without_action() {
    let h = Harness::at(base_now());
    let id = OccurrenceId::generate();
    h.store
        .set(id.as_str(), json!({"firesAt": base_now()}))
        .await
        .unwrap();

    let err = h.engine.fire_occurrence(&id).await.unwrap_err();
    assert!(matches!(err, SnoozeError::RecordCorrupt { .. }));
    assert!(h.store.get(id.as_str()).await.unwrap().is_none());
    assert!(h.actions.opened().is_empty());
}

#[tokio::test]
async fn claim_failure_leaves_record_for_later() {
    let h = Harness::at(base_now());
    let occ = Occurrence::one_off("https://a", None, base_now() - MINUTE);
    h.seed_occurrence(&occ).await;
    h.store.break_key(occ.id.as_str());

    let err = h.engine.fire_occurrence(&occ.id).await.unwrap_err();
    assert!(matches!(err, SnoozeError::StoreUnavailable(_)));
    assert!(h.actions.opened().is_empty());
    assert_eq!(h.occurrences().await, vec![occ]);
}

#[tokio::test]
async fn delete_occurrence_is_idempotent() {
    let h = Harness::at(base_now());
    let occ = h
        .engine
        .create_one_off_occurrence("https://a", None, base_now() + MINUTE)
        .await
        .unwrap();

    h.engine.delete_occurrence(&occ.id).await.unwrap();
    h.engine.delete_occurrence(&occ.id).await.unwrap();
    assert!(h.occurrences().await.is_empty());
    assert!(h.timers.names().is_empty());
}
