//! Integration tests for periodic quotas backed by SQLite

use allowance_rs::config::Config;
use allowance_rs::quota::{
    parse_utc_offset, CalendarBoundary, ConsumeOutcome, ManualClock, ParticipationQuota,
    PeriodicQuota, QuotaManager, QuotaState,
};
use allowance_rs::store::{QuotaStore, SqliteQuotaStore};
use allowance_rs::AllowanceError;
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

async fn setup_test_manager() -> (QuotaManager, Arc<ManualClock>, Arc<SqliteQuotaStore>) {
    let store = Arc::new(SqliteQuotaStore::connect("sqlite::memory:").await.unwrap());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap(),
    ));
    let manager = QuotaManager::periodic(store.clone()).with_clock(clock.clone());
    (manager, clock, store)
}

#[tokio::test]
async fn test_fresh_participant_can_act_once() {
    let (manager, _clock, _store) = setup_test_manager().await;

    let quota = manager.get_quota("alice").await.unwrap();
    assert_eq!(quota.allowance_left(), 1);
    assert_eq!(quota.extra_granted(), 0);
    assert!(quota.last_action_at().is_none());
    assert!(manager.can_act(&quota));
    assert!(!manager.has_time_bonus(&quota));
}

#[tokio::test]
async fn test_exhaust_then_bonus_next_day() {
    let (manager, clock, store) = setup_test_manager().await;

    let outcome = manager.consume_for("alice").await.unwrap();
    assert_eq!(outcome, ConsumeOutcome::Allowance { remaining: 0 });

    let stored = store.load("alice").await.unwrap().unwrap();
    assert_eq!(stored.allowance_left(), 0);
    assert_eq!(
        stored.last_action_at(),
        Some(Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap())
    );

    // Same day: refused
    clock.advance(Duration::hours(5));
    let err = manager.consume_for("alice").await.unwrap_err();
    assert!(matches!(err, AllowanceError::QuotaExhausted { .. }));
    assert!(!manager.can_participant_act("alice").await.unwrap());

    // Next day: bonus
    clock.advance(Duration::days(1));
    assert!(manager.can_participant_act("alice").await.unwrap());

    let outcome = manager.consume_for("alice").await.unwrap();
    assert_eq!(outcome, ConsumeOutcome::TimeBonus);

    let stored = store.load("alice").await.unwrap().unwrap();
    assert_eq!(stored.allowance_left(), 0);
    assert_eq!(
        stored.last_action_at(),
        Some(Utc.with_ymd_and_hms(2024, 3, 11, 14, 0, 0).unwrap())
    );

    // Bonus is spent for the rest of that day
    let err = manager.consume_for("alice").await.unwrap_err();
    assert!(err.is_quota_exhausted());
}

#[tokio::test]
async fn test_grant_extra_then_base_consumes() {
    let (manager, _clock, store) = setup_test_manager().await;

    let quota = manager.grant_extra_for("bob", 3).await.unwrap();
    assert_eq!(quota.allowance_left(), 4);
    assert_eq!(quota.extra_granted(), 3);
    assert!(quota.last_action_at().is_none());

    for expected in [3, 2, 1] {
        let outcome = manager.consume_for("bob").await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::Allowance { remaining: expected });
    }

    let stored = store.load("bob").await.unwrap().unwrap();
    assert_eq!(stored.allowance_left(), 1);
    assert_eq!(stored.extra_granted(), 3);
    assert_eq!(manager.state(&stored), QuotaState::HasAllowance);
}

#[tokio::test]
async fn test_never_acted_participant_gets_no_bonus() {
    let (manager, clock, store) = setup_test_manager().await;

    // Exhausted record that never acted
    store
        .save(&ParticipationQuota::from_parts("carol", 0, None, 0))
        .await
        .unwrap();

    clock.advance(Duration::days(3));
    let loaded = manager.get_quota("carol").await.unwrap();
    assert!(!manager.has_time_bonus(&loaded));
    assert_eq!(manager.state(&loaded), QuotaState::Exhausted);

    let err = manager.consume_for("carol").await.unwrap_err();
    assert!(err.is_quota_exhausted());

    // Refusal leaves the stored record untouched
    let stored = store.load("carol").await.unwrap().unwrap();
    assert!(stored.last_action_at().is_none());
}

#[tokio::test]
async fn test_boundary_uses_configured_offset() {
    let store = Arc::new(SqliteQuotaStore::connect("sqlite::memory:").await.unwrap());
    // 23:30 local time at +02:00
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 10, 21, 30, 0).unwrap(),
    ));
    let boundary = CalendarBoundary::daily(parse_utc_offset("+02:00").unwrap());
    let manager = QuotaManager::new(store, Arc::new(PeriodicQuota::new(boundary)))
        .with_clock(clock.clone());

    manager.consume_for("dave").await.unwrap();
    assert!(!manager.can_participant_act("dave").await.unwrap());

    // 00:30 local: a new day in +02:00, still the same day in UTC
    clock.advance(Duration::hours(1));
    assert!(manager.can_participant_act("dave").await.unwrap());
    assert_eq!(
        manager.consume_for("dave").await.unwrap(),
        ConsumeOutcome::TimeBonus
    );
}

#[tokio::test]
async fn test_batch_commits_together() {
    let (manager, _clock, store) = setup_test_manager().await;

    let mut batch = manager.batch();
    batch.grant_extra("alice", 2).await.unwrap();
    batch.consume("bob").await.unwrap();
    assert_eq!(batch.len(), 2);

    // Nothing persisted before commit
    assert!(store.list().await.unwrap().is_empty());

    assert_eq!(batch.commit().await.unwrap().len(), 2);

    let all = store.list().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].allowance_left(), 3);
    assert_eq!(all[1].allowance_left(), 0);
}

#[tokio::test]
async fn test_two_loaded_copies_admit_once() {
    let (manager, _clock, store) = setup_test_manager().await;
    manager.grant_extra_for("frank", 0).await.unwrap();

    let mut first = manager.get_quota("frank").await.unwrap();
    let mut second = manager.get_quota("frank").await.unwrap();

    manager.consume(&mut first).await.unwrap();
    let err = manager.consume(&mut second).await.unwrap_err();
    assert!(matches!(err, AllowanceError::Conflict { .. }));

    let stored = store.load("frank").await.unwrap().unwrap();
    assert_eq!(stored.allowance_left(), 0);
    assert_eq!(stored, first);
}

#[tokio::test]
async fn test_grant_zero_leaves_counters_alone() {
    let (manager, _clock, _store) = setup_test_manager().await;

    let quota = manager.grant_extra_for("gina", 0).await.unwrap();
    assert_eq!(quota.allowance_left(), 1);
    assert_eq!(quota.extra_granted(), 0);
    assert!(quota.last_action_at().is_none());
}

#[tokio::test]
async fn test_from_config_without_time_bonus() {
    let mut config = Config::default();
    config.tracker.time_bonus = false;
    config.tracker.initial_allowance = 2;

    let store = Arc::new(SqliteQuotaStore::connect("sqlite::memory:").await.unwrap());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap(),
    ));
    let manager = QuotaManager::from_config(&config, store)
        .unwrap()
        .with_clock(clock.clone());

    manager.consume_for("erin").await.unwrap();
    manager.consume_for("erin").await.unwrap();

    // Counter-only: no replenishment however long we wait
    clock.advance(Duration::days(7));
    let err = manager.consume_for("erin").await.unwrap_err();
    assert!(err.is_quota_exhausted());
}

#[tokio::test]
async fn test_named_timezone_follows_summer_time() {
    let mut config = Config::default();
    config.period.timezone = "Europe/Paris".to_string();

    let store = Arc::new(SqliteQuotaStore::connect("sqlite::memory:").await.unwrap());
    // 23:30 in Paris on the day clocks went forward (UTC+2)
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 31, 21, 30, 0).unwrap(),
    ));
    let manager = QuotaManager::from_config(&config, store)
        .unwrap()
        .with_clock(clock.clone());

    manager.consume_for("hugo").await.unwrap();
    assert!(!manager.can_participant_act("hugo").await.unwrap());

    // 00:30 local on April 1st; a fixed +01:00 would still be on March 31st
    clock.advance(Duration::hours(1));
    assert_eq!(
        manager.consume_for("hugo").await.unwrap(),
        ConsumeOutcome::TimeBonus
    );
}
