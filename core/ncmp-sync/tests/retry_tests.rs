use chrono::Utc;
use ncmp_sync::retry::{backoff_for, is_ready_for_retry, record_failure};
use ncmp_types::{CmHandleState, CompositeState, LockReason, LockReasonCategory};
use proptest::prelude::*;
use std::time::Duration;

fn locked_with(reason: Option<LockReason>) -> CompositeState {
    let mut state = CompositeState::advised();
    state.cm_handle_state = CmHandleState::Locked;
    state.lock_reason = reason;
    state
}

/// Applies `record_failure` and commits the result, `n` times.
fn fail_n_times(n: u32) -> CompositeState {
    let mut state = CompositeState::advised();
    for _ in 0..n {
        let reason = record_failure(&state, LockReasonCategory::ModuleSyncFailed, "timeout");
        state.cm_handle_state = CmHandleState::Locked;
        state.lock_reason = Some(reason);
    }
    state
}

// ── record_failure ───────────────────────────────────────────────

#[test]
fn first_failure_is_attempt_one() {
    let reason = record_failure(
        &CompositeState::advised(),
        LockReasonCategory::ModuleSyncFailed,
        "connection refused",
    );
    assert_eq!(reason.attempt, 1);
    assert_eq!(reason.details(), "Attempt #1 failed: connection refused");
}

#[test]
fn failure_continues_from_existing_attempt() {
    let state = locked_with(Some(LockReason::new(
        LockReasonCategory::ModuleSyncFailed,
        4,
        "old",
    )));
    let reason = record_failure(&state, LockReasonCategory::ModuleUpgradeFailed, "new");
    assert_eq!(reason.attempt, 5);
    assert_eq!(reason.category, LockReasonCategory::ModuleUpgradeFailed);
    assert_eq!(reason.details(), "Attempt #5 failed: new");
}

#[test]
fn attempt_count_never_wraps() {
    let legacy = LockReason::parse_details(
        LockReasonCategory::ModuleSyncFailed,
        "Attempt #4294967296 failed: flapping",
    );
    let reason = record_failure(
        &locked_with(Some(legacy)),
        LockReasonCategory::ModuleSyncFailed,
        "again",
    );
    assert_eq!(reason.attempt, u32::MAX);
}

#[test]
fn failure_continues_from_legacy_text() {
    let legacy = LockReason::parse_details(
        LockReasonCategory::ModuleSyncFailed,
        "Attempt #7 failed: model plugin unreachable",
    );
    let reason = record_failure(
        &locked_with(Some(legacy)),
        LockReasonCategory::ModuleSyncFailed,
        "again",
    );
    assert_eq!(reason.attempt, 8);
}

#[test]
fn reason_without_marker_restarts_at_one() {
    let legacy = LockReason::parse_details(LockReasonCategory::ModuleSyncFailed, "free text");
    let reason = record_failure(
        &locked_with(Some(legacy)),
        LockReasonCategory::ModuleSyncFailed,
        "again",
    );
    assert_eq!(reason.attempt, 1);
}

proptest! {
    #[test]
    fn n_failures_give_attempt_n(n in 1u32..50) {
        let state = fail_n_times(n);
        let reason = state.lock_reason.unwrap();
        prop_assert_eq!(reason.attempt, n);
        prop_assert_eq!(reason.details(), format!("Attempt #{n} failed: timeout"));
    }
}

// ── Backoff ──────────────────────────────────────────────────────

#[test]
fn backoff_doubles_per_attempt() {
    let base = Duration::from_secs(60);
    assert_eq!(backoff_for(0, base), base);
    assert_eq!(backoff_for(1, base), Duration::from_secs(120));
    assert_eq!(backoff_for(3, base), Duration::from_secs(480));
}

#[test]
fn backoff_exponent_is_capped() {
    let base = Duration::from_secs(1);
    assert_eq!(backoff_for(16, base), backoff_for(1_000, base));
}

#[test]
fn ready_for_retry_after_backoff() {
    let base = Duration::from_secs(60);
    let state = fail_n_times(2);
    let locked_at = state.last_update_time;

    assert!(!is_ready_for_retry(&state, locked_at, base));
    assert!(!is_ready_for_retry(
        &state,
        locked_at + chrono::Duration::seconds(239),
        base
    ));
    assert!(is_ready_for_retry(
        &state,
        locked_at + chrono::Duration::seconds(240),
        base
    ));
}

#[test]
fn not_locked_is_never_ready() {
    let state = CompositeState::advised();
    assert!(!is_ready_for_retry(&state, Utc::now(), Duration::ZERO));
}

#[test]
fn reason_without_attempt_is_ready_immediately() {
    let state = locked_with(Some(LockReason::new(
        LockReasonCategory::ModuleSyncFailed,
        0,
        "free text",
    )));
    assert!(is_ready_for_retry(
        &state,
        state.last_update_time,
        Duration::from_secs(3600)
    ));
}

#[test]
fn misbehaving_is_never_retried() {
    let state = locked_with(Some(LockReason::new(
        LockReasonCategory::LockedMisbehaving,
        1,
        "bad",
    )));
    let later = Utc::now() + chrono::Duration::days(365);
    assert!(!is_ready_for_retry(&state, later, Duration::from_secs(1)));
}
