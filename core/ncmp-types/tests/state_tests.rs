use ncmp_types::{
    CmHandleState, CompositeState, DataStoreSyncState, LockReason, LockReasonCategory,
};
use proptest::prelude::*;

// ── Transition rules ──────────────────────────────────────────────

#[test]
fn advised_moves_to_ready_or_locked() {
    assert!(CmHandleState::Advised.can_transition_to(CmHandleState::Ready));
    assert!(CmHandleState::Advised.can_transition_to(CmHandleState::Locked));
    assert!(!CmHandleState::Advised.can_transition_to(CmHandleState::Deleted));
}

#[test]
fn ready_moves_to_locked_or_deleting() {
    assert!(CmHandleState::Ready.can_transition_to(CmHandleState::Locked));
    assert!(CmHandleState::Ready.can_transition_to(CmHandleState::Deleting));
    assert!(!CmHandleState::Ready.can_transition_to(CmHandleState::Advised));
}

#[test]
fn locked_recovers_or_is_removed() {
    assert!(CmHandleState::Locked.can_transition_to(CmHandleState::Advised));
    assert!(CmHandleState::Locked.can_transition_to(CmHandleState::Ready));
    assert!(CmHandleState::Locked.can_transition_to(CmHandleState::Deleting));
}

#[test]
fn deleted_only_reachable_from_deleting() {
    for from in [
        CmHandleState::Advised,
        CmHandleState::Ready,
        CmHandleState::Locked,
    ] {
        assert!(!from.can_transition_to(CmHandleState::Deleted));
    }
    assert!(CmHandleState::Deleting.can_transition_to(CmHandleState::Deleted));
}

#[test]
fn deleted_is_terminal() {
    for to in [
        CmHandleState::Advised,
        CmHandleState::Ready,
        CmHandleState::Locked,
        CmHandleState::Deleting,
        CmHandleState::Deleted,
    ] {
        assert!(!CmHandleState::Deleted.can_transition_to(to));
    }
}

#[test]
fn state_names_roundtrip() {
    for state in [
        CmHandleState::Advised,
        CmHandleState::Ready,
        CmHandleState::Locked,
        CmHandleState::Deleting,
        CmHandleState::Deleted,
    ] {
        assert_eq!(CmHandleState::from_name(state.as_str()), Some(state));
    }
    assert_eq!(CmHandleState::from_name("BOGUS"), None);
}

// ── LockReason ────────────────────────────────────────────────────

#[test]
fn details_renders_attempt_prefix() {
    let reason = LockReason::new(LockReasonCategory::ModuleSyncFailed, 3, "boom");
    assert_eq!(reason.details(), "Attempt #3 failed: boom");
}

#[test]
fn details_without_attempt_is_plain_message() {
    let reason = LockReason::new(LockReasonCategory::LockedMisbehaving, 0, "misbehaving");
    assert_eq!(reason.details(), "misbehaving");
}

#[test]
fn parse_details_reads_legacy_text() {
    let reason = LockReason::parse_details(
        LockReasonCategory::ModuleSyncFailed,
        "Attempt #12 failed: connection refused",
    );
    assert_eq!(reason.attempt, 12);
    assert_eq!(reason.message, "connection refused");
}

#[test]
fn parse_details_without_marker_has_attempt_zero() {
    let reason = LockReason::parse_details(
        LockReasonCategory::ModuleSyncFailed,
        "some operator note",
    );
    assert_eq!(reason.attempt, 0);
    assert_eq!(reason.message, "some operator note");
}

#[test]
fn parse_details_marker_must_lead() {
    let reason = LockReason::parse_details(
        LockReasonCategory::ModuleSyncFailed,
        "note: Attempt #4 failed: x",
    );
    assert_eq!(reason.attempt, 0);
}

#[test]
fn parse_details_saturates_oversized_attempt() {
    let reason = LockReason::parse_details(
        LockReasonCategory::ModuleSyncFailed,
        "Attempt #99999999999 failed: flapping",
    );
    assert_eq!(reason.attempt, u32::MAX);
    assert_eq!(reason.message, "flapping");
}

proptest! {
    #[test]
    fn rendered_details_parse_back(attempt in 1u32..100_000, message in "[a-zA-Z0-9 :#]{0,40}") {
        let reason = LockReason::new(LockReasonCategory::ModuleSyncFailed, attempt, message);
        let parsed = LockReason::parse_details(reason.category, &reason.details());
        prop_assert_eq!(parsed, reason);
    }
}

// ── CompositeState ────────────────────────────────────────────────

#[test]
fn advised_state_defaults() {
    let state = CompositeState::advised();
    assert_eq!(state.cm_handle_state, CmHandleState::Advised);
    assert!(state.lock_reason.is_none());
    assert!(!state.data_sync_enabled);
    assert_eq!(state.operational_sync_state(), DataStoreSyncState::NoneRequested);
}

#[test]
fn set_operational_synchronized_stamps_last_sync() {
    let mut state = CompositeState::advised();
    state.set_operational_synchronized();
    assert_eq!(state.operational_sync_state(), DataStoreSyncState::Synchronized);
    assert_eq!(
        state.data_stores.operational.last_sync_time,
        Some(state.last_update_time)
    );
}

#[test]
fn set_data_sync_enabled_resets_sync_state() {
    let mut state = CompositeState::advised();
    state.set_data_sync_enabled(true);
    assert_eq!(state.operational_sync_state(), DataStoreSyncState::Unsynchronized);
    state.set_operational_synchronized();
    state.set_data_sync_enabled(false);
    assert_eq!(state.operational_sync_state(), DataStoreSyncState::NoneRequested);
    assert!(state.data_stores.operational.last_sync_time.is_none());
}

#[test]
fn composite_state_json_is_lossless() {
    let mut state = CompositeState::advised();
    state.cm_handle_state = CmHandleState::Locked;
    state.lock_reason = Some(LockReason::new(LockReasonCategory::ModuleSyncFailed, 2, "x"));
    state.data_sync_enabled = true;
    state.set_operational_synchronized();

    let json = serde_json::to_string(&state).unwrap();
    let back: CompositeState = serde_json::from_str(&json).unwrap();
    pretty_assertions::assert_eq!(back, state);
}
