mod common;

use common::{handle_in, id, locked, module, FakeDmi, Harness};
use ncmp_storage::{HandleStore, OperationalDataRepository};
use ncmp_sync::watchdog::first_top_level_member;
use ncmp_sync::{
    CoordinationCache, CycleReport, DataSyncWatchdog, LocalCoordinationCache, ModuleSyncWatchdog,
    SyncSelector,
};
use ncmp_types::{CmHandleState, DataStoreSyncState, LockReason, LockReasonCategory};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const MARKER_TTL: Duration = Duration::from_secs(300);

struct Setup {
    h: Harness,
    dmi: Arc<FakeDmi>,
    in_flight: Arc<LocalCoordinationCache<String>>,
}

impl Setup {
    fn new() -> Self {
        Self {
            h: Harness::new(),
            dmi: FakeDmi::new(),
            in_flight: Arc::new(LocalCoordinationCache::new("in-flight")),
        }
    }

    fn data_watchdog(&self) -> DataSyncWatchdog {
        DataSyncWatchdog::new(
            SyncSelector::new(self.h.store.clone()),
            self.h.handler.clone(),
            self.dmi.clone(),
            self.h.store.clone(),
            self.in_flight.clone(),
            "ncmp-0",
            MARKER_TTL,
        )
    }

    fn module_watchdog(&self, retry_base: Duration) -> ModuleSyncWatchdog {
        ModuleSyncWatchdog::new(
            SyncSelector::new(self.h.store.clone()),
            self.h.handler.clone(),
            self.dmi.clone(),
            self.h.store.clone(),
            self.in_flight.clone(),
            "ncmp-0",
            MARKER_TTL,
            retry_base,
        )
    }

    fn sync_state(&self, raw: &str) -> DataStoreSyncState {
        self.h
            .store
            .get_state(&id(raw))
            .unwrap()
            .operational_sync_state()
    }
}

fn report(synchronized: usize, skipped: usize, failed: usize) -> CycleReport {
    CycleReport {
        synchronized,
        skipped,
        failed,
    }
}

// ── first_top_level_member ──────────────────────────────────────

#[test]
fn first_member_keeps_document_order() {
    let data: serde_json::Value =
        serde_json::from_str(r#"{"zeta": {"a": 1}, "alpha": {"b": 2}}"#).unwrap();
    assert_eq!(
        first_top_level_member(&data),
        Some(json!({"zeta": {"a": 1}}))
    );
}

#[test]
fn first_member_of_non_object_is_none() {
    assert_eq!(first_top_level_member(&json!([1, 2])), None);
    assert_eq!(first_top_level_member(&json!({})), None);
}

// ── Data sync ───────────────────────────────────────────────────

#[tokio::test]
async fn data_sync_stores_first_member_and_marks_synchronized() {
    let s = Setup::new();
    s.h.seed(&[handle_in("a", CmHandleState::Ready)]);
    s.dmi.answer_read(
        "a",
        200,
        r#"{"interfaces": {"eth0": {"mtu": 1500}}, "system": {}}"#,
    );

    let result = s.data_watchdog().run_cycle().await;

    assert_eq!(result, report(1, 0, 0));
    assert_eq!(
        s.h.store.get_data(&id("a")).unwrap(),
        Some(json!({"interfaces": {"eth0": {"mtu": 1500}}}))
    );
    assert_eq!(s.sync_state("a"), DataStoreSyncState::Synchronized);
    assert!(s.in_flight.is_empty().await);

    // Nothing left to do on the next cycle.
    assert_eq!(s.data_watchdog().run_cycle().await, report(0, 0, 0));
}

#[tokio::test]
async fn transport_failure_leaves_handle_for_next_cycle() {
    let s = Setup::new();
    s.h.seed(&[handle_in("a", CmHandleState::Ready)]);
    s.dmi.fail_read("a", "connection refused");

    let watchdog = s.data_watchdog();
    assert_eq!(watchdog.run_cycle().await, report(0, 0, 1));
    assert_eq!(s.sync_state("a"), DataStoreSyncState::Unsynchronized);
    assert_eq!(s.h.state_of("a"), CmHandleState::Ready);
    assert!(s.in_flight.is_empty().await);

    assert_eq!(watchdog.run_cycle().await, report(0, 0, 1));
    assert_eq!(s.dmi.read_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unusable_answers_are_failures() {
    let s = Setup::new();
    s.h.seed(&[
        handle_in("error", CmHandleState::Ready),
        handle_in("empty", CmHandleState::Ready),
        handle_in("garbage", CmHandleState::Ready),
    ]);
    s.dmi.answer_read("error", 500, "boom");
    s.dmi.answer_read("empty", 200, "  ");
    s.dmi.answer_read("garbage", 200, "<xml/>");

    assert_eq!(s.data_watchdog().run_cycle().await, report(0, 0, 3));
    assert_eq!(s.dmi.read_calls.load(Ordering::SeqCst), 3);
    assert_eq!(s.h.store.get_data(&id("error")).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn handle_marked_by_another_member_is_skipped() {
    let s = Setup::new();
    s.h.seed(&[handle_in("a", CmHandleState::Ready)]);
    s.dmi.answer_read("a", 200, r#"{"interfaces": {}}"#);
    s.in_flight
        .put("a", "ncmp-1".into(), Some(MARKER_TTL))
        .await;

    let watchdog = s.data_watchdog();
    assert_eq!(watchdog.run_cycle().await, report(0, 1, 0));
    assert_eq!(s.dmi.read_calls.load(Ordering::SeqCst), 0);
    // The foreign marker is left alone.
    assert_eq!(s.in_flight.get("a").await.as_deref(), Some("ncmp-1"));

    // A crashed owner's marker expires.
    tokio::time::advance(MARKER_TTL).await;
    assert_eq!(watchdog.run_cycle().await, report(1, 0, 0));
}

#[tokio::test]
async fn handle_with_data_sync_disabled_is_skipped() {
    let s = Setup::new();
    let mut handle = handle_in("a", CmHandleState::Ready);
    handle.composite_state.data_sync_enabled = false;
    s.h.seed(&[handle]);

    assert_eq!(s.data_watchdog().run_cycle().await, report(0, 1, 0));
    assert_eq!(s.dmi.read_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn data_sync_ignores_handles_not_ready() {
    let s = Setup::new();
    let mut advised = handle_in("a", CmHandleState::Advised);
    advised.composite_state.data_stores.operational.sync_state = DataStoreSyncState::Unsynchronized;
    s.h.seed(&[advised]);

    assert_eq!(s.data_watchdog().run_cycle().await, report(0, 0, 0));
    assert_eq!(s.dmi.read_calls.load(Ordering::SeqCst), 0);
}

// ── Module sync ─────────────────────────────────────────────────

#[tokio::test]
async fn module_sync_moves_advised_to_ready() {
    let mut s = Setup::new();
    s.h.seed(&[handle_in("a", CmHandleState::Advised)]);
    s.dmi
        .answer_modules("a", vec![module("ietf-interfaces"), module("bbf-xpon")]);

    let result = s.module_watchdog(Duration::from_secs(60)).run_cycle().await;

    assert_eq!(result, report(1, 0, 0));
    assert_eq!(s.h.state_of("a"), CmHandleState::Ready);
    let names: Vec<_> = s
        .h
        .store
        .get_module_references(&id("a"))
        .unwrap()
        .into_iter()
        .map(|m| m.module_name)
        .collect();
    assert_eq!(names, vec!["bbf-xpon", "ietf-interfaces"]);

    let events = s.h.lcm_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].old_state, Some(CmHandleState::Advised));
    assert_eq!(events[0].new_state, CmHandleState::Ready);
    assert!(s.in_flight.is_empty().await);
}

#[tokio::test]
async fn module_sync_failure_locks_with_attempt_count() {
    let s = Setup::new();
    s.h.seed(&[handle_in("a", CmHandleState::Advised)]);
    s.dmi.fail_modules("a", "timed out");

    let watchdog = s.module_watchdog(Duration::from_secs(60));
    assert_eq!(watchdog.run_cycle().await, report(0, 0, 1));

    let state = s.h.store.get_state(&id("a")).unwrap();
    assert_eq!(state.cm_handle_state, CmHandleState::Locked);
    let reason = state.lock_reason.unwrap();
    assert_eq!(reason.category, LockReasonCategory::ModuleSyncFailed);
    assert_eq!(reason.attempt, 1);
    assert!(reason.details().starts_with("Attempt #1 failed:"));

    // Backoff has not elapsed, so the next cycle leaves it locked.
    assert_eq!(watchdog.run_cycle().await, report(0, 0, 0));
    assert_eq!(s.dmi.module_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retried_handle_continues_attempt_count() {
    let s = Setup::new();
    s.h.seed(&[handle_in("a", CmHandleState::Advised)]);
    s.dmi.fail_modules("a", "timed out");

    let watchdog = s.module_watchdog(Duration::ZERO);
    watchdog.run_cycle().await;
    watchdog.run_cycle().await;

    let reason = s.h.store.get_state(&id("a")).unwrap().lock_reason.unwrap();
    assert_eq!(reason.attempt, 2);
    assert!(reason.details().starts_with("Attempt #2 failed:"));

    // The plugin recovers; the handle becomes READY with no lock reason.
    s.dmi.answer_modules("a", vec![module("ietf-interfaces")]);
    assert_eq!(watchdog.run_cycle().await, report(1, 0, 0));
    let state = s.h.store.get_state(&id("a")).unwrap();
    assert_eq!(state.cm_handle_state, CmHandleState::Ready);
    assert_eq!(state.lock_reason, None);
}

#[tokio::test]
async fn misbehaving_handles_are_not_re_advised() {
    let s = Setup::new();
    s.h.seed(&[locked(
        "a",
        LockReason::new(LockReasonCategory::LockedMisbehaving, 0, "flapping"),
    )]);

    let watchdog = s.module_watchdog(Duration::ZERO);
    assert_eq!(watchdog.reset_locked_for_retry(), 0);
    assert_eq!(s.h.state_of("a"), CmHandleState::Locked);
}

#[tokio::test]
async fn module_sync_skips_marked_handles() {
    let s = Setup::new();
    s.h.seed(&[handle_in("a", CmHandleState::Advised)]);
    s.in_flight.put("a", "ncmp-1".into(), None).await;

    let result = s.module_watchdog(Duration::from_secs(60)).run_cycle().await;
    assert_eq!(result, report(0, 1, 0));
    assert_eq!(s.h.state_of("a"), CmHandleState::Advised);
    assert_eq!(s.dmi.module_calls.load(Ordering::SeqCst), 0);
}
