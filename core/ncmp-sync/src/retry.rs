//! Lock reason bookkeeping for handles that keep failing.

use chrono::{DateTime, Utc};
use ncmp_types::{CmHandleState, CompositeState, LockReason, LockReasonCategory};
use std::time::Duration;

/// Largest backoff exponent; keeps `base * 2^n` representable.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Builds the lock reason for another failed attempt.
///
/// The attempt number continues from the handle's current lock reason (1 if
/// it has none). Nothing is persisted; the caller commits the result through
/// the state handler.
#[must_use]
pub fn record_failure(
    state: &CompositeState,
    category: LockReasonCategory,
    message: impl Into<String>,
) -> LockReason {
    let previous = state.lock_reason.as_ref().map_or(0, |r| r.attempt);
    LockReason::new(category, previous.saturating_add(1), message)
}

/// Whether a locked handle's backoff has elapsed at `now`.
///
/// Only retryable categories qualify. Attempt `n` waits `base * 2^n` from
/// the time the handle was locked. A reason without an attempt marker is
/// eligible straight away.
#[must_use]
pub fn is_ready_for_retry(state: &CompositeState, now: DateTime<Utc>, base: Duration) -> bool {
    if state.cm_handle_state != CmHandleState::Locked {
        return false;
    }
    let Some(reason) = &state.lock_reason else {
        return true;
    };
    if !reason.category.is_retryable() {
        return false;
    }
    if reason.attempt == 0 {
        return true;
    }

    let backoff = backoff_for(reason.attempt, base);
    match chrono::Duration::from_std(backoff) {
        Ok(backoff) => now - state.last_update_time >= backoff,
        Err(_) => false,
    }
}

/// `base * 2^attempt`, with the exponent capped.
#[must_use]
pub fn backoff_for(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
}
