//! Lifecycle (LCM) notifications.
//!
//! One [`LcmEvent`] is published per committed state transition. Events are
//! immutable and self-describing so consumers never need to read the store.

use crate::{CmHandleId, CmHandleState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new time-ordered event ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A committed CM handle state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcmEvent {
    pub event_id: EventId,
    pub cm_handle_id: CmHandleId,
    /// `None` for a newly registered handle.
    pub old_state: Option<CmHandleState>,
    pub new_state: CmHandleState,
    pub timestamp: DateTime<Utc>,
}

impl LcmEvent {
    #[must_use]
    pub fn new(
        cm_handle_id: CmHandleId,
        old_state: Option<CmHandleState>,
        new_state: CmHandleState,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            cm_handle_id,
            old_state,
            new_state,
            timestamp: Utc::now(),
        }
    }

    /// Serializes the event to JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
