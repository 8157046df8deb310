//! CM handle lifecycle state.
//!
//! A handle's state is a [`CompositeState`]: the lifecycle
//! [`CmHandleState`], an optional [`LockReason`] while locked, and the sync
//! state of its operational datastore.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::IntErrorKind;
use std::sync::LazyLock;

static RETRY_ATTEMPT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Attempt #(\d+) failed: ?").expect("retry attempt pattern is valid")
});

/// Lifecycle state of a CM handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CmHandleState {
    Advised,
    Ready,
    Locked,
    Deleting,
    Deleted,
}

impl CmHandleState {
    /// Whether a handle currently in `self` may move to `target`.
    ///
    /// Any non-terminal state may move to `Deleting`. `Deleted` is terminal.
    #[must_use]
    pub fn can_transition_to(self, target: CmHandleState) -> bool {
        use CmHandleState::*;
        match (self, target) {
            (Deleted, _) => false,
            (_, Deleting) => true,
            (Advised, Ready | Locked) => true,
            (Ready, Locked) => true,
            (Locked, Advised | Ready) => true,
            (Deleting, Deleted) => true,
            _ => false,
        }
    }

    /// Stable upper-case name, as stored and published.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Advised => "ADVISED",
            Self::Ready => "READY",
            Self::Locked => "LOCKED",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
        }
    }

    /// Parses the stored upper-case name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ADVISED" => Some(Self::Advised),
            "READY" => Some(Self::Ready),
            "LOCKED" => Some(Self::Locked),
            "DELETING" => Some(Self::Deleting),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for CmHandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a handle is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockReasonCategory {
    LockedMisbehaving,
    ModuleSyncFailed,
    ModuleUpgrade,
    ModuleUpgradeFailed,
}

impl LockReasonCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LockedMisbehaving => "LOCKED_MISBEHAVING",
            Self::ModuleSyncFailed => "MODULE_SYNC_FAILED",
            Self::ModuleUpgrade => "MODULE_UPGRADE",
            Self::ModuleUpgradeFailed => "MODULE_UPGRADE_FAILED",
        }
    }

    /// Categories the module sync watchdog retries with backoff.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::ModuleSyncFailed | Self::ModuleUpgradeFailed)
    }
}

impl fmt::Display for LockReasonCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured lock reason.
///
/// `attempt` counts consecutive failures; 0 means the reason carries no
/// attempt marker. The legacy text form is produced by [`LockReason::details`]
/// and read back by [`LockReason::parse_details`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReason {
    pub category: LockReasonCategory,
    pub attempt: u32,
    pub message: String,
}

impl LockReason {
    #[must_use]
    pub fn new(category: LockReasonCategory, attempt: u32, message: impl Into<String>) -> Self {
        Self {
            category,
            attempt,
            message: message.into(),
        }
    }

    /// Renders the reason as `Attempt #<N> failed: <message>`.
    #[must_use]
    pub fn details(&self) -> String {
        if self.attempt == 0 {
            self.message.clone()
        } else {
            format!("Attempt #{} failed: {}", self.attempt, self.message)
        }
    }

    /// Decodes a legacy free-text detail string.
    ///
    /// Text without a leading `Attempt #<N> failed:` marker yields attempt 0
    /// and keeps the whole text as the message.
    #[must_use]
    pub fn parse_details(category: LockReasonCategory, details: &str) -> Self {
        if let Some(caps) = RETRY_ATTEMPT_PATTERN.captures(details) {
            let attempt = match caps[1].parse::<u32>() {
                Ok(attempt) => Some(attempt),
                // Counts past u32::MAX saturate.
                Err(e) if *e.kind() == IntErrorKind::PosOverflow => Some(u32::MAX),
                Err(_) => None,
            };
            if let Some(attempt) = attempt {
                let message = details[caps[0].len()..].to_string();
                return Self::new(category, attempt, message);
            }
        }
        Self::new(category, 0, details)
    }
}

/// Sync state of a handle's operational datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataStoreSyncState {
    #[default]
    NoneRequested,
    Unsynchronized,
    Synchronized,
}

impl DataStoreSyncState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoneRequested => "NONE_REQUESTED",
            Self::Unsynchronized => "UNSYNCHRONIZED",
            Self::Synchronized => "SYNCHRONIZED",
        }
    }

    /// Initial sync state of a handle entering READY.
    #[must_use]
    pub const fn initial(data_sync_enabled: bool) -> Self {
        if data_sync_enabled {
            Self::Unsynchronized
        } else {
            Self::NoneRequested
        }
    }
}

impl fmt::Display for DataStoreSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationalDataStore {
    pub sync_state: DataStoreSyncState,
    pub last_sync_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataStores {
    pub operational: OperationalDataStore,
}

/// The full lifecycle state of a CM handle as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeState {
    pub cm_handle_state: CmHandleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_reason: Option<LockReason>,
    pub last_update_time: DateTime<Utc>,
    #[serde(default)]
    pub data_sync_enabled: bool,
    #[serde(default)]
    pub data_stores: DataStores,
}

impl CompositeState {
    /// A freshly advised state.
    #[must_use]
    pub fn advised() -> Self {
        Self {
            cm_handle_state: CmHandleState::Advised,
            lock_reason: None,
            last_update_time: Utc::now(),
            data_sync_enabled: false,
            data_stores: DataStores::default(),
        }
    }

    #[must_use]
    pub fn operational_sync_state(&self) -> DataStoreSyncState {
        self.data_stores.operational.sync_state
    }

    /// Refreshes `last_update_time`.
    pub fn touch(&mut self) {
        self.last_update_time = Utc::now();
    }

    /// Marks the operational datastore synchronized as of now.
    pub fn set_operational_synchronized(&mut self) {
        let now = Utc::now();
        self.last_update_time = now;
        self.data_stores.operational = OperationalDataStore {
            sync_state: DataStoreSyncState::Synchronized,
            last_sync_time: Some(now),
        };
    }

    /// Sets the data sync flag and resets the operational sync state to
    /// match it.
    pub fn set_data_sync_enabled(&mut self, enabled: bool) {
        self.data_sync_enabled = enabled;
        self.data_stores.operational = OperationalDataStore {
            sync_state: DataStoreSyncState::initial(enabled),
            last_sync_time: None,
        };
        self.touch();
    }
}
