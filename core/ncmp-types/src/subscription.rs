//! Subscription responses from DMI plugins and the consolidated outcome.

use crate::{CmHandleId, SubscriptionKey};
use serde::{Deserialize, Serialize};

/// Event type used for outcomes emitted by the timeout fallback.
pub const SUBSCRIPTION_CREATED_STATUS: &str = "subscriptionCreatedStatus";

/// Per-device status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Accepted,
    Rejected,
    Pending,
}

impl SubscriptionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Pending => "PENDING",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ACCEPTED" => Some(Self::Accepted),
            "REJECTED" => Some(Self::Rejected),
            "PENDING" => Some(Self::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmHandleSubscriptionStatus {
    pub cm_handle_id: CmHandleId,
    pub status: SubscriptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CmHandleSubscriptionStatus {
    #[must_use]
    pub fn new(cm_handle_id: impl Into<CmHandleId>, status: SubscriptionStatus) -> Self {
        Self {
            cm_handle_id: cm_handle_id.into(),
            status,
            details: None,
        }
    }
}

/// One DMI plugin's answer to a forwarded subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEventResponse {
    pub client_id: String,
    pub subscription_name: String,
    pub dmi_name: String,
    pub event_type: String,
    #[serde(default)]
    pub cm_handle_statuses: Vec<CmHandleSubscriptionStatus>,
}

impl SubscriptionEventResponse {
    #[must_use]
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(&self.client_id, &self.subscription_name)
    }
}

/// Overall result of a subscription across all devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionOutcome {
    Success,
    PartialSuccess,
    Failure,
}

impl SubscriptionOutcome {
    /// All accepted is a success, all rejected a failure, anything else
    /// (including no statuses at all) partial.
    #[must_use]
    pub fn classify(statuses: &[CmHandleSubscriptionStatus]) -> Self {
        if statuses.is_empty() {
            return Self::PartialSuccess;
        }
        if statuses
            .iter()
            .all(|s| s.status == SubscriptionStatus::Accepted)
        {
            Self::Success
        } else if statuses
            .iter()
            .all(|s| s.status == SubscriptionStatus::Rejected)
        {
            Self::Failure
        } else {
            Self::PartialSuccess
        }
    }
}

/// The single consolidated notification emitted per subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOutcomeEvent {
    pub client_id: String,
    pub subscription_name: String,
    pub event_type: String,
    pub outcome: SubscriptionOutcome,
    pub per_device_status: Vec<CmHandleSubscriptionStatus>,
}
