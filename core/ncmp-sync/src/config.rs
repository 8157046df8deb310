//! Runtime configuration.

use crate::error::{NcmpError, NcmpResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Top-level configuration of one NCMP instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NcmpConfig {
    /// Identifies this cluster member in in-flight markers.
    pub instance_id: String,
    pub watchdog: WatchdogConfig,
    pub subscription: SubscriptionConfig,
    pub dmi: DmiClientConfig,
    pub topics: EventTopics,
}

impl Default for NcmpConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("ncmp-{}", Uuid::new_v4()),
            watchdog: WatchdogConfig::default(),
            subscription: SubscriptionConfig::default(),
            dmi: DmiClientConfig::default(),
            topics: EventTopics::default(),
        }
    }
}

impl NcmpConfig {
    /// Parses a JSON configuration document. Missing fields take defaults.
    pub fn from_json(json: &str) -> NcmpResult<Self> {
        serde_json::from_str(json).map_err(|e| NcmpError::Config(e.to_string()))
    }

    /// Loads a JSON configuration file.
    pub fn load(path: &Path) -> NcmpResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| NcmpError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }
}

/// Background sync timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Fixed delay between data sync cycles (ms).
    pub data_sync_interval_ms: u64,
    /// Fixed delay between module sync cycles (ms).
    pub module_sync_interval_ms: u64,
    /// Expiry of an in-flight sync marker (seconds).
    pub in_flight_ttl_secs: u64,
    /// Base delay of the locked-handle retry backoff (seconds).
    pub retry_base_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            data_sync_interval_ms: 30_000,
            module_sync_interval_ms: 5_000,
            in_flight_ttl_secs: 300,
            retry_base_secs: 60,
        }
    }
}

impl WatchdogConfig {
    #[must_use]
    pub fn data_sync_interval(&self) -> Duration {
        Duration::from_millis(self.data_sync_interval_ms)
    }

    #[must_use]
    pub fn module_sync_interval(&self) -> Duration {
        Duration::from_millis(self.module_sync_interval_ms)
    }

    #[must_use]
    pub fn in_flight_ttl(&self) -> Duration {
        Duration::from_secs(self.in_flight_ttl_secs)
    }

    #[must_use]
    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_secs)
    }
}

/// Subscription response aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Sliding expiry of a pending-responses entry (seconds).
    pub pending_ttl_secs: u64,
    /// Delay before the timeout fallback emits an outcome (seconds).
    pub response_timeout_secs: u64,
    /// Whether consolidated outcome events are emitted on quorum.
    pub notifications_enabled: bool,
    /// Whether individual responses are recorded durably.
    pub persistence_enabled: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 600,
            response_timeout_secs: 30,
            notifications_enabled: true,
            persistence_enabled: false,
        }
    }
}

impl SubscriptionConfig {
    #[must_use]
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

/// HTTP client settings for DMI plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmiClientConfig {
    /// Whole-request timeout (ms); expiry is a transport failure.
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for DmiClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 20_000,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Topics events are published on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventTopics {
    pub lcm_events: String,
    pub subscription_outcomes: String,
}

impl Default for EventTopics {
    fn default() -> Self {
        Self {
            lcm_events: "ncmp-events".to_string(),
            subscription_outcomes: "subscription-response".to_string(),
        }
    }
}
