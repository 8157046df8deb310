//! Consolidates subscription responses from DMI plugins.
//!
//! When a subscription is forwarded, the set of plugins expected to answer is
//! stored in the shared cache under the subscription key. Each response
//! removes its plugin from the set. One consolidated outcome is emitted per
//! subscription, either when the set runs empty or when the response timeout
//! fires, whichever removes the entry first.

use crate::cache::CoordinationCache;
use crate::config::SubscriptionConfig;
use crate::error::NcmpResult;
use crate::events::{EventPublisher, NcmpEvent};
use ncmp_storage::SubscriptionPersistence;
use ncmp_types::{
    CmHandleSubscriptionStatus, SubscriptionEventResponse, SubscriptionKey, SubscriptionOutcome,
    SubscriptionOutcomeEvent, SubscriptionStatus, SUBSCRIPTION_CREATED_STATUS,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Plugin names still expected to answer.
pub type PendingPlugins = BTreeSet<String>;

pub struct SubscriptionAggregator {
    pending: Arc<dyn CoordinationCache<PendingPlugins>>,
    persistence: Option<Arc<dyn SubscriptionPersistence>>,
    publisher: Arc<dyn EventPublisher>,
    config: SubscriptionConfig,
    outcome_topic: String,
}

impl SubscriptionAggregator {
    pub fn new(
        pending: Arc<dyn CoordinationCache<PendingPlugins>>,
        publisher: Arc<dyn EventPublisher>,
        config: SubscriptionConfig,
        outcome_topic: impl Into<String>,
    ) -> Self {
        Self {
            pending,
            persistence: None,
            publisher,
            config,
            outcome_topic: outcome_topic.into(),
        }
    }

    /// Durable store for individual responses, used when persistence is
    /// enabled.
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn SubscriptionPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    fn persistence(&self) -> Option<&dyn SubscriptionPersistence> {
        if self.config.persistence_enabled {
            self.persistence.as_deref()
        } else {
            None
        }
    }

    /// Records that a subscription was forwarded to `dmi_names`.
    pub async fn register_forwarded(
        &self,
        client_id: &str,
        subscription_name: &str,
        dmi_names: impl IntoIterator<Item = String>,
    ) {
        let key = SubscriptionKey::new(client_id, subscription_name);
        let plugins: PendingPlugins = dmi_names.into_iter().collect();
        debug!("Awaiting {} plugin responses for {key}", plugins.len());
        self.pending
            .put(key.as_str(), plugins, Some(self.config.pending_ttl()))
            .await;
    }

    /// Plugins still expected to answer, if the subscription is pending.
    pub async fn pending_plugins(&self, key: &SubscriptionKey) -> Option<PendingPlugins> {
        self.pending.get(key.as_str()).await
    }

    /// Handles one plugin response. Returns whether this call emitted the
    /// consolidated outcome.
    pub async fn on_response(&self, response: &SubscriptionEventResponse) -> NcmpResult<bool> {
        let key = response.key();
        info!(
            "Subscription response from {} for {key}",
            response.dmi_name
        );

        let dmi_name = response.dmi_name.clone();
        let remaining = self
            .pending
            .compute_if_present(
                key.as_str(),
                Some(self.config.pending_ttl()),
                &move |plugins: &mut PendingPlugins| {
                    plugins.remove(&dmi_name);
                },
            )
            .await;

        if let Some(persistence) = self.persistence() {
            persistence.save_response(response)?;
        }

        let Some(remaining) = remaining else {
            debug!("No pending entry for {key}");
            return Ok(false);
        };
        if !remaining.is_empty() {
            debug!("{key} still awaits {remaining:?}");
            return Ok(false);
        }
        if !self.config.notifications_enabled {
            return Ok(false);
        }

        let statuses = self.device_statuses(response)?;
        if statuses
            .iter()
            .any(|s| s.status == SubscriptionStatus::Pending)
        {
            debug!("{key} has devices still pending");
            return Ok(false);
        }

        // Only the caller that removes the entry emits.
        if self.pending.remove(key.as_str()).await.is_none() {
            return Ok(false);
        }
        self.emit(response, &response.event_type, statuses);
        Ok(true)
    }

    /// Emits the outcome after `delay` unless the subscription completed
    /// first. The task yields whether it emitted.
    pub fn schedule_timeout(
        self: &Arc<Self>,
        response: SubscriptionEventResponse,
        delay: Duration,
    ) -> JoinHandle<bool> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match aggregator.on_timeout(&response).await {
                Ok(emitted) => emitted,
                Err(e) => {
                    error!("Subscription timeout for {} failed: {e}", response.key());
                    false
                }
            }
        })
    }

    /// Timeout fallback. `response` stands in for the missing answers.
    pub async fn on_timeout(&self, response: &SubscriptionEventResponse) -> NcmpResult<bool> {
        let key = response.key();
        let Some(missing) = self.pending.remove(key.as_str()).await else {
            debug!("{key} already completed, nothing to time out");
            return Ok(false);
        };

        info!("{key} timed out waiting for {missing:?}");
        let statuses = self.device_statuses(response)?;
        self.emit(response, SUBSCRIPTION_CREATED_STATUS, statuses);
        Ok(true)
    }

    fn device_statuses(
        &self,
        response: &SubscriptionEventResponse,
    ) -> NcmpResult<Vec<CmHandleSubscriptionStatus>> {
        match self.persistence() {
            Some(persistence) => Ok(persistence
                .cm_handle_statuses(&response.client_id, &response.subscription_name)?),
            None => Ok(response.cm_handle_statuses.clone()),
        }
    }

    fn emit(
        &self,
        response: &SubscriptionEventResponse,
        event_type: &str,
        statuses: Vec<CmHandleSubscriptionStatus>,
    ) {
        let outcome = SubscriptionOutcome::classify(&statuses);
        let event = SubscriptionOutcomeEvent {
            client_id: response.client_id.clone(),
            subscription_name: response.subscription_name.clone(),
            event_type: event_type.to_string(),
            outcome,
            per_device_status: statuses,
        };
        info!("Subscription {} outcome {outcome:?}", response.key());
        self.publisher.publish(
            &self.outcome_topic,
            response.key().as_str(),
            NcmpEvent::SubscriptionOutcome(event),
        );
    }
}
