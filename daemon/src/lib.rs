//! HTTP API and service wiring for the NCMP inventory daemon.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use ncmp_storage::{HandleStore, SqliteHandleStore};
use ncmp_sync::{
    DataSyncWatchdog, EventPublisher, HttpDmiClient, LocalCoordinationCache, ModuleSyncWatchdog,
    NcmpConfig, NcmpError, NcmpEvent, PendingPlugins, PublishedEvent, RegistrationCoordinator,
    StateHandler, StorePropertyHandler, SubscriptionAggregator, SyncSelector,
};
use ncmp_types::{
    CmHandle, CmHandleId, DmiPluginRegistration, DmiPluginRegistrationResponse,
    SubscriptionEventResponse, SUBSCRIPTION_CREATED_STATUS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StatusResponse {
    pub instance_id: String,
    /// Handle count per lifecycle state.
    pub cm_handles: BTreeMap<String, usize>,
}

/// Announces that a subscription was forwarded to DMI plugins.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ForwardedSubscription {
    pub client_id: String,
    pub subscription_name: String,
    pub dmi_names: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SubscriptionResponseAck {
    /// Whether this response completed the subscription.
    pub outcome_emitted: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

/// Shared state behind the router.
#[derive(Clone)]
pub struct AppState {
    pub instance_id: String,
    pub store: Arc<dyn HandleStore>,
    pub registration: Arc<RegistrationCoordinator>,
    pub subscriptions: Arc<SubscriptionAggregator>,
    pub response_timeout: Duration,
}

/// Everything one instance runs.
pub struct Service {
    pub state: AppState,
    pub data_watchdog: Arc<DataSyncWatchdog>,
    pub module_watchdog: Arc<ModuleSyncWatchdog>,
}

impl Service {
    /// Wires the core components on top of `store`.
    pub fn assemble(
        config: &NcmpConfig,
        store: Arc<SqliteHandleStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> anyhow::Result<Self> {
        let state_handler = Arc::new(StateHandler::new(
            store.clone(),
            store.clone(),
            publisher.clone(),
            config.topics.lcm_events.clone(),
        ));
        let data_sync_markers = Arc::new(LocalCoordinationCache::<String>::new("data-sync"));
        let module_sync_markers = Arc::new(LocalCoordinationCache::<String>::new("module-sync"));

        let registration = RegistrationCoordinator::new(
            store.clone(),
            state_handler.clone(),
            Arc::new(StorePropertyHandler::new(store.clone())),
        )
        .with_in_flight_markers(data_sync_markers.clone())
        .with_in_flight_markers(module_sync_markers.clone());

        let subscriptions = SubscriptionAggregator::new(
            Arc::new(LocalCoordinationCache::<PendingPlugins>::new(
                "subscription-pending",
            )),
            publisher,
            config.subscription.clone(),
            config.topics.subscription_outcomes.clone(),
        )
        .with_persistence(store.clone());

        let dmi = Arc::new(HttpDmiClient::new(&config.dmi)?);
        let selector = SyncSelector::new(store.clone());
        let data_watchdog = DataSyncWatchdog::new(
            selector.clone(),
            state_handler.clone(),
            dmi.clone(),
            store.clone(),
            data_sync_markers,
            config.instance_id.clone(),
            config.watchdog.in_flight_ttl(),
        );
        let module_watchdog = ModuleSyncWatchdog::new(
            selector,
            state_handler,
            dmi,
            store.clone(),
            module_sync_markers,
            config.instance_id.clone(),
            config.watchdog.in_flight_ttl(),
            config.watchdog.retry_base(),
        );

        Ok(Self {
            state: AppState {
                instance_id: config.instance_id.clone(),
                store,
                registration: Arc::new(registration),
                subscriptions: Arc::new(subscriptions),
                response_timeout: config.subscription.response_timeout(),
            },
            data_watchdog: Arc::new(data_watchdog),
            module_watchdog: Arc::new(module_watchdog),
        })
    }

    /// Starts both watchdogs. Each waits `delay` after a cycle ends before
    /// starting the next one.
    pub fn spawn_watchdogs(
        &self,
        data_sync_delay: Duration,
        module_sync_delay: Duration,
    ) -> Vec<JoinHandle<()>> {
        let data = self.data_watchdog.clone();
        let modules = self.module_watchdog.clone();
        vec![
            tokio::spawn(async move {
                loop {
                    data.run_cycle().await;
                    tokio::time::sleep(data_sync_delay).await;
                }
            }),
            tokio::spawn(async move {
                loop {
                    modules.run_cycle().await;
                    tokio::time::sleep(module_sync_delay).await;
                }
            }),
        ]
    }
}

/// Logs published events until every publisher is dropped.
pub async fn log_events(mut events: UnboundedReceiver<PublishedEvent>) {
    while let Some(published) = events.recv().await {
        let kind = match &published.event {
            NcmpEvent::Lcm(_) => "lcm",
            NcmpEvent::SubscriptionOutcome(_) => "subscription outcome",
        };
        match serde_json::to_string(&published.event) {
            Ok(json) => info!("[{}] {kind} event {}: {json}", published.topic, published.key),
            Err(e) => warn!("Could not render event for {}: {e}", published.key),
        }
    }
    debug!("Event channel closed");
}

/// Core error as an HTTP response.
pub struct ApiError(NcmpError);

impl From<NcmpError> for ApiError {
    fn from(err: NcmpError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            NcmpError::NotFound(_) => StatusCode::NOT_FOUND,
            NcmpError::Validation(_) | NcmpError::InvalidId(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let counts = state.store.count_by_state().map_err(NcmpError::from)?;
    let cm_handles = counts
        .into_iter()
        .map(|(s, count)| (s.as_str().to_string(), count))
        .collect();
    Ok(Json(StatusResponse {
        instance_id: state.instance_id.clone(),
        cm_handles,
    }))
}

async fn cm_handle_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<CmHandle>, ApiError> {
    let id = CmHandleId::parse(&raw_id).map_err(|_| NcmpError::InvalidId(raw_id))?;
    let handle = state.store.get_by_id(&id).map_err(NcmpError::from)?;
    Ok(Json(handle))
}

async fn registration_handler(
    State(state): State<AppState>,
    Json(registration): Json<DmiPluginRegistration>,
) -> Result<Json<DmiPluginRegistrationResponse>, ApiError> {
    let response = state.registration.update_registration(&registration).await?;
    Ok(Json(response))
}

async fn forwarded_subscription_handler(
    State(state): State<AppState>,
    Json(forwarded): Json<ForwardedSubscription>,
) -> StatusCode {
    state
        .subscriptions
        .register_forwarded(
            &forwarded.client_id,
            &forwarded.subscription_name,
            forwarded.dmi_names,
        )
        .await;

    let representative = SubscriptionEventResponse {
        client_id: forwarded.client_id,
        subscription_name: forwarded.subscription_name,
        dmi_name: String::new(),
        event_type: SUBSCRIPTION_CREATED_STATUS.to_string(),
        cm_handle_statuses: Vec::new(),
    };
    state
        .subscriptions
        .schedule_timeout(representative, state.response_timeout);
    StatusCode::ACCEPTED
}

async fn subscription_response_handler(
    State(state): State<AppState>,
    Json(response): Json<SubscriptionEventResponse>,
) -> Result<Json<SubscriptionResponseAck>, ApiError> {
    let outcome_emitted = state.subscriptions.on_response(&response).await?;
    Ok(Json(SubscriptionResponseAck { outcome_emitted }))
}

/// Build the HTTP API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/ch/{cm_handle_id}", get(cm_handle_handler))
        .route("/api/v1/registrations", post(registration_handler))
        .route(
            "/api/v1/subscriptions/forwarded",
            post(forwarded_subscription_handler),
        )
        .route(
            "/api/v1/subscriptions/responses",
            post(subscription_response_handler),
        )
        .with_state(state)
}
