#![allow(dead_code)]

use async_trait::async_trait;
use ncmp_storage::{HandleStore, SqliteHandleStore};
use ncmp_sync::{
    ChannelEventPublisher, DataOperation, Datastore, DmiClient, DmiError, DmiResponse, DmiResult,
    NcmpEvent, PublishedEvent, StateHandler,
};
use ncmp_types::{
    CmHandle, CmHandleId, CmHandleState, DataStoreSyncState, DmiPluginRefs, LcmEvent, LockReason,
    ModuleReference, OperationalDataStore,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

pub const LCM_TOPIC: &str = "ncmp-events";

/// Routes core logs to the test output; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn plugins() -> DmiPluginRefs {
    DmiPluginRefs {
        dmi_service_name: "http://dmi-plugin:8080".into(),
        ..Default::default()
    }
}

pub fn id(raw: &str) -> CmHandleId {
    CmHandleId::new(raw)
}

/// A handle in `state`. READY handles get data sync enabled and an
/// unsynchronized operational datastore.
pub fn handle_in(raw: &str, state: CmHandleState) -> CmHandle {
    let mut handle = CmHandle::advised(id(raw), plugins());
    handle.composite_state.cm_handle_state = state;
    if state == CmHandleState::Ready {
        handle.composite_state.data_sync_enabled = true;
        handle.composite_state.data_stores.operational = OperationalDataStore {
            sync_state: DataStoreSyncState::Unsynchronized,
            last_sync_time: None,
        };
    }
    handle
}

pub fn locked(raw: &str, reason: LockReason) -> CmHandle {
    let mut handle = handle_in(raw, CmHandleState::Locked);
    handle.composite_state.lock_reason = Some(reason);
    handle
}

/// Store, state handler and the receiving end of published events.
pub struct Harness {
    pub store: Arc<SqliteHandleStore>,
    pub handler: Arc<StateHandler>,
    pub events: UnboundedReceiver<PublishedEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(SqliteHandleStore::open_in_memory().unwrap()))
    }

    pub fn with_store(store: Arc<SqliteHandleStore>) -> Self {
        init_tracing();
        let (publisher, events) = ChannelEventPublisher::new();
        let handler = Arc::new(StateHandler::new(
            store.clone(),
            store.clone(),
            Arc::new(publisher),
            LCM_TOPIC,
        ));
        Self {
            store,
            handler,
            events,
        }
    }

    /// Inserts handles directly, bypassing the state handler.
    pub fn seed(&self, handles: &[CmHandle]) {
        self.store.insert_batch(handles).unwrap();
    }

    pub fn state_of(&self, raw: &str) -> CmHandleState {
        self.store.get_by_id(&id(raw)).unwrap().state()
    }

    pub fn drain(&mut self) -> Vec<PublishedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Published LCM events, in publication order.
    pub fn lcm_events(&mut self) -> Vec<LcmEvent> {
        self.drain()
            .into_iter()
            .filter_map(|p| match p.event {
                NcmpEvent::Lcm(event) => Some(event),
                _ => None,
            })
            .collect()
    }
}

/// Scripted [`DmiClient`].
#[derive(Default)]
pub struct FakeDmi {
    reads: Mutex<HashMap<String, Result<DmiResponse, String>>>,
    modules: Mutex<HashMap<String, Result<Vec<ModuleReference>, String>>>,
    pub read_calls: AtomicUsize,
    pub module_calls: AtomicUsize,
}

impl FakeDmi {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    pub fn answer_read(&self, raw: &str, status: u16, body: &str) {
        self.reads.lock().unwrap().insert(
            raw.to_string(),
            Ok(DmiResponse {
                status,
                body: body.to_string(),
            }),
        );
    }

    pub fn fail_read(&self, raw: &str, message: &str) {
        self.reads
            .lock()
            .unwrap()
            .insert(raw.to_string(), Err(message.to_string()));
    }

    pub fn answer_modules(&self, raw: &str, modules: Vec<ModuleReference>) {
        self.modules
            .lock()
            .unwrap()
            .insert(raw.to_string(), Ok(modules));
    }

    pub fn fail_modules(&self, raw: &str, message: &str) {
        self.modules
            .lock()
            .unwrap()
            .insert(raw.to_string(), Err(message.to_string()));
    }
}

#[async_trait]
impl DmiClient for FakeDmi {
    async fn read(
        &self,
        handle: &CmHandle,
        _resource_identifier: &str,
        _datastore: Datastore,
    ) -> DmiResult<DmiResponse> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        match self.reads.lock().unwrap().get(handle.id.as_str()) {
            Some(Ok(response)) => Ok(response.clone()),
            Some(Err(message)) => Err(DmiError::Request(message.clone())),
            None => Err(DmiError::Request("no answer scripted".into())),
        }
    }

    async fn write(
        &self,
        _handle: &CmHandle,
        _resource_identifier: &str,
        _operation: DataOperation,
        _payload: &str,
        _content_type: &str,
    ) -> DmiResult<DmiResponse> {
        Ok(DmiResponse {
            status: 200,
            body: String::new(),
        })
    }

    async fn get_module_references(&self, handle: &CmHandle) -> DmiResult<Vec<ModuleReference>> {
        self.module_calls.fetch_add(1, Ordering::SeqCst);
        match self.modules.lock().unwrap().get(handle.id.as_str()) {
            Some(Ok(modules)) => Ok(modules.clone()),
            Some(Err(message)) => Err(DmiError::Request(message.clone())),
            None => Err(DmiError::Request("no answer scripted".into())),
        }
    }
}

pub fn module(name: &str) -> ModuleReference {
    ModuleReference {
        module_name: name.into(),
        revision: "2024-01-01".into(),
    }
}
