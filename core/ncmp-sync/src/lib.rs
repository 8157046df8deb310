//! CM handle lifecycle and background sync for NCMP.
//!
//! Several stateless instances share one handle inventory. Nothing here
//! assumes it is the only instance: cross-instance coordination goes through
//! the [`CoordinationCache`], whose per-key atomic operations take the place
//! of local locks.
//!
//! # Components
//!
//! - **StateHandler**: the only writer of handle state; publishes LCM events
//! - **RegistrationCoordinator**: create / update / remove requests from
//!   DMI plugins
//! - **SyncSelector**: randomized choice of handles needing work
//! - **Watchdogs**: periodic module sync (ADVISED -> READY) and operational
//!   data sync of READY handles
//! - **retry**: attempt counting and backoff for locked handles
//! - **SubscriptionAggregator**: one consolidated outcome per subscription,
//!   with a timeout fallback
//!
//! # Example
//!
//! ```
//! use ncmp_storage::SqliteHandleStore;
//! use ncmp_sync::{ChannelEventPublisher, StateHandler};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteHandleStore::open_in_memory().unwrap());
//! let (publisher, _events) = ChannelEventPublisher::new();
//! let _handler = StateHandler::new(store.clone(), store, Arc::new(publisher), "ncmp-events");
//! ```

pub mod cache;
mod config;
pub mod dmi;
mod error;
pub mod events;
pub mod registration;
pub mod retry;
pub mod selector;
pub mod state_handler;
pub mod subscription;
pub mod watchdog;

pub use cache::{CoordinationCache, LocalCoordinationCache};
pub use config::{DmiClientConfig, EventTopics, NcmpConfig, SubscriptionConfig, WatchdogConfig};
pub use dmi::{
    DataOperation, Datastore, DmiClient, DmiError, DmiResponse, DmiResult, HttpDmiClient,
};
pub use error::{NcmpError, NcmpResult};
pub use events::{ChannelEventPublisher, EventPublisher, NcmpEvent, PublishedEvent};
pub use registration::{
    validate_plugin_refs, PropertyHandler, RegistrationCoordinator, StorePropertyHandler,
    DELETE_BATCH_SIZE,
};
pub use retry::{is_ready_for_retry, record_failure};
pub use selector::SyncSelector;
pub use state_handler::{BatchResult, StateHandler};
pub use subscription::{PendingPlugins, SubscriptionAggregator};
pub use watchdog::{CycleReport, DataSyncWatchdog, ModuleSyncWatchdog};
