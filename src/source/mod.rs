// src/source/mod.rs

//! Pluggable task source abstraction.
//!
//! The daemon talks to a `TaskSource` instead of a concrete queue client, so
//! the loop and the task lifecycle stay backend-agnostic and tests can swap
//! in an in-memory source.
//!
//! - [`storage_queue`]: polling queue with visibility timeouts; every lease
//!   renewal hands out a new pop receipt.
//! - [`service_bus`]: message bus with peek-lock; renewals extend the lock
//!   without changing the token.
//!
//! Exactly one source is active per process, chosen once at startup by
//! [`select_source`].

pub mod service_bus;
pub mod storage_queue;

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::azure::{ServiceBusClient, StorageQueueClient};
use crate::config::Config;
use crate::errors::{Result, TraindError};
use crate::task::Task;
use crate::types::{BoxFuture, SourceKind};

pub use service_bus::{BusMessage, BusService, ServiceBusTaskSource};
pub use storage_queue::{QueueMessage, QueueService, StorageQueueTaskSource};

/// Trait abstracting where training tasks come from.
///
/// Production code uses [`StorageQueueTaskSource`] or
/// [`ServiceBusTaskSource`]; tests can provide their own implementation.
pub trait TaskSource: Send + Sync + fmt::Display {
    fn kind(&self) -> SourceKind;

    /// Fetch the currently pending tasks, possibly none.
    ///
    /// Takes `Arc<Self>` because every returned [`Task`] keeps a reference
    /// back to the source that owns its lease.
    fn receive(self: Arc<Self>) -> BoxFuture<'static, Result<Vec<Task>>>;

    /// Extend the task's lease, replacing its backend handle if the backend
    /// issues a new one.
    fn keep_alive<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>>;

    /// Permanently remove the task from the backend.
    fn commit<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>>;
}

/// Which source the configuration supports, preferring Service Bus.
///
/// Pure function of configuration; no network access.
pub fn supported_kind(config: &Config) -> Option<SourceKind> {
    if ServiceBusTaskSource::<ServiceBusClient>::is_supported(config) {
        Some(SourceKind::ServiceBus)
    } else if StorageQueueTaskSource::<StorageQueueClient>::is_supported(config) {
        Some(SourceKind::StorageQueue)
    } else {
        None
    }
}

/// Construct the task source selected by `config`.
pub fn select_source(config: &Config) -> Result<Arc<dyn TaskSource>> {
    let source: Arc<dyn TaskSource> = match supported_kind(config) {
        Some(SourceKind::ServiceBus) => {
            let Some(sb) = &config.service_bus else {
                return Err(TraindError::NoSupportedSource);
            };
            Arc::new(ServiceBusTaskSource::new(ServiceBusClient::new(sb)?, sb))
        }
        Some(SourceKind::StorageQueue) => {
            let Some(sq) = &config.storage_queue else {
                return Err(TraindError::NoSupportedSource);
            };
            Arc::new(StorageQueueTaskSource::new(
                StorageQueueClient::new(sq)?,
                sq,
                config.daemon.lease_duration,
            ))
        }
        None => return Err(TraindError::NoSupportedSource),
    };

    info!(source = %source, kind = %source.kind(), "task source selected");
    Ok(source)
}
