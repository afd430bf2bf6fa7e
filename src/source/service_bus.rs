// src/source/service_bus.rs

//! Service Bus implementation of `TaskSource`.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use super::TaskSource;
use crate::config::{Config, ServiceBusConfig};
use crate::errors::{Result, TraindError};
use crate::task::{BackendHandle, Task, parse_content};
use crate::types::{BoxFuture, SourceKind};

/// A peek-locked Service Bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub message_id: String,
    pub lock_token: String,
    pub body: String,
}

/// The Service Bus operations the source needs.
///
/// Implemented over HTTP by [`crate::azure::ServiceBusClient`].
pub trait BusService: Send + Sync + 'static {
    /// Peek-lock the next message, waiting up to the client's receive
    /// timeout. `None` when the queue stayed empty.
    fn receive(&self) -> BoxFuture<'_, Result<Option<BusMessage>>>;

    /// Extend the lock; the lock token stays valid.
    fn renew_lock<'a>(&'a self, message_id: &'a str, lock_token: &'a str)
    -> BoxFuture<'a, Result<()>>;

    /// Complete (delete) a locked message.
    fn delete<'a>(&'a self, message_id: &'a str, lock_token: &'a str) -> BoxFuture<'a, Result<()>>;
}

pub struct ServiceBusTaskSource<C> {
    client: C,
    namespace: String,
    queue_name: String,
}

impl<C> ServiceBusTaskSource<C> {
    pub fn new(client: C, config: &ServiceBusConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            queue_name: config.queue_name.clone(),
        }
    }

    /// Supported when a Service Bus namespace is configured.
    pub fn is_supported(config: &Config) -> bool {
        config.service_bus.is_some()
    }
}

impl<C> fmt::Display for ServiceBusTaskSource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service Bus ({}/{})", self.namespace, self.queue_name)
    }
}

impl<C: BusService> TaskSource for ServiceBusTaskSource<C> {
    fn kind(&self) -> SourceKind {
        SourceKind::ServiceBus
    }

    /// Service Bus hands out one message per receive call.
    fn receive(self: Arc<Self>) -> BoxFuture<'static, Result<Vec<Task>>> {
        Box::pin(async move {
            let Some(message) = self.client.receive().await? else {
                return Ok(Vec::new());
            };
            debug!(source = %self, message_id = %message.message_id, "received message");

            match parse_content(&message.body) {
                Ok(content) => {
                    let source: Arc<dyn TaskSource> = self.clone();
                    Ok(vec![Task::new(
                        source,
                        content,
                        BackendHandle::Bus {
                            message_id: message.message_id,
                            lock_token: message.lock_token,
                        },
                    )])
                }
                // The lock lapses and the bus redelivers (or dead-letters)
                // the message on its own.
                Err(e) => {
                    error!(
                        message_id = %message.message_id,
                        error = %e,
                        "skipping message with unusable content"
                    );
                    Ok(Vec::new())
                }
            }
        })
    }

    fn keep_alive<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let handle = task.handle().await;
            let BackendHandle::Bus {
                message_id,
                lock_token,
            } = &*handle
            else {
                return Err(TraindError::HandleMismatch("service bus"));
            };
            self.client.renew_lock(message_id, lock_token).await
        })
    }

    fn commit<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let handle = task.handle().await;
            let BackendHandle::Bus {
                message_id,
                lock_token,
            } = &*handle
            else {
                return Err(TraindError::HandleMismatch("service bus"));
            };
            self.client.delete(message_id, lock_token).await
        })
    }
}
