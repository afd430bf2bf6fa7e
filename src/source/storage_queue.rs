// src/source/storage_queue.rs

//! Storage queue implementation of `TaskSource`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, error, warn};

use super::TaskSource;
use crate::config::{Config, StorageQueueConfig};
use crate::errors::{Result, TraindError};
use crate::task::{BackendHandle, Task, TaskContent, parse_content};
use crate::types::{BoxFuture, MessageEncoding, SourceKind};

/// A message with unusable content is deleted once it has been dequeued this
/// many times; before that it is left to reappear.
pub const POISON_DEQUEUE_COUNT: u32 = 5;

/// A message as handed out by a storage queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub pop_receipt: String,
    pub dequeue_count: u32,
    pub text: String,
}

/// The three storage queue operations the source needs.
///
/// Implemented over HTTP by [`crate::azure::StorageQueueClient`].
pub trait QueueService: Send + Sync + 'static {
    /// Dequeue up to `count` messages, hiding them for `visibility_timeout`.
    fn get_messages(
        &self,
        count: u32,
        visibility_timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<QueueMessage>>>;

    /// Push the message's visibility out by `visibility_timeout`; returns the
    /// new pop receipt, which invalidates `pop_receipt`.
    fn update_message<'a>(
        &'a self,
        message_id: &'a str,
        pop_receipt: &'a str,
        visibility_timeout: Duration,
    ) -> BoxFuture<'a, Result<String>>;

    fn delete_message<'a>(
        &'a self,
        message_id: &'a str,
        pop_receipt: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

pub struct StorageQueueTaskSource<C> {
    client: C,
    account_name: String,
    queue_name: String,
    message_count: u32,
    lease_duration: Duration,
    encoding: MessageEncoding,
}

impl<C> StorageQueueTaskSource<C> {
    pub fn new(client: C, config: &StorageQueueConfig, lease_duration: Duration) -> Self {
        Self {
            client,
            account_name: config.account_name.clone(),
            queue_name: config.queue_name.clone(),
            message_count: config.message_count,
            lease_duration,
            encoding: config.message_encoding,
        }
    }

    /// Supported when a storage account name and key are configured.
    pub fn is_supported(config: &Config) -> bool {
        config.storage_queue.is_some()
    }

    fn decode(&self, message: &QueueMessage) -> Result<TaskContent> {
        match self.encoding {
            MessageEncoding::Text => parse_content(&message.text),
            MessageEncoding::Base64 => {
                let bytes = STANDARD.decode(message.text.trim()).map_err(|e| {
                    TraindError::InvalidContent(format!("message text is not base64: {e}"))
                })?;
                let text = String::from_utf8(bytes).map_err(|e| {
                    TraindError::InvalidContent(format!("message text is not UTF-8: {e}"))
                })?;
                parse_content(&text)
            }
        }
    }
}

impl<C> fmt::Display for StorageQueueTaskSource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage Queue ({}/{})", self.account_name, self.queue_name)
    }
}

impl<C: QueueService> TaskSource for StorageQueueTaskSource<C> {
    fn kind(&self) -> SourceKind {
        SourceKind::StorageQueue
    }

    fn receive(self: Arc<Self>) -> BoxFuture<'static, Result<Vec<Task>>> {
        Box::pin(async move {
            let messages = self
                .client
                .get_messages(self.message_count, self.lease_duration)
                .await?;
            debug!(source = %self, count = messages.len(), "received messages");

            let source: Arc<dyn TaskSource> = self.clone();
            let mut tasks = Vec::with_capacity(messages.len());
            for message in messages {
                match self.decode(&message) {
                    Ok(content) => tasks.push(Task::new(
                        Arc::clone(&source),
                        content,
                        BackendHandle::Queue {
                            message_id: message.message_id,
                            pop_receipt: message.pop_receipt,
                        },
                    )),
                    Err(e) if message.dequeue_count >= POISON_DEQUEUE_COUNT => {
                        error!(
                            message_id = %message.message_id,
                            dequeue_count = message.dequeue_count,
                            error = %e,
                            "deleting poison message"
                        );
                        if let Err(e) = self
                            .client
                            .delete_message(&message.message_id, &message.pop_receipt)
                            .await
                        {
                            warn!(
                                message_id = %message.message_id,
                                error = %e,
                                "could not delete poison message"
                            );
                        }
                    }
                    // Left in the queue; it reappears once its visibility
                    // timeout lapses.
                    Err(e) => error!(
                        message_id = %message.message_id,
                        dequeue_count = message.dequeue_count,
                        error = %e,
                        "skipping message with unusable content"
                    ),
                }
            }
            Ok(tasks)
        })
    }

    fn keep_alive<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut handle = task.handle().await;
            let BackendHandle::Queue {
                message_id,
                pop_receipt,
            } = &mut *handle
            else {
                return Err(TraindError::HandleMismatch("storage queue"));
            };

            let renewed = self
                .client
                .update_message(message_id.as_str(), pop_receipt.as_str(), self.lease_duration)
                .await?;
            *pop_receipt = renewed;
            Ok(())
        })
    }

    fn commit<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let handle = task.handle().await;
            let BackendHandle::Queue {
                message_id,
                pop_receipt,
            } = &*handle
            else {
                return Err(TraindError::HandleMismatch("storage queue"));
            };

            self.client.delete_message(message_id, pop_receipt).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory queue that enforces pop receipt freshness.
    #[derive(Default)]
    struct MockQueue {
        pending: Mutex<Vec<QueueMessage>>,
        receipts: Mutex<HashMap<String, String>>,
        renewals: Mutex<u32>,
        deleted: Mutex<Vec<(String, String)>>,
    }

    impl MockQueue {
        fn with_messages(bodies: &[&str]) -> Self {
            let queue = MockQueue::default();
            {
                let mut pending = queue.pending.lock().unwrap();
                for (i, body) in bodies.iter().enumerate() {
                    pending.push(QueueMessage {
                        message_id: format!("m{i}"),
                        pop_receipt: format!("m{i}-r0"),
                        dequeue_count: 1,
                        text: body.to_string(),
                    });
                }
            }
            queue
        }

        fn check(&self, message_id: &str, pop_receipt: &str) -> Result<()> {
            match self.receipts.lock().unwrap().get(message_id) {
                Some(current) if current == pop_receipt => Ok(()),
                _ => Err(TraindError::LeaseLost(format!("{message_id}/{pop_receipt}"))),
            }
        }
    }

    impl QueueService for MockQueue {
        fn get_messages(
            &self,
            count: u32,
            _visibility_timeout: Duration,
        ) -> BoxFuture<'_, Result<Vec<QueueMessage>>> {
            Box::pin(async move {
                let mut pending = self.pending.lock().unwrap();
                let n = (count as usize).min(pending.len());
                let batch: Vec<_> = pending.drain(..n).collect();
                let mut receipts = self.receipts.lock().unwrap();
                for m in &batch {
                    receipts.insert(m.message_id.clone(), m.pop_receipt.clone());
                }
                Ok(batch)
            })
        }

        fn update_message<'a>(
            &'a self,
            message_id: &'a str,
            pop_receipt: &'a str,
            _visibility_timeout: Duration,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                self.check(message_id, pop_receipt)?;
                let mut renewals = self.renewals.lock().unwrap();
                *renewals += 1;
                let next = format!("{message_id}-r{}", *renewals);
                self.receipts
                    .lock()
                    .unwrap()
                    .insert(message_id.to_string(), next.clone());
                Ok(next)
            })
        }

        fn delete_message<'a>(
            &'a self,
            message_id: &'a str,
            pop_receipt: &'a str,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.check(message_id, pop_receipt)?;
                self.receipts.lock().unwrap().remove(message_id);
                self.deleted
                    .lock()
                    .unwrap()
                    .push((message_id.to_string(), pop_receipt.to_string()));
                Ok(())
            })
        }
    }

    fn source(queue: MockQueue, count: u32) -> Arc<StorageQueueTaskSource<MockQueue>> {
        let cfg = StorageQueueConfig {
            account_name: "acct".to_string(),
            account_key: "a2V5".to_string(),
            queue_name: "training".to_string(),
            message_count: count,
            endpoint: "http://localhost".to_string(),
            message_encoding: MessageEncoding::Text,
        };
        Arc::new(StorageQueueTaskSource::new(queue, &cfg, Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn receive_respects_batch_size_and_empty_queue() {
        let src = source(MockQueue::with_messages(&[r#"{"plugin": "a"}"#, r#"{"plugin": "b"}"#]), 1);

        let first = Arc::clone(&src).receive().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].content()["plugin"], "a");

        let second = Arc::clone(&src).receive().await.unwrap();
        assert_eq!(second[0].content()["plugin"], "b");

        assert!(Arc::clone(&src).receive().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_messages_are_skipped() {
        let src = source(MockQueue::with_messages(&["not json", r#"{"plugin": "ok"}"#]), 2);
        let tasks = Arc::clone(&src).receive().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].message_id(), "m1");
    }

    #[tokio::test]
    async fn repeatedly_unusable_message_is_deleted() {
        let queue = MockQueue::with_messages(&["not json", "[1, 2]", r#"{"plugin": "ok"}"#]);
        {
            let mut pending = queue.pending.lock().unwrap();
            pending[0].dequeue_count = POISON_DEQUEUE_COUNT;
            pending[1].dequeue_count = POISON_DEQUEUE_COUNT - 1;
        }
        let src = source(queue, 3);

        let tasks = Arc::clone(&src).receive().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].message_id(), "m2");
        // Only the message past the threshold is gone; m1 gets another try.
        assert_eq!(
            *src.client.deleted.lock().unwrap(),
            vec![("m0".to_string(), "m0-r0".to_string())]
        );
    }

    #[tokio::test]
    async fn renewal_replaces_receipt_and_commit_uses_latest() {
        let src = source(MockQueue::with_messages(&[r#"{"plugin": "hello-world"}"#]), 1);
        let task = Arc::clone(&src).receive().await.unwrap().pop().unwrap();

        task.keep_alive().await.unwrap();
        task.keep_alive().await.unwrap();
        assert_eq!(
            task.current_handle().await,
            BackendHandle::Queue {
                message_id: "m0".to_string(),
                pop_receipt: "m0-r2".to_string(),
            }
        );

        task.commit().await.unwrap();
        assert!(task.is_complete());
        assert_eq!(
            *src.client.deleted.lock().unwrap(),
            vec![("m0".to_string(), "m0-r2".to_string())]
        );
    }

    #[tokio::test]
    async fn stale_receipt_is_a_hard_error() {
        let src = source(MockQueue::with_messages(&[r#"{"plugin": "hello-world"}"#]), 1);
        let task = Arc::clone(&src).receive().await.unwrap().pop().unwrap();

        // Someone else renewed the message behind our back.
        src.client
            .receipts
            .lock()
            .unwrap()
            .insert("m0".to_string(), "foreign".to_string());

        assert!(matches!(task.keep_alive().await, Err(TraindError::LeaseLost(_))));
        assert!(matches!(task.commit().await, Err(TraindError::LeaseLost(_))));
        assert!(!task.is_complete());
    }

    #[tokio::test]
    async fn base64_encoded_messages_are_decoded() {
        let body = STANDARD.encode(r#"{"plugin": "retinanet"}"#);
        let queue = MockQueue::with_messages(&[body.as_str()]);
        let cfg = StorageQueueConfig {
            account_name: "acct".to_string(),
            account_key: "a2V5".to_string(),
            queue_name: "training".to_string(),
            message_count: 1,
            endpoint: "http://localhost".to_string(),
            message_encoding: MessageEncoding::Base64,
        };
        let src = Arc::new(StorageQueueTaskSource::new(queue, &cfg, Duration::from_secs(30)));

        let tasks = src.receive().await.unwrap();
        assert_eq!(tasks[0].content()["plugin"], "retinanet");
    }
}
