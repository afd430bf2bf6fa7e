// src/task/mod.rs

//! A received training task and its lifecycle.
//!
//! A [`Task`] is created by a [`TaskSource`] at receive time and lives for
//! one iteration of the daemon loop:
//!
//! ```text
//! Received -> (KeepAlive)* -> Trained{ok | failed} -> Committed | Abandoned
//! ```
//!
//! - [`content`] parses the flat key/value content carried by a message.
//! - [`keep_alive`] owns the per-task lease renewal ticker.

pub mod content;
pub mod keep_alive;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::PluginConfig;
use crate::errors::Result;
use crate::plugin::{PluginOutcome, PluginRunner, PluginSpec};
use crate::source::TaskSource;

pub use content::{TaskContent, parse_content};
pub use keep_alive::KeepAlive;

/// Backend-specific proof that this consumer currently owns a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendHandle {
    /// Storage queue message: the pop receipt changes on every renewal.
    Queue {
        message_id: String,
        pop_receipt: String,
    },
    /// Service Bus peek-locked message: the lock token is stable across
    /// renewals.
    Bus {
        message_id: String,
        lock_token: String,
    },
}

impl BackendHandle {
    pub fn message_id(&self) -> &str {
        match self {
            BackendHandle::Queue { message_id, .. } | BackendHandle::Bus { message_id, .. } => {
                message_id
            }
        }
    }
}

/// A queued training task.
pub struct Task {
    source: Arc<dyn TaskSource>,
    content: TaskContent,
    message_id: String,
    /// Replaced by renewals, read by commit; the lock serialises the two.
    handle: Mutex<BackendHandle>,
    complete: AtomicBool,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("source", &self.source.to_string())
            .field("message_id", &self.message_id)
            .field("content", &self.content)
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", content::summary(&self.content))
    }
}

impl Task {
    /// Only task sources construct tasks, from a message they just received.
    pub fn new(source: Arc<dyn TaskSource>, content: TaskContent, handle: BackendHandle) -> Self {
        Self {
            source,
            content,
            message_id: handle.message_id().to_string(),
            handle: Mutex::new(handle),
            complete: AtomicBool::new(false),
        }
    }

    pub fn content(&self) -> &TaskContent {
        &self.content
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Lock the backend handle.
    ///
    /// Sources hold this guard for the whole renewal round-trip so that a
    /// commit can never observe a handle that is about to be superseded.
    pub async fn handle(&self) -> MutexGuard<'_, BackendHandle> {
        self.handle.lock().await
    }

    /// Snapshot of the current backend handle.
    pub async fn current_handle(&self) -> BackendHandle {
        self.handle.lock().await.clone()
    }

    /// Extend this task's lease. No-op once the task is complete.
    pub async fn keep_alive(&self) -> Result<()> {
        if self.is_complete() {
            debug!(message_id = %self.message_id, "task complete; skipping lease renewal");
            return Ok(());
        }
        self.source.keep_alive(self).await
    }

    /// Permanently acknowledge this task with its source.
    ///
    /// Issues at most one successful commit; later calls are no-ops.
    pub async fn commit(&self) -> Result<()> {
        if self.is_complete() {
            debug!(message_id = %self.message_id, "task already committed");
            return Ok(());
        }
        self.source.commit(self).await?;
        self.complete.store(true, Ordering::Release);
        info!(message_id = %self.message_id, source = %self.source, "task committed");
        Ok(())
    }

    /// Run the plugin named by this task inside `sandbox`.
    ///
    /// Resolves the plugin (task content overrides configured defaults),
    /// fetches it when a source location is known, projects the content into
    /// `--key value` flags and waits for the process to exit.
    pub async fn train(
        &self,
        runner: &dyn PluginRunner,
        plugins: &PluginConfig,
        sandbox: &Path,
    ) -> Result<PluginOutcome> {
        let spec = PluginSpec::resolve(&self.content, plugins)?;

        match &spec.url {
            Some(url) => {
                info!(plugin = %spec.name, %url, "updating plugin");
                runner.fetch(&spec).await?;
            }
            None => info!(plugin = %spec.name, "using installed plugin"),
        }

        let invocation = spec.invocation(&self.content);
        info!(
            plugin = %spec.name,
            message_id = %self.message_id,
            task = %self,
            "processing task"
        );
        runner.run(&invocation, sandbox).await
    }
}
