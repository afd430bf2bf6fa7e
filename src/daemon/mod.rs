// src/daemon/mod.rs

//! The polling loop and the per-task processing sequence.
//!
//! ```text
//! loop:
//!     receive()            -- empty or error: sleep poll_interval
//!     for each task:
//!         sandbox + keep-alive
//!         train            -- blocks until the plugin exits
//!         stop keep-alive, remove sandbox
//!         commit on exit 0, otherwise abandon
//! ```
//!
//! Tasks are processed strictly one after another; the only concurrency is
//! the keep-alive ticker running alongside the plugin wait.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{Config, DaemonConfig, PluginConfig};
use crate::errors::Result;
use crate::plugin::{PluginOutcome, PluginRunner, Sandbox};
use crate::source::TaskSource;
use crate::task::{KeepAlive, Task};

/// Result of one receive/process cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The source had no work.
    Idle,
    /// The receive call failed; treated as transient.
    ReceiveFailed,
    /// Every received task was carried through its lifecycle.
    Processed(Vec<TaskDisposition>),
}

/// How one task's lifecycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDisposition {
    /// Plugin succeeded and the task was acknowledged.
    Committed,
    /// Plugin failed, timed out, or could not be started; the task is left
    /// for the backend to expire and redeliver.
    Abandoned,
    /// Plugin succeeded but the acknowledgment was rejected, typically
    /// because the lease was lost.
    CommitFailed,
}

impl PollOutcome {
    /// Whether the loop should back off before the next receive.
    pub fn should_sleep(&self) -> bool {
        !matches!(self, PollOutcome::Processed(_))
    }
}

pub struct Daemon {
    source: Arc<dyn TaskSource>,
    runner: Arc<dyn PluginRunner>,
    settings: DaemonConfig,
    plugins: PluginConfig,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("source", &self.source.to_string())
            .field("settings", &self.settings)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    pub fn new(source: Arc<dyn TaskSource>, runner: Arc<dyn PluginRunner>, config: &Config) -> Self {
        Self {
            source,
            runner,
            settings: config.daemon.clone(),
            plugins: config.plugin.clone(),
        }
    }

    /// Poll until `shutdown` resolves.
    ///
    /// Shutdown is observed at any await point. A task interrupted mid-run is
    /// not committed: its plugin process is killed, its sandbox removed, and
    /// the backend redelivers it once the lease lapses.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            source = %self.source,
            poll_interval = ?self.settings.poll_interval,
            keep_alive_interval = ?self.settings.keep_alive_interval,
            "daemon started"
        );

        loop {
            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                outcome = self.run_once() => outcome,
            };

            if outcome.should_sleep() {
                debug!(?outcome, sleep = ?self.settings.poll_interval, "backing off");
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }

        info!("shutdown requested; daemon exiting");
        Ok(())
    }

    /// One receive followed by sequential processing of what it returned.
    pub async fn run_once(&self) -> PollOutcome {
        let tasks = match Arc::clone(&self.source).receive().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(source = %self.source, error = %e, "receive failed; will retry");
                return PollOutcome::ReceiveFailed;
            }
        };

        if tasks.is_empty() {
            debug!(source = %self.source, "no tasks");
            return PollOutcome::Idle;
        }

        info!(source = %self.source, count = tasks.len(), "received tasks");
        let mut dispositions = Vec::with_capacity(tasks.len());
        for task in tasks {
            dispositions.push(self.process_task(task).await);
        }
        PollOutcome::Processed(dispositions)
    }

    /// Carry one task from receipt to commit or abandonment.
    pub async fn process_task(&self, task: Task) -> TaskDisposition {
        let task = Arc::new(task);
        let message_id = task.message_id().to_string();

        let sandbox = match Sandbox::create(self.settings.sandbox_root.as_deref()) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                error!(%message_id, error = %e, "could not create sandbox; abandoning task");
                return TaskDisposition::Abandoned;
            }
        };

        let mut keep_alive = KeepAlive::start(Arc::clone(&task), self.settings.keep_alive_interval);
        let trained = task
            .train(self.runner.as_ref(), &self.plugins, sandbox.path())
            .await;
        keep_alive.stop().await;

        if let Err(e) = sandbox.close() {
            warn!(%message_id, error = %e, "failed to remove sandbox");
        }

        match trained {
            Ok(PluginOutcome::Success) => match task.commit().await {
                Ok(()) => TaskDisposition::Committed,
                Err(e) => {
                    error!(%message_id, error = %e, "commit failed; task not acknowledged");
                    TaskDisposition::CommitFailed
                }
            },
            Ok(PluginOutcome::Failed(code)) => {
                warn!(%message_id, exit_code = code, "plugin failed; task left for redelivery");
                TaskDisposition::Abandoned
            }
            Ok(PluginOutcome::TimedOut) => {
                warn!(%message_id, "plugin timed out; task left for redelivery");
                TaskDisposition::Abandoned
            }
            Err(e) => {
                error!(%message_id, error = %e, "plugin could not run; task left for redelivery");
                TaskDisposition::Abandoned
            }
        }
    }
}
