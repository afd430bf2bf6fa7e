// src/task/keep_alive.rs

//! Per-task lease renewal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::Task;

/// Handle to the background ticker renewing one task's lease.
///
/// - The first renewal happens one `interval` after [`KeepAlive::start`].
/// - A failed renewal stops the ticker; the commit that follows will then
///   surface the lost lease explicitly.
/// - [`KeepAlive::stop`] is idempotent and waits for the ticker to exit, so
///   once it returns no renewal is in flight and none will be issued.
/// - Dropping the handle without stopping aborts the ticker.
#[derive(Debug)]
pub struct KeepAlive {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    pub fn start(task: Arc<Task>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    // Either an explicit stop or the sender being dropped.
                    _ = &mut stop_rx => break,

                    _ = ticker.tick() => {
                        match task.keep_alive().await {
                            Ok(()) => {
                                debug!(message_id = %task.message_id(), "lease renewed");
                            }
                            Err(e) => {
                                warn!(
                                    message_id = %task.message_id(),
                                    error = %e,
                                    "lease renewal failed; no further renewals for this task"
                                );
                                break;
                            }
                        }
                    }
                }
            }

            debug!(message_id = %task.message_id(), "keep-alive ticker finished");
        });

        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop renewing and wait until the ticker has exited.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            // Err means the ticker already exited on its own.
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "keep-alive ticker panicked");
                }
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_none()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::sync::Mutex;

    use super::*;
    use crate::errors::Result;
    use crate::source::TaskSource;
    use crate::task::{BackendHandle, TaskContent};
    use crate::types::{BoxFuture, SourceKind};

    /// Source whose renewals take `delay` to complete.
    struct SlowSource {
        delay: Duration,
        started: Mutex<Vec<Instant>>,
        finished: Mutex<Vec<Instant>>,
    }

    impl fmt::Display for SlowSource {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("slow source")
        }
    }

    impl TaskSource for SlowSource {
        fn kind(&self) -> SourceKind {
            SourceKind::StorageQueue
        }

        fn receive(self: Arc<Self>) -> BoxFuture<'static, Result<Vec<Task>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn keep_alive<'a>(&'a self, _task: &'a Task) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.started.lock().unwrap().push(Instant::now());
                time::sleep(self.delay).await;
                self.finished.lock().unwrap().push(Instant::now());
                Ok(())
            })
        }

        fn commit<'a>(&'a self, _task: &'a Task) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn slow_task(delay: Duration) -> (Arc<SlowSource>, Arc<Task>) {
        let source = Arc::new(SlowSource {
            delay,
            started: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        });
        let task = Task::new(
            source.clone(),
            TaskContent::new(),
            BackendHandle::Queue {
                message_id: "m0".to_string(),
                pop_receipt: "r0".to_string(),
            },
        );
        (source, Arc::new(task))
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_renewal() {
        let (source, task) = slow_task(Duration::from_secs(3));
        let t0 = Instant::now();
        let mut keep_alive = KeepAlive::start(task, Duration::from_secs(1));

        // First renewal starts at 1s and is still running at 1.5s.
        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(source.started.lock().unwrap().len(), 1);
        assert!(source.finished.lock().unwrap().is_empty());

        keep_alive.stop().await;
        let stopped_at = Instant::now();
        assert!(keep_alive.is_stopped());
        assert_eq!(stopped_at - t0, Duration::from_secs(4));
        assert_eq!(*source.finished.lock().unwrap(), vec![stopped_at]);

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.started.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let (source, task) = slow_task(Duration::ZERO);
        let mut keep_alive = KeepAlive::start(task, Duration::from_secs(1));
        assert!(!keep_alive.is_stopped());

        time::sleep(Duration::from_millis(2500)).await;
        keep_alive.stop().await;
        keep_alive.stop().await;
        assert!(keep_alive.is_stopped());

        let renewals = source.started.lock().unwrap().len();
        assert_eq!(renewals, 2);
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.started.lock().unwrap().len(), renewals);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_before_first_tick_renews_nothing() {
        let (source, task) = slow_task(Duration::ZERO);
        let mut keep_alive = KeepAlive::start(task, Duration::from_secs(1));
        keep_alive.stop().await;

        time::sleep(Duration::from_secs(5)).await;
        assert!(source.started.lock().unwrap().is_empty());
    }
}
