use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::time::Instant;
use traind::errors::{Result, TraindError};
use traind::source::TaskSource;
use traind::task::{BackendHandle, Task, parse_content};
use traind::types::{BoxFuture, SourceKind};

/// One call the daemon made into the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    Receive,
    KeepAlive { message_id: String, receipt: String },
    Commit { message_id: String, receipt: String },
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub call: SourceCall,
}

enum Scripted {
    Tasks(Vec<(String, String)>),
    Fail(String),
}

/// In-memory task source behaving like a storage queue.
///
/// - Receives pop scripted batches; once the script runs out every receive is
///   empty.
/// - Every renewal hands out a fresh receipt (`<id>-r<n>`) and invalidates
///   the previous one; renewals and commits with a stale receipt fail with
///   `LeaseLost`.
/// - A commit consumes the message, so a second commit fails too.
/// - Every call is recorded with a `tokio::time::Instant`, so tests running
///   with paused time can assert on exact spacing.
pub struct FakeTaskSource {
    script: Mutex<VecDeque<Scripted>>,
    next_id: Mutex<u32>,
    receipts: Mutex<HashMap<String, String>>,
    renewals: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<RecordedCall>>,
    committed: Mutex<Vec<String>>,
    receive_count: watch::Sender<usize>,
    fail_keep_alive: AtomicBool,
}

impl FakeTaskSource {
    pub fn new() -> Arc<Self> {
        let (receive_count, _) = watch::channel(0);
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            next_id: Mutex::new(0),
            receipts: Mutex::new(HashMap::new()),
            renewals: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            receive_count,
            fail_keep_alive: AtomicBool::new(false),
        })
    }

    /// Script the next receive to return one task per JSON body. Returns the
    /// message ids assigned (`t0`, `t1`, ...).
    pub fn push_batch(&self, bodies: &[&str]) -> Vec<String> {
        let mut next_id = self.next_id.lock().unwrap();
        let batch: Vec<(String, String)> = bodies
            .iter()
            .map(|body| {
                let id = format!("t{}", *next_id);
                *next_id += 1;
                (id, body.to_string())
            })
            .collect();
        let ids = batch.iter().map(|(id, _)| id.clone()).collect();
        self.script.lock().unwrap().push_back(Scripted::Tasks(batch));
        ids
    }

    /// Script the next receive to return nothing.
    pub fn push_empty(&self) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Tasks(Vec::new()));
    }

    /// Script the next receive to fail.
    pub fn push_receive_error(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(message.to_string()));
    }

    /// Make every subsequent renewal fail as if the lease had lapsed: the
    /// message's receipt is dropped, so a later commit fails too.
    pub fn fail_keep_alive(&self, fail: bool) {
        self.fail_keep_alive.store(fail, Ordering::SeqCst);
    }

    /// Replace a message's receipt as if another consumer had taken it over.
    pub fn steal(&self, message_id: &str) {
        self.receipts
            .lock()
            .unwrap()
            .insert(message_id.to_string(), "stolen".to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn receive_times(&self) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter(|c| c.call == SourceCall::Receive)
            .map(|c| c.at)
            .collect()
    }

    pub fn keep_alives(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c.call, SourceCall::KeepAlive { .. }))
            .collect()
    }

    /// Every commit attempt as `(message_id, receipt)`, successful or not.
    pub fn commits(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c.call {
                SourceCall::Commit {
                    message_id,
                    receipt,
                } => Some((message_id, receipt)),
                _ => None,
            })
            .collect()
    }

    /// Message ids whose commit was accepted.
    pub fn committed(&self) -> Vec<String> {
        self.committed.lock().unwrap().clone()
    }

    /// Resolve once at least `n` receives have been issued.
    pub async fn wait_for_receives(&self, n: usize) {
        let mut rx = self.receive_count.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    fn record(&self, call: SourceCall) {
        self.calls.lock().unwrap().push(RecordedCall {
            at: Instant::now(),
            call,
        });
    }

    fn check(&self, message_id: &str, receipt: &str) -> Result<()> {
        match self.receipts.lock().unwrap().get(message_id) {
            Some(current) if current == receipt => Ok(()),
            _ => Err(TraindError::LeaseLost(format!("{message_id}/{receipt}"))),
        }
    }
}

impl fmt::Display for FakeTaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fake source")
    }
}

fn queue_handle(handle: &mut BackendHandle) -> Result<(&str, &mut String)> {
    match handle {
        BackendHandle::Queue {
            message_id,
            pop_receipt,
        } => Ok((message_id.as_str(), pop_receipt)),
        BackendHandle::Bus { .. } => Err(TraindError::HandleMismatch("fake")),
    }
}

impl TaskSource for FakeTaskSource {
    fn kind(&self) -> SourceKind {
        SourceKind::StorageQueue
    }

    fn receive(self: Arc<Self>) -> BoxFuture<'static, Result<Vec<Task>>> {
        Box::pin(async move {
            self.record(SourceCall::Receive);
            self.receive_count.send_modify(|count| *count += 1);

            let next = self.script.lock().unwrap().pop_front();
            let batch = match next {
                None => Vec::new(),
                Some(Scripted::Fail(message)) => {
                    return Err(TraindError::Backend {
                        status: 503,
                        message,
                    });
                }
                Some(Scripted::Tasks(batch)) => batch,
            };

            let source: Arc<dyn TaskSource> = self.clone();
            let mut tasks = Vec::with_capacity(batch.len());
            for (message_id, body) in batch {
                let receipt = format!("{message_id}-r0");
                self.receipts
                    .lock()
                    .unwrap()
                    .insert(message_id.clone(), receipt.clone());
                tasks.push(Task::new(
                    Arc::clone(&source),
                    parse_content(&body)?,
                    BackendHandle::Queue {
                        message_id,
                        pop_receipt: receipt,
                    },
                ));
            }
            Ok(tasks)
        })
    }

    fn keep_alive<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut handle = task.handle().await;
            let (message_id, receipt) = queue_handle(&mut handle)?;
            self.record(SourceCall::KeepAlive {
                message_id: message_id.to_string(),
                receipt: receipt.clone(),
            });

            self.check(message_id, receipt)?;
            if self.fail_keep_alive.load(Ordering::SeqCst) {
                self.receipts.lock().unwrap().remove(message_id);
                return Err(TraindError::LeaseLost(format!("{message_id}: renewal refused")));
            }

            let n = {
                let mut renewals = self.renewals.lock().unwrap();
                let n = renewals.entry(message_id.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            let renewed = format!("{message_id}-r{n}");
            self.receipts
                .lock()
                .unwrap()
                .insert(message_id.to_string(), renewed.clone());
            *receipt = renewed;
            Ok(())
        })
    }

    fn commit<'a>(&'a self, task: &'a Task) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut handle = task.handle().await;
            let (message_id, receipt) = queue_handle(&mut handle)?;
            self.record(SourceCall::Commit {
                message_id: message_id.to_string(),
                receipt: receipt.clone(),
            });
            self.check(message_id, receipt)?;
            self.receipts.lock().unwrap().remove(message_id);
            self.committed.lock().unwrap().push(message_id.to_string());
            Ok(())
        })
    }
}
