use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use traind::errors::{Result, TraindError};
use traind::plugin::{PluginInvocation, PluginOutcome, PluginRunner, PluginSpec};
use traind::types::BoxFuture;

/// What the fake runner observed for one plugin run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub invocation: PluginInvocation,
    pub sandbox: PathBuf,
    /// Whether the sandbox directory existed when the "plugin" started.
    pub sandbox_existed: bool,
    pub started: Instant,
    pub finished: Instant,
}

/// A plugin runner that spawns nothing.
///
/// Each run sleeps for the configured delay (virtual time under
/// `start_paused`), drops a file into the sandbox and returns the next
/// scripted outcome, or the default outcome once the script is exhausted.
pub struct FakePluginRunner {
    outcomes: Mutex<VecDeque<PluginOutcome>>,
    default_outcome: PluginOutcome,
    delay: Duration,
    fail_fetch: bool,
    runs: Mutex<Vec<RunRecord>>,
    fetches: Mutex<Vec<PluginSpec>>,
}

impl FakePluginRunner {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            default_outcome: PluginOutcome::Success,
            delay: Duration::ZERO,
            fail_fetch: false,
            runs: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Every run exits with `code` (0 is success).
    pub fn exiting_with(mut self, code: i32) -> Self {
        self.default_outcome = outcome_for(code);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    /// Script the exit code of the next run.
    pub fn push_exit_code(&self, code: i32) {
        self.outcomes.lock().unwrap().push_back(outcome_for(code));
    }

    pub fn push_outcome(&self, outcome: PluginOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<PluginSpec> {
        self.fetches.lock().unwrap().clone()
    }
}

impl Default for FakePluginRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn outcome_for(code: i32) -> PluginOutcome {
    if code == 0 {
        PluginOutcome::Success
    } else {
        PluginOutcome::Failed(code)
    }
}

impl PluginRunner for FakePluginRunner {
    fn fetch<'a>(&'a self, spec: &'a PluginSpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.fetches.lock().unwrap().push(spec.clone());
            if self.fail_fetch {
                return Err(TraindError::Other(anyhow::anyhow!(
                    "fetching plugin '{}' failed",
                    spec.name
                )));
            }
            Ok(())
        })
    }

    fn run<'a>(
        &'a self,
        invocation: &'a PluginInvocation,
        sandbox: &'a Path,
    ) -> BoxFuture<'a, Result<PluginOutcome>> {
        Box::pin(async move {
            let started = Instant::now();
            let sandbox_existed = sandbox.is_dir();
            if sandbox_existed {
                std::fs::write(sandbox.join("model.h5"), b"weights")?;
            }

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.default_outcome);

            self.runs.lock().unwrap().push(RunRecord {
                invocation: invocation.clone(),
                sandbox: sandbox.to_path_buf(),
                sandbox_existed,
                started,
                finished: Instant::now(),
            });
            Ok(outcome)
        })
    }
}
