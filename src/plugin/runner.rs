// src/plugin/runner.rs

//! Plugin process runner.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::{info, warn};

use super::fetch::fetch_plugin;
use super::{PluginInvocation, PluginOutcome, PluginRunner, PluginSpec};
use crate::errors::Result;
use crate::types::BoxFuture;

/// Runs plugins as child processes.
///
/// Plugin stdout/stderr are forwarded into the log line by line and never
/// interpreted; the exit code is the only signal.
#[derive(Debug, Clone, Default)]
pub struct ProcessPluginRunner {
    timeout: Option<Duration>,
}

impl ProcessPluginRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl PluginRunner for ProcessPluginRunner {
    fn fetch<'a>(&'a self, spec: &'a PluginSpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(fetch_plugin(Path::new("git"), spec))
    }

    fn run<'a>(
        &'a self,
        invocation: &'a PluginInvocation,
        sandbox: &'a Path,
    ) -> BoxFuture<'a, Result<PluginOutcome>> {
        Box::pin(run_plugin(invocation, sandbox, self.timeout))
    }
}

async fn run_plugin(
    invocation: &PluginInvocation,
    sandbox: &Path,
    timeout: Option<Duration>,
) -> Result<PluginOutcome> {
    info!(
        plugin = %invocation.plugin,
        sandbox = %sandbox.display(),
        cmd = %invocation,
        "starting plugin process"
    );

    let mut cmd = Command::new(&invocation.program);
    if let Some(script) = &invocation.script {
        cmd.arg(script);
    }
    cmd.args(&invocation.flags)
        .current_dir(sandbox)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for plugin '{}'", invocation.plugin))?;

    if let Some(stdout) = child.stdout.take() {
        forward_stdout(invocation.plugin.clone(), stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_stderr(invocation.plugin.clone(), stderr);
    }

    let status = match timeout {
        None => child.wait().await,
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    plugin = %invocation.plugin,
                    timeout = ?limit,
                    "plugin exceeded its timeout; killing process"
                );
                if let Err(e) = child.kill().await {
                    warn!(plugin = %invocation.plugin, error = %e, "failed to kill plugin process");
                }
                return Ok(PluginOutcome::TimedOut);
            }
        },
    }
    .with_context(|| format!("waiting for plugin '{}'", invocation.plugin))?;

    let code = status.code().unwrap_or(-1);
    info!(
        plugin = %invocation.plugin,
        exit_code = code,
        success = status.success(),
        "plugin process exited"
    );

    Ok(if status.success() {
        PluginOutcome::Success
    } else {
        PluginOutcome::Failed(code)
    })
}

// Always consume both pipes so the child never blocks on a full buffer.
fn forward_stdout(plugin: String, stdout: ChildStdout) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(plugin = %plugin, "stdout: {}", line);
        }
    });
}

fn forward_stderr(plugin: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!(plugin = %plugin, "stderr: {}", line);
        }
    });
}
