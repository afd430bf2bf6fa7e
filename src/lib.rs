// src/lib.rs

pub mod azure;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod logging;
pub mod plugin;
pub mod source;
pub mod task;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{Config, load_and_validate};
use crate::daemon::{Daemon, PollOutcome};
use crate::errors::Result;
use crate::plugin::{PluginRunner, ProcessPluginRunner};
use crate::source::{select_source, supported_kind};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (file + environment)
/// - task source selection
/// - the plugin runner
/// - the daemon loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(args.config.as_deref().map(Path::new))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let source = select_source(&cfg)?;
    let runner: Arc<dyn PluginRunner> =
        Arc::new(ProcessPluginRunner::new(cfg.daemon.plugin_timeout));
    let daemon = Daemon::new(source, runner, &cfg);

    if args.once {
        let outcome = daemon.run_once().await;
        match outcome {
            PollOutcome::ReceiveFailed => warn!("single cycle finished; receive failed"),
            outcome => info!(?outcome, "single cycle finished"),
        }
        return Ok(());
    }

    daemon
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                // Without a signal handler, run until killed.
                warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
}

/// Print the resolved settings and the task source that would be used.
fn print_dry_run(cfg: &Config) {
    println!("traind dry-run");
    println!("  daemon.poll_interval = {:?}", cfg.daemon.poll_interval);
    println!("  daemon.keep_alive_interval = {:?}", cfg.daemon.keep_alive_interval);
    println!("  daemon.lease_duration = {:?}", cfg.daemon.lease_duration);
    match cfg.daemon.plugin_timeout {
        Some(timeout) => println!("  daemon.plugin_timeout = {timeout:?}"),
        None => println!("  daemon.plugin_timeout = none"),
    }
    if let Some(root) = &cfg.daemon.sandbox_root {
        println!("  daemon.sandbox_root = {}", root.display());
    }
    println!();

    println!("plugin:");
    println!("  default_name: {}", cfg.plugin.default_name);
    if let Some(url) = &cfg.plugin.default_url {
        println!("  default_url: {url}");
    }
    println!("  dir: {}", cfg.plugin.dir.display());
    println!("  entry: {}", cfg.plugin.entry);
    match &cfg.plugin.interpreter {
        Some(interpreter) => println!("  interpreter: {interpreter}"),
        None => println!("  interpreter: (run entry directly)"),
    }
    println!();

    if let Some(sq) = &cfg.storage_queue {
        println!("storage queue: {}/{}", sq.account_name, sq.queue_name);
        println!("  endpoint: {}", sq.endpoint);
        println!("  message_count: {}", sq.message_count);
    }
    if let Some(sb) = &cfg.service_bus {
        println!("service bus: {}/{}", sb.namespace, sb.queue_name);
        println!("  endpoint: {}", sb.endpoint);
    }

    match supported_kind(cfg) {
        Some(kind) => println!("selected source: {kind}"),
        None => println!("selected source: none (no backend configured)"),
    }

    debug!("dry-run complete (no polling)");
}
