// tests/plugin_process.rs
//
// Runs real child processes through `sh`, so unix only.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use traind::config::PluginConfig;
use traind::daemon::{Daemon, PollOutcome, TaskDisposition};
use traind::plugin::{PluginOutcome, PluginRunner, PluginSpec, ProcessPluginRunner, Sandbox};
use traind::source::TaskSource;
use traind::task::parse_content;
use traind_test_utils::{ConfigBuilder, FakeTaskSource, init_tracing, with_timeout};

const RECORDING_PLUGIN: &str = r#"
printf '%s\n' "$@" > args.txt
pwd -P > cwd.txt
echo "training on $2"
echo "a warning" >&2
"#;

fn install_plugin(plugins: &Path, name: &str, body: &str) {
    let dir = plugins.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("plugin.sh"), body).unwrap();
}

fn plugin_config(plugins: &Path) -> PluginConfig {
    PluginConfig {
        default_name: "hello-world".to_string(),
        default_url: None,
        dir: plugins.to_path_buf(),
        interpreter: Some("sh".to_string()),
        entry: "plugin.sh".to_string(),
    }
}

#[tokio::test]
async fn plugin_receives_flags_and_runs_in_sandbox() {
    init_tracing();
    let plugins = tempfile::tempdir().unwrap();
    install_plugin(plugins.path(), "recorder", RECORDING_PLUGIN);

    let content = parse_content(
        r#"{"plugin": "recorder", "annotations": "https://x/ann.csv", "model": "out dir/model.h5"}"#,
    )
    .unwrap();
    let spec = PluginSpec::resolve(&content, &plugin_config(plugins.path())).unwrap();
    let invocation = spec.invocation(&content);

    let sandbox = Sandbox::create(None).unwrap();
    let runner = ProcessPluginRunner::new(None);
    let outcome = with_timeout(runner.run(&invocation, sandbox.path())).await.unwrap();
    assert_eq!(outcome, PluginOutcome::Success);

    let args = std::fs::read_to_string(sandbox.path().join("args.txt")).unwrap();
    assert_eq!(
        args.lines().collect::<Vec<_>>(),
        vec![
            "--plugin", "recorder",
            "--annotations", "https://x/ann.csv",
            "--model", "out dir/model.h5",
        ]
    );

    let cwd = std::fs::read_to_string(sandbox.path().join("cwd.txt")).unwrap();
    assert_eq!(
        PathBuf::from(cwd.trim()),
        std::fs::canonicalize(sandbox.path()).unwrap()
    );

    let path = sandbox.path().to_path_buf();
    sandbox.close().unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn non_zero_exit_is_reported() {
    init_tracing();
    let plugins = tempfile::tempdir().unwrap();
    install_plugin(plugins.path(), "broken", "exit 7\n");

    let content = parse_content(r#"{"plugin": "broken"}"#).unwrap();
    let invocation = PluginSpec::resolve(&content, &plugin_config(plugins.path()))
        .unwrap()
        .invocation(&content);

    let sandbox = Sandbox::create(None).unwrap();
    let outcome = with_timeout(ProcessPluginRunner::new(None).run(&invocation, sandbox.path()))
        .await
        .unwrap();
    assert_eq!(outcome, PluginOutcome::Failed(7));
}

#[tokio::test]
async fn plugin_exceeding_timeout_is_killed() {
    init_tracing();
    let plugins = tempfile::tempdir().unwrap();
    install_plugin(plugins.path(), "sleepy", "sleep 30\n");

    let content = parse_content(r#"{"plugin": "sleepy"}"#).unwrap();
    let invocation = PluginSpec::resolve(&content, &plugin_config(plugins.path()))
        .unwrap()
        .invocation(&content);

    let sandbox = Sandbox::create(None).unwrap();
    let runner = ProcessPluginRunner::new(Some(Duration::from_millis(200)));
    let outcome = with_timeout(runner.run(&invocation, sandbox.path())).await.unwrap();
    assert_eq!(outcome, PluginOutcome::TimedOut);
}

#[tokio::test]
async fn missing_interpreter_is_an_error() {
    init_tracing();
    let plugins = tempfile::tempdir().unwrap();
    let mut cfg = plugin_config(plugins.path());
    cfg.interpreter = Some("/nonexistent/interpreter".to_string());

    let content = parse_content(r#"{"plugin": "anything"}"#).unwrap();
    let invocation = PluginSpec::resolve(&content, &cfg).unwrap().invocation(&content);

    let sandbox = Sandbox::create(None).unwrap();
    assert!(ProcessPluginRunner::new(None)
        .run(&invocation, sandbox.path())
        .await
        .is_err());
}

#[tokio::test]
async fn daemon_with_real_plugins_commits_only_successes() {
    init_tracing();
    let plugins = tempfile::tempdir().unwrap();
    let sandboxes = tempfile::tempdir().unwrap();
    install_plugin(plugins.path(), "hello-world", "echo hello\n");
    install_plugin(plugins.path(), "retinanet", "exit 3\n");

    let cfg = ConfigBuilder::new()
        .plugin_dir(plugins.path())
        .interpreter(Some("sh"))
        .entry("plugin.sh")
        .sandbox_root(sandboxes.path())
        .build();

    let source = FakeTaskSource::new();
    source.push_batch(&[
        r#"{"plugin": "hello-world"}"#,
        r#"{"plugin": "retinanet", "annotations": "https://x/ann.csv"}"#,
    ]);

    let runner: Arc<dyn PluginRunner> = Arc::new(ProcessPluginRunner::new(None));
    let task_source: Arc<dyn TaskSource> = source.clone();
    let daemon = Daemon::new(task_source, runner, &cfg);

    let outcome = with_timeout(daemon.run_once()).await;
    assert_eq!(
        outcome,
        PollOutcome::Processed(vec![TaskDisposition::Committed, TaskDisposition::Abandoned])
    );
    assert_eq!(source.committed(), vec!["t0".to_string()]);
    assert!(std::fs::read_dir(sandboxes.path()).unwrap().next().is_none());
}
