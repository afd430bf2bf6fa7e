// src/plugin/mod.rs

//! Plugin process boundary.
//!
//! A plugin is an external executable reached only through its command line
//! and exit code:
//!
//! ```text
//! <interpreter> <plugins>/<name>/<entry> --<key1> <value1> --<key2> <value2> ...
//! ```
//!
//! run with its working directory set to a fresh, task-scoped sandbox.
//!
//! - [`sandbox`] creates and removes the per-task working directory.
//! - [`fetch`] clones or updates a plugin from its source location.
//! - [`runner`] provides the `PluginRunner` trait's process implementation.

pub mod fetch;
pub mod runner;
pub mod sandbox;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::PluginConfig;
use crate::errors::{Result, TraindError};
use crate::task::TaskContent;
use crate::types::BoxFuture;

pub use runner::ProcessPluginRunner;
pub use sandbox::Sandbox;

/// Content key naming the plugin to run.
pub const PLUGIN_KEY: &str = "plugin";
/// Content key naming where the plugin can be fetched from.
pub const PLUGIN_URL_KEY: &str = "plugin_url";

/// How a plugin process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginOutcome {
    Success,
    /// Non-zero exit; `-1` when the process was killed by a signal.
    Failed(i32),
    /// Killed after exceeding the configured plugin timeout.
    TimedOut,
}

impl PluginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PluginOutcome::Success)
    }
}

/// A resolved plugin: which one, where it lives, where it comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub name: String,
    pub url: Option<String>,
    /// `<plugins>/<name>`
    pub dir: PathBuf,
    /// `<plugins>/<name>/<entry>`
    pub entry: PathBuf,
    pub interpreter: Option<String>,
}

impl PluginSpec {
    /// Resolve the plugin for a task.
    ///
    /// The task's `plugin` / `plugin_url` keys win over the configured
    /// defaults. The default URL only applies to the default plugin.
    pub fn resolve(content: &TaskContent, config: &PluginConfig) -> Result<Self> {
        let (name, url) = match content.get(PLUGIN_KEY) {
            Some(name) => (name.clone(), content.get(PLUGIN_URL_KEY).cloned()),
            None => (
                config.default_name.clone(),
                content
                    .get(PLUGIN_URL_KEY)
                    .cloned()
                    .or_else(|| config.default_url.clone()),
            ),
        };

        validate_plugin_name(&name)?;

        let dir = config.dir.join(&name);
        let entry = dir.join(&config.entry);

        Ok(Self {
            name,
            url: url.filter(|u| !u.trim().is_empty()),
            dir,
            entry,
            interpreter: config.interpreter.clone(),
        })
    }

    /// Build the command line for running this plugin on `content`.
    pub fn invocation(&self, content: &TaskContent) -> PluginInvocation {
        let (program, script) = match &self.interpreter {
            Some(interpreter) => (PathBuf::from(interpreter), Some(self.entry.clone())),
            None => (self.entry.clone(), None),
        };

        PluginInvocation {
            plugin: self.name.clone(),
            program,
            script,
            flags: content_flags(content),
        }
    }
}

/// A concrete plugin command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInvocation {
    pub plugin: String,
    pub program: PathBuf,
    /// Script handed to the interpreter, if one is used.
    pub script: Option<PathBuf>,
    pub flags: Vec<String>,
}

impl fmt::Display for PluginInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        if let Some(script) = &self.script {
            write!(f, " {}", script.display())?;
        }
        for flag in &self.flags {
            write!(f, " {flag}")?;
        }
        Ok(())
    }
}

/// Project every content pair into a long-form flag, in content order.
pub fn content_flags(content: &TaskContent) -> Vec<String> {
    let mut flags = Vec::with_capacity(content.len() * 2);
    for (key, value) in content {
        flags.push(format!("--{key}"));
        flags.push(value.clone());
    }
    flags
}

fn validate_plugin_name(name: &str) -> Result<()> {
    let bad = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if bad {
        return Err(TraindError::InvalidContent(format!(
            "invalid plugin name '{name}'"
        )));
    }
    Ok(())
}

/// Trait abstracting how plugins are fetched and executed.
///
/// Production code uses [`ProcessPluginRunner`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait PluginRunner: Send + Sync {
    /// Make sure the plugin described by `spec` is installed and current.
    ///
    /// Only called when the spec carries a source location.
    fn fetch<'a>(&'a self, spec: &'a PluginSpec) -> BoxFuture<'a, Result<()>>;

    /// Run the plugin with `sandbox` as its working directory and wait for
    /// it to exit.
    fn run<'a>(
        &'a self,
        invocation: &'a PluginInvocation,
        sandbox: &'a Path,
    ) -> BoxFuture<'a, Result<PluginOutcome>>;
}
