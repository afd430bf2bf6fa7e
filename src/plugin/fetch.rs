// src/plugin/fetch.rs

//! Fetch or update a plugin from its source location with `git`.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, anyhow};
use tokio::process::Command;
use tracing::{debug, info};

use super::PluginSpec;
use crate::errors::Result;

/// What `fetch_plugin` will do for a spec, given the current disk state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// No source location: use whatever is installed.
    Skip,
    /// Plugin directory absent: shallow clone.
    Clone { url: String },
    /// Plugin directory present: fast-forward pull.
    Update,
}

impl FetchPlan {
    pub fn for_spec(spec: &PluginSpec) -> Self {
        match &spec.url {
            None => FetchPlan::Skip,
            Some(url) if !spec.dir.exists() => FetchPlan::Clone { url: url.clone() },
            Some(_) => FetchPlan::Update,
        }
    }

    /// Arguments passed to `git` for this plan, if any.
    pub fn git_args(&self, dir: &Path) -> Option<Vec<String>> {
        let dir = dir.display().to_string();
        match self {
            FetchPlan::Skip => None,
            FetchPlan::Clone { url } => Some(vec![
                "clone".to_string(),
                "--depth".to_string(),
                "1".to_string(),
                "--".to_string(),
                url.clone(),
                dir,
            ]),
            FetchPlan::Update => Some(vec![
                "-C".to_string(),
                dir,
                "pull".to_string(),
                "--ff-only".to_string(),
            ]),
        }
    }
}

/// Clone or update the plugin described by `spec`.
pub async fn fetch_plugin(git: &Path, spec: &PluginSpec) -> Result<()> {
    let plan = FetchPlan::for_spec(spec);
    let Some(args) = plan.git_args(&spec.dir) else {
        debug!(plugin = %spec.name, "no plugin source location; nothing to fetch");
        return Ok(());
    };

    if let Some(parent) = spec.dir.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating plugin directory {:?}", parent))?;
    }

    info!(plugin = %spec.name, ?plan, "fetching plugin");

    let output = Command::new(git)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("running git for plugin '{}'", spec.name))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "git {} failed for plugin '{}' ({}): {}",
            args.join(" "),
            spec.name,
            output.status,
            stderr.trim()
        )
        .into());
    }

    Ok(())
}
