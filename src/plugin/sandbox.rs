// src/plugin/sandbox.rs

use std::path::Path;

use anyhow::Context;
use tempfile::TempDir;
use tracing::debug;

use crate::errors::Result;

/// Task-scoped working directory for a plugin process.
///
/// The directory is removed by [`Sandbox::close`], or on drop if the
/// processing path never reaches `close` (early return, panic, cancelled
/// future).
#[derive(Debug)]
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    /// Create a fresh sandbox under `root`, or the system temp dir.
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("traind-");

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)
                    .with_context(|| format!("creating sandbox root {:?}", root))?;
                builder
                    .tempdir_in(root)
                    .with_context(|| format!("creating sandbox in {:?}", root))?
            }
            None => builder.tempdir().context("creating sandbox in temp dir")?,
        };

        debug!(sandbox = %dir.path().display(), "sandbox created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the sandbox and everything the plugin left in it.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("removing sandbox {:?}", path))?;
        debug!(sandbox = %path.display(), "sandbox removed");
        Ok(())
    }
}
