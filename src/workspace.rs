//! Runner workspace layout
//!
//! Every path the runner reads or writes is derived from one root directory.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default workspace root, relative to the current directory
pub const DEFAULT_WORKSPACE: &str = "./runner";

/// On-disk layout of a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Device configuration files
    pub fn conf_dir(&self) -> PathBuf {
        self.root.join("devices_conf")
    }

    /// Raw per-device engine output
    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    pub fn device_output_dir(&self, tag: &str) -> PathBuf {
        self.work_dir().join(tag)
    }

    /// Per-device, per-suite artifacts waiting for aggregation
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Final combined report
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Checkout of the execution engine distribution
    pub fn engine_dir(&self) -> PathBuf {
        self.root.join("engine")
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join("runner.log")
    }

    /// Create the layout and clear results left by a previous run
    pub fn prepare(&self) -> Result<()> {
        for dir in [self.work_dir(), self.staging_dir(), self.output_dir()] {
            if dir.exists() {
                debug!("Clearing {}", dir.display());
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("Failed to clear directory: {}", dir.display()))?;
            }
        }

        for dir in [
            self.conf_dir(),
            self.work_dir(),
            self.staging_dir(),
            self.output_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        Ok(())
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(DEFAULT_WORKSPACE)
    }
}
