//! Engine distribution checkout
//!
//! Keeps a git checkout of a customized engine inside the workspace.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::info;

use crate::config::DistributionSettings;

/// Ensure the distribution exists at `dir`, re-cloning it when `force` is set
pub async fn refresh(settings: &DistributionSettings, dir: &Path, force: bool) -> Result<()> {
    if force && dir.exists() {
        info!("Removing engine distribution at {}", dir.display());
        tokio::fs::remove_dir_all(dir)
            .await
            .with_context(|| format!("Failed to remove {}", dir.display()))?;
    }

    if dir.exists() {
        info!("Using engine distribution at {}", dir.display());
        return Ok(());
    }

    info!(
        "Cloning engine distribution {} into {}",
        settings.repository,
        dir.display()
    );

    let mut command = Command::new("git");
    command.arg("clone").arg("--depth").arg("1");
    if let Some(branch) = &settings.branch {
        command.arg("--branch").arg(branch);
    }
    command.arg(&settings.repository).arg(dir);

    let output = command.output().await.context("Failed to run git")?;
    if !output.status.success() {
        bail!(
            "git clone of {} failed: {}",
            settings.repository,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(())
}
