//! Staging area for per-device, per-suite artifacts
//!
//! Each (device, suite) pair owns exactly one path, so concurrent producers
//! never touch the same file.

use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::models::{Device, Suite};

/// Where an expected artifact ended up
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ArtifactState {
    Staged { path: PathBuf },
    Missing { reason: String },
}

impl ArtifactState {
    pub fn staged_path(&self) -> Option<&Path> {
        match self {
            ArtifactState::Staged { path } => Some(path),
            ArtifactState::Missing { .. } => None,
        }
    }
}

/// Directory holding staged artifacts until aggregation
#[derive(Clone, Debug)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    /// Deterministic staged file name for a pair
    pub fn artifact_name(suite: &Suite, device: &Device, extension: Option<&str>) -> String {
        match extension {
            Some(ext) => format!("{}--{}.{}", suite.key, device.tag, ext),
            None => format!("{}--{}", suite.key, device.tag),
        }
    }

    /// Move a raw result into staging; `Ok(None)` when the engine wrote nothing
    pub async fn stage(
        &self,
        raw: &Path,
        suite: &Suite,
        device: &Device,
    ) -> io::Result<Option<PathBuf>> {
        if !fs::try_exists(raw).await? {
            return Ok(None);
        }

        let extension = raw.extension().and_then(|e| e.to_str());
        let target = self
            .dir
            .join(Self::artifact_name(suite, device, extension));

        if fs::try_exists(&target).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("artifact already staged: {}", target.display()),
            ));
        }

        if fs::rename(raw, &target).await.is_err() {
            // rename fails across filesystems
            fs::copy(raw, &target).await?;
            fs::remove_file(raw).await?;
        }

        debug!("Staged {} -> {}", raw.display(), target.display());
        Ok(Some(target))
    }

    /// Every staged file, sorted by name
    #[cfg(test)]
    pub async fn list(&self) -> io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_stage_moves_raw_output() {
        let dir = tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));
        staging.ensure().await.unwrap();

        let raw = dir.path().join("output.xml");
        std::fs::write(&raw, "<robot/>").unwrap();

        let suite = Suite::from_path("suites/login.robot");
        let device = Device::new("emulator-5554", "01", 4723);

        let staged = staging.stage(&raw, &suite, &device).await.unwrap().unwrap();
        assert_eq!(staged, staging.dir().join("login--01.xml"));
        assert!(!raw.exists());
        assert_eq!(std::fs::read_to_string(&staged).unwrap(), "<robot/>");
        assert_eq!(staging.list().await.unwrap(), vec![staged]);
    }

    #[tokio::test]
    async fn test_stage_without_output() {
        let dir = tempdir().unwrap();
        let staging = StagingArea::new(dir.path());

        let result = staging
            .stage(
                &dir.path().join("missing.xml"),
                &Suite::from_path("login.robot"),
                &Device::new("d", "01", 4723),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_stage_refuses_duplicates() {
        let dir = tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));
        staging.ensure().await.unwrap();

        let suite = Suite::from_path("login.robot");
        let device = Device::new("d", "01", 4723);
        let raw = dir.path().join("output.xml");

        std::fs::write(&raw, "first").unwrap();
        staging.stage(&raw, &suite, &device).await.unwrap();

        std::fs::write(&raw, "second").unwrap();
        let err = staging.stage(&raw, &suite, &device).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
}
