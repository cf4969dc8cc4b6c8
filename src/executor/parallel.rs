//! Parallel suite execution
//!
//! Fans one suite out to every device, joins on all invocations, then moves
//! each device's raw result into staging.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::engine::{run_to_completion, InvocationOutcome};
use crate::models::{Device, Suite};
use crate::results::{ArtifactState, StagingArea};

use super::SuiteExecutor;

/// Result of one device running one suite
#[derive(Clone, Debug)]
pub struct DeviceRunStatus {
    pub device: Arc<Device>,
    pub outcome: InvocationOutcome,
    pub artifact: ArtifactState,
    pub duration_ms: u64,
}

impl fmt::Display for DeviceRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let artifact = match &self.artifact {
            ArtifactState::Staged { .. } => "staged".to_string(),
            ArtifactState::Missing { reason } => format!("missing: {reason}"),
        };
        write!(
            f,
            "{}: {} ({}ms, {})",
            self.device.tag, self.outcome, self.duration_ms, artifact
        )
    }
}

/// Every device's result for one suite, in device order
#[derive(Clone, Debug)]
pub struct SuiteOutcome {
    pub suite: Suite,
    pub devices: Vec<DeviceRunStatus>,
    pub duration_ms: u64,
}

impl SuiteOutcome {
    pub fn staged_count(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| d.artifact.staged_path().is_some())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| !d.outcome.is_success())
            .count()
    }
}

/// Runs one suite on every device at once
pub struct ParallelSuiteRunner {
    config: Arc<RunConfig>,
    staging: StagingArea,
}

impl ParallelSuiteRunner {
    pub fn new(config: Arc<RunConfig>) -> Self {
        let staging = StagingArea::new(config.workspace.staging_dir());
        Self { config, staging }
    }

    #[cfg(test)]
    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Fan out, wait for every device, then stage the results
    pub async fn run(&self, devices: &[Arc<Device>], suite: &Suite) -> Result<SuiteOutcome> {
        let start = Instant::now();
        let engine = &self.config.settings.engine;

        self.staging
            .ensure()
            .await
            .with_context(|| format!("Failed to create {}", self.staging.dir().display()))?;

        let pool_size = engine
            .max_parallel
            .unwrap_or(devices.len())
            .clamp(1, devices.len().max(1));
        let semaphore = Arc::new(Semaphore::new(pool_size));

        info!(
            "Running {} on {} device(s) ({} at a time)",
            suite.name,
            devices.len(),
            pool_size
        );

        let mut handles = Vec::with_capacity(devices.len());
        for device in devices {
            let semaphore = semaphore.clone();
            let config = self.config.clone();
            let device = device.clone();
            let suite = suite.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let started = Instant::now();
                let outcome = invoke_engine(&config, &device, &suite).await;
                (outcome, started.elapsed().as_millis() as u64)
            }));
        }

        // hard barrier: every invocation has ended before anything is staged
        let joined = join_all(handles).await;

        let mut statuses = Vec::with_capacity(devices.len());
        for (device, joined) in devices.iter().zip(joined) {
            let (outcome, duration_ms) = joined.unwrap_or_else(|e| {
                (
                    InvocationOutcome::Failed {
                        reason: format!("invocation task crashed: {e}"),
                    },
                    0,
                )
            });

            if !outcome.is_success() {
                warn!("{} on {}: {}", suite.name, device.tag, outcome);
            }

            let raw = self.raw_result_path(device);
            let artifact = match self
                .staging
                .stage(&raw, suite, device)
                .await
                .with_context(|| format!("Failed to stage {}", raw.display()))?
            {
                Some(path) => ArtifactState::Staged { path },
                None => ArtifactState::Missing {
                    reason: format!("no result artifact ({outcome})"),
                },
            };

            let status = DeviceRunStatus {
                device: device.clone(),
                outcome,
                artifact,
                duration_ms,
            };
            debug!("{}", status);
            statuses.push(status);
        }

        Ok(SuiteOutcome {
            suite: suite.clone(),
            devices: statuses,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn raw_result_path(&self, device: &Device) -> PathBuf {
        self.config
            .workspace
            .device_output_dir(&device.tag)
            .join(&self.config.settings.engine.result_file)
    }
}

impl SuiteExecutor for ParallelSuiteRunner {
    async fn run_suite(&self, devices: &[Arc<Device>], suite: &Suite) -> Result<SuiteOutcome> {
        self.run(devices, suite).await
    }
}

/// One engine invocation for one device
async fn invoke_engine(config: &RunConfig, device: &Device, suite: &Suite) -> InvocationOutcome {
    let engine = &config.settings.engine;
    let outdir = config.workspace.device_output_dir(&device.tag);

    // a result left by the previous suite must not be staged again
    if let Err(e) = prepare_output_dir(&outdir, &engine.result_file).await {
        return InvocationOutcome::Failed {
            reason: format!("cannot prepare {}: {e}", outdir.display()),
        };
    }

    let vars = device
        .engine_placeholders(engine)
        .with("suite", suite.path.to_string_lossy())
        .with("suite_name", &suite.name)
        .with("outdir", outdir.to_string_lossy())
        .with("output", &engine.result_file)
        .with("name", &config.run_name)
        .with("engine_dir", config.workspace.engine_dir().to_string_lossy());

    debug!("{}: {}", device.tag, engine.command.display(&vars));
    let command = engine.command.to_command(&vars, config.verbose);
    run_to_completion(command, &engine.command.program, engine.timeout()).await
}

async fn prepare_output_dir(outdir: &std::path::Path, result_file: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(outdir).await?;
    let stale = outdir.join(result_file);
    if tokio::fs::try_exists(&stale).await? {
        tokio::fs::remove_file(&stale).await?;
    }
    Ok(())
}
