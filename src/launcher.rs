//! Run orchestration
//!
//! Validates the target and device configuration, then drives the supervisor,
//! the suite sequencer and the aggregator in that order.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::engine::distribution;
use crate::executor::{ParallelSuiteRunner, SuiteSequencer};
use crate::models::{discover, DeviceRegistry, RegistryError, SuiteError};
use crate::results::{Aggregator, RunSummary};
use crate::supervisor::Supervisor;
use crate::utils::FatalLog;

/// Exit code for an unusable invocation target
pub const EXIT_BAD_TARGET: u8 = 21;

/// Exit code for missing or invalid device configuration
pub const EXIT_NO_DEVICES: u8 = 15;

/// Fatal preconditions, detected before any execution unit starts
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Invalid target: {0}")]
    BadTarget(#[from] SuiteError),

    #[error("No device configuration found in {0}")]
    NoDevices(PathBuf),

    #[error("Invalid device configuration: {0}")]
    DeviceConfig(#[from] RegistryError),
}

impl LaunchError {
    pub fn exit_code(&self) -> u8 {
        match self {
            LaunchError::BadTarget(_) => EXIT_BAD_TARGET,
            LaunchError::NoDevices(_) | LaunchError::DeviceConfig(_) => EXIT_NO_DEVICES,
        }
    }
}

/// Execute every suite of the target on every ready device and aggregate
pub async fn launch(config: Arc<RunConfig>) -> Result<RunSummary> {
    let engine = &config.settings.engine;

    let suites = discover(&config.target, &engine.suite_extension).map_err(LaunchError::from)?;
    info!("Discovered {} suite(s)", suites.len());

    let conf_dir = config.workspace.conf_dir();
    let registry = DeviceRegistry::load(&conf_dir).map_err(LaunchError::from)?;
    if registry.is_empty() {
        return Err(LaunchError::NoDevices(conf_dir).into());
    }

    config.workspace.prepare()?;

    if let Some(settings) = &engine.distribution {
        distribution::refresh(
            settings,
            &config.workspace.engine_dir(),
            config.force_refresh,
        )
        .await
        .context("Failed to prepare the engine distribution")?;
    }

    let mut supervisor = Supervisor::start(&config, &registry).await;
    let devices = supervisor.available_devices();
    if devices.is_empty() {
        warn!("No execution unit is ready; suites will produce no results");
    }
    supervisor.mark_running();

    let sequencer = SuiteSequencer::new(ParallelSuiteRunner::new(config.clone()))
        .with_fatal_log(FatalLog::new(config.workspace.log_file()));
    let sequence = sequencer.run_all(&devices, &suites).await;

    if let Some(reason) = &sequence.aborted {
        warn!(
            "Run stopped after {}/{} suite(s) ({}); aggregating what completed",
            sequence.completed.len(),
            sequence.total,
            reason
        );
    }

    let aggregate = Aggregator::new(config.clone())
        .aggregate(&devices, &sequence.completed)
        .await;

    // units are released whether or not aggregation succeeded
    supervisor.stop();
    let aggregate = aggregate.context("Failed to aggregate results")?;

    Ok(RunSummary::new(&config.run_name, &sequence)
        .with_devices(devices.len(), supervisor.unavailable_devices().len())
        .with_aggregate(&aggregate))
}
