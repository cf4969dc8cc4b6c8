//! Test execution engine
//!
//! Per-suite parallel fan-out across devices and the sequential suite loop.

mod parallel;
mod sequencer;

#[cfg(test)]
pub use parallel::DeviceRunStatus;
#[cfg(test)]
pub use sequencer::ProgressRecord;
pub use parallel::{ParallelSuiteRunner, SuiteOutcome};
pub use sequencer::{SequenceReport, SuiteSequencer};

use anyhow::Result;
use std::sync::Arc;

use crate::models::{Device, Suite};

/// Runs one suite across a set of devices, returning once all have finished
#[allow(async_fn_in_trait)]
pub trait SuiteExecutor {
    async fn run_suite(&self, devices: &[Arc<Device>], suite: &Suite) -> Result<SuiteOutcome>;
}
