//! End-of-run summary

use std::fmt;
use std::path::PathBuf;

use crate::executor::SequenceReport;

use super::AggregateReport;

/// Counts printed once the run is over
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub run_name: String,
    pub devices: usize,
    pub unavailable: usize,
    pub suites_total: usize,
    pub suites_executed: usize,
    pub invocations: usize,
    pub failed_invocations: usize,
    pub staged: usize,
    pub missing: usize,
    pub aborted: Option<String>,
    /// Artifacts handed to the report engine
    pub merged: usize,
    pub manifest: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
    pub total_duration_ms: u64,
}

impl RunSummary {
    pub fn new(run_name: impl Into<String>, sequence: &SequenceReport) -> Self {
        let invocations: usize = sequence.completed.iter().map(|o| o.devices.len()).sum();
        let failed_invocations: usize = sequence.completed.iter().map(|o| o.failed_count()).sum();
        let staged: usize = sequence.completed.iter().map(|o| o.staged_count()).sum();

        Self {
            run_name: run_name.into(),
            suites_total: sequence.total,
            suites_executed: sequence.progress.len(),
            invocations,
            failed_invocations,
            staged,
            missing: invocations - staged,
            aborted: sequence.aborted.clone(),
            total_duration_ms: sequence.duration_ms,
            ..Default::default()
        }
    }

    pub fn with_devices(mut self, available: usize, unavailable: usize) -> Self {
        self.devices = available;
        self.unavailable = unavailable;
        self
    }

    pub fn with_aggregate(mut self, report: &AggregateReport) -> Self {
        self.merged = report.inputs.len();
        self.missing = report.manifest.missing.len();
        self.manifest = Some(report.manifest_path.clone());
        if report.rendered() {
            self.report_dir = Some(report.output_dir.clone());
        }
        self
    }

    pub fn is_complete(&self) -> bool {
        self.aborted.is_none() && self.suites_executed == self.suites_total
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_name)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Devices: {} ready | {} unavailable",
            self.devices, self.unavailable
        )?;
        writeln!(
            f,
            "Suites: {}/{} executed",
            self.suites_executed, self.suites_total
        )?;
        writeln!(
            f,
            "Invocations: {} | Failed: {} | Staged: {} | Missing: {}",
            self.invocations, self.failed_invocations, self.staged, self.missing
        )?;
        if let Some(reason) = &self.aborted {
            writeln!(f, "Aborted: {reason}")?;
        }
        if let Some(manifest) = &self.manifest {
            writeln!(f, "Manifest: {} ({} merged)", manifest.display(), self.merged)?;
        }
        match &self.report_dir {
            Some(dir) => writeln!(f, "Report: {}", dir.display())?,
            None => writeln!(f, "Report: not generated")?,
        }
        write!(f, "Duration: {}ms", self.total_duration_ms)
    }
}
