//! Suite sequencing
//!
//! Runs suites one after another through a [`SuiteExecutor`]. An error
//! escaping a suite stops the sequence; completed suites are kept so the
//! caller can still aggregate them.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::models::{Device, Suite};
use crate::utils::FatalLog;

use super::{SuiteExecutor, SuiteOutcome};

/// Emitted after each completed suite
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressRecord {
    pub suite: String,
    pub index: usize,
    pub total: usize,
}

impl fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.total)
    }
}

/// What the sequence achieved
#[derive(Debug, Default)]
pub struct SequenceReport {
    /// Suites whose barrier completed, in execution order
    pub completed: Vec<SuiteOutcome>,
    pub progress: Vec<ProgressRecord>,
    pub total: usize,
    /// Error that stopped the sequence early
    pub aborted: Option<String>,
    pub duration_ms: u64,
}

/// Strictly sequential suite loop
pub struct SuiteSequencer<E> {
    executor: E,
    fatal_log: Option<FatalLog>,
}

impl<E: SuiteExecutor> SuiteSequencer<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            fatal_log: None,
        }
    }

    pub fn with_fatal_log(mut self, log: FatalLog) -> Self {
        self.fatal_log = Some(log);
        self
    }

    #[cfg(test)]
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run every suite in order; never returns an error
    pub async fn run_all(&self, devices: &[Arc<Device>], suites: &[Suite]) -> SequenceReport {
        let start = Instant::now();
        let mut report = SequenceReport {
            total: suites.len(),
            ..Default::default()
        };

        for (position, suite) in suites.iter().enumerate() {
            match self.executor.run_suite(devices, suite).await {
                Ok(outcome) => {
                    let record = ProgressRecord {
                        suite: suite.name.clone(),
                        index: position + 1,
                        total: suites.len(),
                    };
                    print_progress(&record, &outcome);
                    report.progress.push(record);
                    report.completed.push(outcome);
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    error!("Suite {} aborted the run: {}", suite.name, message);
                    if let Some(log) = &self.fatal_log {
                        match log.record("Error on test execution", &message) {
                            Ok(()) => info!("Error recorded in {}", log.path().display()),
                            Err(log_err) => error!("{:#}", log_err),
                        }
                    }
                    report.aborted = Some(message);
                    break;
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }
}

fn print_progress(record: &ProgressRecord, outcome: &SuiteOutcome) {
    println!("{:=<64}", "");
    println!(
        "Suite : {} finished ({}/{} device(s) staged, {}ms)",
        record.suite,
        outcome.staged_count(),
        outcome.devices.len(),
        outcome.duration_ms
    );
    println!("Total : {record} suite(s) completed");
    println!("{:=<64}", "");
    info!("Progress {} ({})", record, record.suite);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InvocationOutcome;
    use crate::executor::DeviceRunStatus;
    use crate::results::ArtifactState;
    use anyhow::{bail, Result};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records calls; fails on the suite named `fail_on`
    struct ScriptedExecutor {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl ScriptedExecutor {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on,
            }
        }
    }

    impl SuiteExecutor for ScriptedExecutor {
        async fn run_suite(&self, devices: &[Arc<Device>], suite: &Suite) -> Result<SuiteOutcome> {
            self.calls.lock().unwrap().push(suite.name.clone());
            if self.fail_on == Some(suite.name.as_str()) {
                bail!("staging directory vanished");
            }
            Ok(SuiteOutcome {
                suite: suite.clone(),
                devices: devices
                    .iter()
                    .map(|d| DeviceRunStatus {
                        device: d.clone(),
                        outcome: InvocationOutcome::Completed { code: Some(0) },
                        artifact: ArtifactState::Staged {
                            path: format!("{}--{}.xml", suite.key, d.tag).into(),
                        },
                        duration_ms: 1,
                    })
                    .collect(),
                duration_ms: 1,
            })
        }
    }

    fn suites(names: &[&str]) -> Vec<Suite> {
        names
            .iter()
            .map(|n| Suite::from_path(format!("{n}.robot")))
            .collect()
    }

    fn devices() -> Vec<Arc<Device>> {
        vec![
            Arc::new(Device::new("d1", "a", 4723)),
            Arc::new(Device::new("d2", "b", 4724)),
        ]
    }

    #[tokio::test]
    async fn test_runs_in_order_with_progress() {
        let sequencer = SuiteSequencer::new(ScriptedExecutor::new(None));
        let report = sequencer
            .run_all(&devices(), &suites(&["login", "search", "checkout"]))
            .await;

        assert!(report.aborted.is_none());
        assert_eq!(report.completed.len(), report.total);
        assert_eq!(
            *sequencer.executor().calls.lock().unwrap(),
            vec!["login", "search", "checkout"]
        );
        let progress: Vec<String> = report.progress.iter().map(|p| p.to_string()).collect();
        assert_eq!(progress, vec!["1/3", "2/3", "3/3"]);

        let staged: usize = report.completed.iter().map(|o| o.staged_count()).sum();
        assert_eq!(staged, 6);
    }

    #[tokio::test]
    async fn test_error_stops_remaining_suites() {
        let dir = tempdir().unwrap();
        let log = FatalLog::new(dir.path().join("runner.log"));
        let sequencer =
            SuiteSequencer::new(ScriptedExecutor::new(Some("search"))).with_fatal_log(log.clone());

        let report = sequencer
            .run_all(&devices(), &suites(&["login", "search", "checkout"]))
            .await;

        assert!(report.aborted.is_some());
        assert_eq!(
            *sequencer.executor().calls.lock().unwrap(),
            vec!["login", "search"]
        );
        let executed: Vec<&str> = report
            .completed
            .iter()
            .map(|o| o.suite.name.as_str())
            .collect();
        assert_eq!(executed, vec!["login"]);
        assert_eq!(report.aborted.as_deref(), Some("staging directory vanished"));

        let logged = std::fs::read_to_string(log.path()).unwrap();
        assert!(logged.contains("Error on test execution : staging directory vanished"));
    }

    #[tokio::test]
    async fn test_empty_suite_list() {
        let sequencer = SuiteSequencer::new(ScriptedExecutor::new(None));
        let report = sequencer.run_all(&devices(), &[]).await;
        assert!(report.aborted.is_none());
        assert_eq!(report.total, 0);
        assert!(report.progress.is_empty());
    }
}
