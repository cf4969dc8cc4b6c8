//! Result aggregation
//!
//! Checks that every expected (suite, device) pair is accounted for, writes
//! the combined manifest and hands the staged artifacts to the report engine.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::engine::{run_to_completion, InvocationOutcome, Placeholders};
use crate::executor::SuiteOutcome;
use crate::models::Device;

use super::ArtifactState;

/// Manifest file written into the output directory
pub const MANIFEST_FILE: &str = "aggregate.json";

/// Aggregation errors
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("No result recorded for device {device} in suite {suite}")]
    Unaccounted { suite: String, device: String },

    #[error("Result for device {device} in suite {suite} recorded more than once")]
    Duplicate { suite: String, device: String },

    #[error("Device {device} in suite {suite} was not part of the run")]
    UnexpectedDevice { suite: String, device: String },

    #[error("Staged artifact disappeared: {0}")]
    ArtifactVanished(PathBuf),

    #[error("Report engine did not produce a report: {0}")]
    ReportEngine(String),

    #[error("Aggregation task failed: {0}")]
    Interrupted(String),

    #[error("Failed to write manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One (suite, device) pair in the manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub suite: String,
    pub device: String,

    /// Staged file name, relative to the staging directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Combined result of a run; contains no timestamps so it is reproducible
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AggregateManifest {
    pub run_name: String,
    pub ci_mode: bool,
    pub suites: Vec<String>,
    pub devices: Vec<String>,
    /// Merge inputs in suite-then-device order
    pub inputs: Vec<ManifestEntry>,
    pub missing: Vec<ManifestEntry>,
}

impl AggregateManifest {
    /// Build the manifest, failing on any unaccounted or duplicated pair
    pub fn plan(
        run_name: &str,
        ci_mode: bool,
        devices: &[Arc<Device>],
        executed: &[SuiteOutcome],
    ) -> Result<(Self, Vec<PathBuf>), AggregateError> {
        let expected: HashSet<&str> = devices.iter().map(|d| d.tag.as_str()).collect();
        let mut seen_suites = HashSet::new();
        let mut inputs = Vec::new();
        let mut missing = Vec::new();
        let mut paths = Vec::new();

        for outcome in executed {
            let suite = &outcome.suite.key;
            if !seen_suites.insert(suite.as_str()) {
                return Err(AggregateError::Duplicate {
                    suite: suite.clone(),
                    device: "*".to_string(),
                });
            }

            let mut by_tag: HashMap<&str, &ArtifactState> = HashMap::new();
            for status in &outcome.devices {
                let tag = status.device.tag.as_str();
                if !expected.contains(tag) {
                    return Err(AggregateError::UnexpectedDevice {
                        suite: suite.clone(),
                        device: tag.to_string(),
                    });
                }
                if by_tag.insert(tag, &status.artifact).is_some() {
                    return Err(AggregateError::Duplicate {
                        suite: suite.clone(),
                        device: tag.to_string(),
                    });
                }
            }

            for device in devices {
                let artifact =
                    by_tag
                        .get(device.tag.as_str())
                        .ok_or_else(|| AggregateError::Unaccounted {
                            suite: suite.clone(),
                            device: device.tag.clone(),
                        })?;

                match artifact {
                    ArtifactState::Staged { path } => {
                        if !path.is_file() {
                            return Err(AggregateError::ArtifactVanished(path.clone()));
                        }
                        inputs.push(ManifestEntry {
                            suite: suite.clone(),
                            device: device.tag.clone(),
                            artifact: path
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned()),
                            reason: None,
                        });
                        paths.push(path.clone());
                    }
                    ArtifactState::Missing { reason } => missing.push(ManifestEntry {
                        suite: suite.clone(),
                        device: device.tag.clone(),
                        artifact: None,
                        reason: Some(reason.clone()),
                    }),
                }
            }
        }

        let manifest = Self {
            run_name: run_name.to_string(),
            ci_mode,
            suites: executed.iter().map(|o| o.suite.key.clone()).collect(),
            devices: devices.iter().map(|d| d.tag.clone()).collect(),
            inputs,
            missing,
        };
        Ok((manifest, paths))
    }

    pub fn to_json(&self) -> Result<String, AggregateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What aggregation produced
#[derive(Clone, Debug)]
pub struct AggregateReport {
    pub manifest: AggregateManifest,
    pub manifest_path: PathBuf,
    pub output_dir: PathBuf,
    /// Staged files handed to the report engine, in merge order
    pub inputs: Vec<PathBuf>,
    /// How the report engine ended; `None` when there was nothing to render
    pub render: Option<InvocationOutcome>,
}

impl AggregateReport {
    pub fn rendered(&self) -> bool {
        self.render.is_some()
    }
}

/// Single writer of the combined report
pub struct Aggregator {
    config: Arc<RunConfig>,
}

impl Aggregator {
    pub fn new(config: Arc<RunConfig>) -> Self {
        Self { config }
    }

    /// Merge the executed suites; runs as its own task and waits for it
    pub async fn aggregate(
        &self,
        devices: &[Arc<Device>],
        executed: &[SuiteOutcome],
    ) -> Result<AggregateReport, AggregateError> {
        let config = self.config.clone();
        let devices = devices.to_vec();
        let executed = executed.to_vec();

        tokio::spawn(async move { merge(&config, &devices, &executed).await })
            .await
            .map_err(|e| AggregateError::Interrupted(e.to_string()))?
    }
}

async fn merge(
    config: &RunConfig,
    devices: &[Arc<Device>],
    executed: &[SuiteOutcome],
) -> Result<AggregateReport, AggregateError> {
    let (manifest, inputs) =
        AggregateManifest::plan(&config.run_name, config.ci_mode, devices, executed)?;

    let output_dir = config.workspace.output_dir();
    std::fs::create_dir_all(&output_dir)?;

    let manifest_path = output_dir.join(MANIFEST_FILE);
    let mut writer = BufWriter::new(File::create(&manifest_path)?);
    writer.write_all(manifest.to_json()?.as_bytes())?;
    writer.flush()?;
    debug!("Wrote {}", manifest_path.display());

    info!(
        "Aggregating {} artifact(s) from {} suite(s), {} missing",
        inputs.len(),
        manifest.suites.len(),
        manifest.missing.len()
    );

    if inputs.is_empty() {
        warn!("No staged artifacts; skipping report generation");
        return Ok(AggregateReport {
            manifest,
            manifest_path,
            output_dir,
            inputs,
            render: None,
        });
    }

    let report = &config.settings.report;
    let base = Placeholders::new()
        .with("name", &config.run_name)
        .with("outdir", output_dir.to_string_lossy());
    let mode_args = if config.ci_mode {
        &report.ci_args
    } else {
        &report.local_args
    };
    let mode_args: Vec<String> = mode_args.iter().map(|a| base.substitute(a)).collect();
    let vars = base.with_list("mode_args", mode_args).with_list(
        "inputs",
        inputs
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
    );

    debug!("Report: {}", report.command.display(&vars));
    let outcome = run_to_completion(
        report.command.to_command(&vars, config.verbose),
        &report.command.program,
        None,
    )
    .await;

    match outcome.exit_code() {
        Some(code) if code <= report.max_ok_exit_code => {
            info!("Report written to {}", output_dir.display());
            Ok(AggregateReport {
                manifest,
                manifest_path,
                output_dir,
                inputs,
                render: Some(outcome),
            })
        }
        _ => Err(AggregateError::ReportEngine(outcome.to_string())),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::RunnerSettings;
    use crate::engine::CommandTemplate;
    use crate::executor::DeviceRunStatus;
    use crate::models::{Suite, Target};
    use crate::workspace::Workspace;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    fn devices() -> Vec<Arc<Device>> {
        vec![
            Arc::new(Device::new("d1", "a", 4723)),
            Arc::new(Device::new("d2", "b", 4724)),
        ]
    }

    /// Stage real files for `suites` × `devices`, except pairs listed in `missing`
    fn outcomes(
        staging: &std::path::Path,
        suites: &[&str],
        devices: &[Arc<Device>],
        missing: &[(&str, &str)],
    ) -> Vec<SuiteOutcome> {
        std::fs::create_dir_all(staging).unwrap();
        suites
            .iter()
            .map(|name| {
                let suite = Suite::from_path(format!("{name}.robot"));
                let statuses = devices
                    .iter()
                    .map(|d| {
                        let artifact = if missing.contains(&(*name, d.tag.as_str())) {
                            ArtifactState::Missing {
                                reason: "no result artifact (exit 1)".to_string(),
                            }
                        } else {
                            let path = staging.join(format!("{}--{}.xml", suite.key, d.tag));
                            std::fs::write(&path, format!("<robot device='{}'/>", d.tag))
                                .unwrap();
                            ArtifactState::Staged { path }
                        };
                        DeviceRunStatus {
                            device: d.clone(),
                            outcome: InvocationOutcome::Completed { code: Some(0) },
                            artifact,
                            duration_ms: 1,
                        }
                    })
                    .collect();
                SuiteOutcome {
                    suite,
                    devices: statuses,
                    duration_ms: 1,
                }
            })
            .collect()
    }

    fn config(root: &std::path::Path, report: CommandTemplate, ci: bool) -> Arc<RunConfig> {
        let mut settings = RunnerSettings::default();
        settings.report.command = report;
        settings.report.ci_args = vec!["--ci".to_string()];
        settings.report.local_args = vec!["--title={name}".to_string()];
        Arc::new(
            RunConfig::new(Workspace::new(root), Target::File("x.robot".into()))
                .with_run_name("Nightly")
                .with_ci_mode(ci)
                .with_settings(settings),
        )
    }

    /// Report engine writing its arguments, one per line, to `<outdir>/report.txt`
    fn recording_engine() -> CommandTemplate {
        CommandTemplate::new("sh").args([
            "-c",
            "out=\"$0\"; for a in \"$@\"; do echo \"$a\"; done > \"$out/report.txt\"",
            "{outdir}",
            "{mode_args}",
            "{inputs}",
        ])
    }

    #[test]
    fn test_plan_orders_suite_then_device() {
        let dir = tempdir().unwrap();
        let devices = devices();
        let executed = outcomes(dir.path(), &["login", "search", "checkout"], &devices, &[]);

        let (manifest, paths) =
            AggregateManifest::plan("Nightly", false, &devices, &executed).unwrap();

        assert_eq!(paths.len(), 6);
        let order: Vec<String> = manifest
            .inputs
            .iter()
            .map(|e| format!("{}/{}", e.suite, e.device))
            .collect();
        assert_eq!(
            order,
            vec![
                "login/a",
                "login/b",
                "search/a",
                "search/b",
                "checkout/a",
                "checkout/b"
            ]
        );
        assert!(manifest.missing.is_empty());
    }

    #[test]
    fn test_plan_is_idempotent() {
        let dir = tempdir().unwrap();
        let devices = devices();
        let executed = outcomes(dir.path(), &["login", "search"], &devices, &[("search", "b")]);

        let (first, _) = AggregateManifest::plan("Nightly", true, &devices, &executed).unwrap();
        let (second, _) = AggregateManifest::plan("Nightly", true, &devices, &executed).unwrap();
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
        assert_eq!(first.missing.len(), 1);
        assert_eq!(first.missing[0].device, "b");
    }

    #[test]
    fn test_plan_fails_loudly() {
        let dir = tempdir().unwrap();
        let devices = devices();

        // device b never reported for login
        let mut executed = outcomes(dir.path(), &["login"], &devices, &[]);
        executed[0].devices.pop();
        let err = AggregateManifest::plan("n", false, &devices, &executed).unwrap_err();
        assert!(matches!(err, AggregateError::Unaccounted { ref device, .. } if device == "b"));

        // device a reported twice
        let mut executed = outcomes(dir.path(), &["search"], &devices, &[]);
        let dup = executed[0].devices[0].clone();
        executed[0].devices.push(dup);
        let err = AggregateManifest::plan("n", false, &devices, &executed).unwrap_err();
        assert!(matches!(err, AggregateError::Duplicate { .. }));

        // staged file removed behind our back
        let executed = outcomes(dir.path(), &["checkout"], &devices, &[]);
        std::fs::remove_file(executed[0].devices[1].artifact.staged_path().unwrap()).unwrap();
        let err = AggregateManifest::plan("n", false, &devices, &executed).unwrap_err();
        assert!(matches!(err, AggregateError::ArtifactVanished(_)));
    }

    #[tokio::test]
    async fn test_aggregate_invokes_report_engine() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), recording_engine(), false);
        let devices = devices();
        let executed = outcomes(
            &config.workspace.staging_dir(),
            &["login", "search"],
            &devices,
            &[],
        );

        let report = Aggregator::new(config.clone())
            .aggregate(&devices, &executed)
            .await
            .unwrap();
        assert!(report.rendered());
        assert_eq!(report.inputs.len(), 4);

        let args = std::fs::read_to_string(report.output_dir.join("report.txt")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert_eq!(args[0], "--title=Nightly");
        assert!(args[1].ends_with("login--a.xml"));
        assert!(args[4].ends_with("search--b.xml"));
    }

    #[tokio::test]
    async fn test_ci_mode_changes_presentation_only() {
        let dir = tempdir().unwrap();
        let devices = devices();
        let local = config(dir.path(), recording_engine(), false);
        let ci = config(dir.path(), recording_engine(), true);
        let executed = outcomes(&local.workspace.staging_dir(), &["login"], &devices, &[]);

        let local_report = Aggregator::new(local).aggregate(&devices, &executed).await.unwrap();
        let local_args = std::fs::read_to_string(local_report.output_dir.join("report.txt")).unwrap();

        let ci_report = Aggregator::new(ci).aggregate(&devices, &executed).await.unwrap();
        let ci_args = std::fs::read_to_string(ci_report.output_dir.join("report.txt")).unwrap();

        assert!(ci_args.starts_with("--ci\n"));
        assert_eq!(local_report.inputs, ci_report.inputs);
        assert_eq!(local_report.manifest.inputs, ci_report.manifest.inputs);
        assert_eq!(
            local_args.lines().skip(1).collect::<Vec<_>>(),
            ci_args.lines().skip(1).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_manifest_is_byte_identical_across_runs() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), recording_engine(), true);
        let devices = devices();
        let executed = outcomes(&config.workspace.staging_dir(), &["login"], &devices, &[]);
        let aggregator = Aggregator::new(config);

        let first = aggregator.aggregate(&devices, &executed).await.unwrap();
        let first_bytes = std::fs::read(&first.manifest_path).unwrap();
        let second = aggregator.aggregate(&devices, &executed).await.unwrap();
        let second_bytes = std::fs::read(&second.manifest_path).unwrap();

        assert_eq!(first_bytes, second_bytes);
    }

    #[tokio::test]
    async fn test_nothing_to_render() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), CommandTemplate::new("/nonexistent/rebot"), false);

        let report = assert_ok!(Aggregator::new(config).aggregate(&devices(), &[]).await);
        assert!(!report.rendered());
        assert!(report.manifest_path.exists());
    }

    #[tokio::test]
    async fn test_report_engine_failure_surfaces() {
        let dir = tempdir().unwrap();
        let failing = CommandTemplate::new("sh").args(["-c", "exit 252"]);
        let config = config(dir.path(), failing, false);
        let devices = devices();
        let executed = outcomes(&config.workspace.staging_dir(), &["login"], &devices, &[]);

        let result = Aggregator::new(config).aggregate(&devices, &executed).await;
        let err = assert_err!(result);
        assert!(matches!(err, AggregateError::ReportEngine(_)));
    }
}
