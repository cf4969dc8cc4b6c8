//! Configuration module
//!
//! Settings read from an optional file are merged with command-line flags
//! into one immutable [`RunConfig`] shared by every component.

mod env;
mod file;

pub use env::EnvConfig;
pub(crate) use file::expand_path;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::CommandTemplate;
use crate::models::Target;
use crate::workspace::Workspace;

/// Run name used when none is given
pub const DEFAULT_RUN_NAME: &str = "Default-Test";

/// Settling delay after starting execution units
pub const DEFAULT_SETTLE_SECS: u64 = 5;

/// Everything a run needs, built once at startup
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub workspace: Workspace,
    pub target: Target,
    pub run_name: String,
    pub verbose: bool,
    pub ci_mode: bool,
    pub force_refresh: bool,
    pub settings: RunnerSettings,
}

impl RunConfig {
    pub fn new(workspace: Workspace, target: Target) -> Self {
        Self {
            workspace,
            target,
            run_name: DEFAULT_RUN_NAME.to_string(),
            verbose: false,
            ci_mode: false,
            force_refresh: false,
            settings: RunnerSettings::default(),
        }
    }

    pub fn with_run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = name.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_ci_mode(mut self, ci_mode: bool) -> Self {
        self.ci_mode = ci_mode;
        self
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// File-backed settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub service: ServiceSettings,
    pub readiness: ReadinessSettings,
    pub engine: EngineSettings,
    pub report: ReportSettings,
}

/// Per-device background service (execution unit)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Command starting the service for one device
    pub command: CommandTemplate,

    /// Arguments repeated for every device capability (`{key}`, `{value}`)
    pub capability_args: Vec<String>,

    /// Command killing services left behind by a crashed run
    pub cleanup: Option<CommandTemplate>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            command: CommandTemplate::new("appium").args([
                "--address",
                "{host}",
                "--port",
                "{port}",
                "--session-override",
                "{capabilities}",
            ]),
            capability_args: Vec::new(),
            cleanup: Some(CommandTemplate::new("pkill").args(["-f", "appium"])),
        }
    }
}

/// How the supervisor decides execution units are ready
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReadinessSettings {
    /// Wait a fixed delay after starting every unit
    Settle {
        #[serde(default = "default_settle_secs")]
        delay_secs: u64,
    },

    /// Poll each unit over HTTP until it answers or the timeout elapses
    Poll {
        #[serde(default = "default_poll_path")]
        path: String,
        #[serde(default = "default_poll_interval_ms")]
        interval_ms: u64,
        #[serde(default = "default_poll_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_settle_secs() -> u64 {
    DEFAULT_SETTLE_SECS
}

fn default_poll_path() -> String {
    "/wd/hub/status".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_poll_timeout_secs() -> u64 {
    60
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        ReadinessSettings::Settle {
            delay_secs: DEFAULT_SETTLE_SECS,
        }
    }
}

/// Per-device test engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Command running one suite against one device
    pub command: CommandTemplate,

    /// Arguments repeated for every device capability (`{key}`, `{value}`)
    pub capability_args: Vec<String>,

    /// Name of the raw result file the engine writes into `{outdir}`
    pub result_file: String,

    /// Extension of suite files discovered in a target directory
    pub suite_extension: String,

    /// Kill an invocation after this many seconds; unset means wait forever
    pub timeout_secs: Option<u64>,

    /// Cap on concurrent invocations; defaults to the device count
    pub max_parallel: Option<usize>,

    /// Customized engine checked out into the workspace
    pub distribution: Option<DistributionSettings>,
}

impl EngineSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: CommandTemplate::new("robot").args([
                "--outputdir",
                "{outdir}",
                "--output",
                "{output}",
                "--report",
                "NONE",
                "--log",
                "NONE",
                "--variable",
                "REMOTE_URL:http://{host}:{port}/wd/hub",
                "--variable",
                "UDID:{udid}",
                "--variable",
                "DEVICE_TAG:{tag}",
                "{capabilities}",
                "{suite}",
            ]),
            capability_args: vec!["--variable".to_string(), "{key}:{value}".to_string()],
            result_file: "output.xml".to_string(),
            suite_extension: "robot".to_string(),
            timeout_secs: None,
            max_parallel: None,
            distribution: None,
        }
    }
}

/// Git repository holding a customized engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSettings {
    pub repository: String,

    #[serde(default)]
    pub branch: Option<String>,
}

/// Report engine invoked once over every staged artifact
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// `{mode_args}` expands to `ci_args` or `local_args`, `{inputs}` to the staged files
    pub command: CommandTemplate,

    pub ci_args: Vec<String>,

    pub local_args: Vec<String>,

    /// Highest exit code still counted as a rendered report
    pub max_ok_exit_code: i32,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            command: CommandTemplate::new("rebot").args([
                "--name",
                "{name}",
                "--outputdir",
                "{outdir}",
                "--output",
                "output.xml",
                "{mode_args}",
                "{inputs}",
            ]),
            ci_args: vec![
                "--xunit".to_string(),
                "xunit.xml".to_string(),
                "--nostatusrc".to_string(),
            ],
            local_args: vec!["--reporttitle".to_string(), "{name}".to_string()],
            // robot-style engines exit with the failed test count, capped at 250
            max_ok_exit_code: 250,
        }
    }
}
