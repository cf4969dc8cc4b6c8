//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::Parser;
use std::path::PathBuf;

use crate::config::DEFAULT_RUN_NAME;
use crate::models::Target;

/// Parallel UI test-suite runner for mobile devices
#[derive(Parser, Debug)]
#[command(name = "device-suite-runner")]
#[command(version = "0.1.0")]
#[command(about = "Run UI test suites on every configured device in parallel")]
#[command(long_about = None)]
pub struct Args {
    /// Run every suite file under this directory (wins over --file)
    #[arg(short, long)]
    pub directory: Option<PathBuf>,

    /// Run a single suite file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Name of the run, used for the combined report
    #[arg(short = 't', long, default_value = DEFAULT_RUN_NAME)]
    pub testname: String,

    /// Format the combined report for continuous integration
    #[arg(short, long)]
    pub jenkins: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Re-clone the engine distribution before running
    #[arg(long, visible_alias = "force")]
    pub forceupdate: bool,

    /// Settings file (YAML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Workspace root holding device configuration and results
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Write the default settings to this file and exit
    #[arg(long, value_name = "PATH")]
    pub init_config: Option<PathBuf>,
}

impl Args {
    /// What to execute; `None` when neither a directory nor a file was given
    pub fn target(&self) -> Option<Target> {
        match (&self.directory, &self.file) {
            (Some(dir), _) => Some(Target::Directory(dir.clone())),
            (None, Some(file)) => Some(Target::File(file.clone())),
            (None, None) => None,
        }
    }
}
