//! Device Suite Runner - parallel UI test suites across mobile devices
//!
//! Starts one automation service per configured device, runs every suite of
//! the target on all devices at once, one suite after another, and merges the
//! per-device results into a single report.
//!
//! ## Usage
//!
//! ```bash
//! # Run every suite under a directory
//! device-suite-runner --directory suites/ --testname Nightly
//!
//! # Run one suite, report formatted for CI
//! device-suite-runner --file suites/login.robot --jenkins
//!
//! # Re-clone the engine distribution first
//! device-suite-runner -d suites/ --forceupdate
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

mod cli;
mod config;
mod engine;
mod executor;
mod launcher;
mod models;
mod results;
mod supervisor;
mod utils;
mod workspace;

use cli::Args;
use config::{EnvConfig, RunConfig, RunnerSettings};
use launcher::{LaunchError, EXIT_BAD_TARGET};
use utils::{init_logger, LogLevel};
use workspace::Workspace;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(LogLevel::from_verbose(env.verbose_or(args.verbose)));

    if let Some(path) = &args.init_config {
        return match RunnerSettings::default().save(path) {
            Ok(()) => {
                println!("Default settings written to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    let Some(target) = args.target() else {
        eprintln!("Either --directory or --file is required\n");
        // nothing useful can be done if stderr is gone
        let _ = Args::command().print_help();
        return ExitCode::from(EXIT_BAD_TARGET);
    };

    match run(args, env, target).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<LaunchError>() {
            Some(launch_err) => {
                error!("{}", launch_err);
                ExitCode::from(launch_err.exit_code())
            }
            None => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(args: Args, env: EnvConfig, target: models::Target) -> Result<()> {
    let config_file = args.config.clone().or(env.config_file.clone());
    let settings = RunnerSettings::load_or_default(config_file.as_deref())?;

    let workspace = args
        .workspace
        .clone()
        .or(env.workspace.clone())
        .map(|root| Workspace::new(config::expand_path(&root.to_string_lossy())))
        .unwrap_or_default();

    let config = RunConfig::new(workspace, target)
        .with_run_name(args.testname)
        .with_verbose(env.verbose_or(args.verbose))
        .with_ci_mode(env.ci_or(args.jenkins))
        .with_force_refresh(args.forceupdate)
        .with_settings(settings);

    info!(
        "Run {} in workspace {}",
        config.run_name,
        config.workspace.root().display()
    );

    let summary = launcher::launch(Arc::new(config)).await?;

    println!();
    println!("{summary}");

    if !summary.is_complete() {
        warn!("Run did not execute every suite; see the log for details");
    }

    Ok(())
}
