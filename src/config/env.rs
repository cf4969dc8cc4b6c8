//! Environment variable configuration
//!
//! Provides environment variable overrides for CLI defaults.

use std::env;
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "SUITE_RUNNER";

/// Overrides read from the environment
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Workspace root from SUITE_RUNNER_WORKSPACE
    pub workspace: Option<PathBuf>,
    /// Settings file from SUITE_RUNNER_CONFIG
    pub config_file: Option<PathBuf>,
    /// Verbose from SUITE_RUNNER_VERBOSE
    pub verbose: Option<bool>,
    /// CI mode from SUITE_RUNNER_CI
    pub ci: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            workspace: get_env("WORKSPACE").map(PathBuf::from),
            config_file: get_env("CONFIG").map(PathBuf::from),
            verbose: get_env("VERBOSE").map(|v| parse_bool(&v)),
            ci: get_env("CI").map(|v| parse_bool(&v)),
        }
    }

    /// Flag set on the command line, or enabled through the environment
    pub fn verbose_or(&self, flag: bool) -> bool {
        flag || self.verbose.unwrap_or(false)
    }

    pub fn ci_or(&self, flag: bool) -> bool {
        flag || self.ci.unwrap_or(false)
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}
