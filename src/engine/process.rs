//! External process invocation
//!
//! Runs an engine command to completion and classifies how it ended.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Errors raised while launching an external process
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// How one invocation ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// Process exited on its own; `None` when killed by a signal
    Completed { code: Option<i32> },
    /// Process exceeded the configured timeout and was killed
    TimedOut { after: Duration },
    /// Process could not be started or awaited
    Failed { reason: String },
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Completed { code: Some(0) })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            InvocationOutcome::Completed { code } => *code,
            _ => None,
        }
    }
}

impl fmt::Display for InvocationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationOutcome::Completed { code: Some(code) } => write!(f, "exit {code}"),
            InvocationOutcome::Completed { code: None } => write!(f, "killed by signal"),
            InvocationOutcome::TimedOut { after } => {
                write!(f, "timed out after {}s", after.as_secs())
            }
            InvocationOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Run a command to completion, optionally bounded by a timeout
pub async fn run_to_completion(
    mut command: Command,
    program: &str,
    limit: Option<Duration>,
) -> InvocationOutcome {
    command.kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            let err = EngineError::Spawn {
                program: program.to_string(),
                source,
            };
            return InvocationOutcome::Failed {
                reason: err.to_string(),
            };
        }
    };

    let wait = child.wait_with_output();
    let output = match limit {
        // dropping the pending future drops the child, which kills it
        Some(after) => match timeout(after, wait).await {
            Ok(output) => output,
            Err(_) => return InvocationOutcome::TimedOut { after },
        },
        None => wait.await,
    };

    match output {
        Ok(output) => {
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    debug!("{} stderr: {}", program, stderr.trim());
                }
            }
            InvocationOutcome::Completed {
                code: output.status.code(),
            }
        }
        Err(source) => {
            let err = EngineError::Wait {
                program: program.to_string(),
                source,
            };
            InvocationOutcome::Failed {
                reason: err.to_string(),
            }
        }
    }
}
