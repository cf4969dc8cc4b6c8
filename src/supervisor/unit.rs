//! Execution units
//!
//! One long-lived background service bound to one device, owned by a task
//! that watches the process and kills it when cancelled.

use std::fmt;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::engine::EngineError;
use crate::models::Device;

/// Lifecycle of an execution unit; states only move forward
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitState {
    Starting,
    Ready,
    Running,
    Terminated,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Starting => write!(f, "starting"),
            UnitState::Ready => write!(f, "ready"),
            UnitState::Running => write!(f, "running"),
            UnitState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Handle to a running service process
pub struct ExecutionUnit {
    device: Arc<Device>,
    state: Arc<watch::Sender<UnitState>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl ExecutionUnit {
    /// Spawn the service process and its watcher task
    pub fn spawn(device: Arc<Device>, mut command: Command) -> Result<Self, EngineError> {
        command.kill_on_drop(true);

        let program = command.as_std().get_program().to_string_lossy().into_owned();
        let mut child = command
            .spawn()
            .map_err(|source| EngineError::Spawn { program, source })?;

        let (state, _) = watch::channel(UnitState::Starting);
        let state = Arc::new(state);
        let (cancel, mut cancelled) = oneshot::channel::<()>();

        let task_state = state.clone();
        let tag = device.tag.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => warn!("Execution unit for {} exited: {}", tag, status),
                    Err(e) => warn!("Execution unit for {} could not be awaited: {}", tag, e),
                },
                // fires on an explicit cancel and when the handle is dropped
                _ = &mut cancelled => {
                    if let Err(e) = child.start_kill() {
                        debug!("Execution unit for {} already gone: {}", tag, e);
                    }
                    let _ = child.wait().await;
                    debug!("Execution unit for {} stopped", tag);
                }
            }
            task_state.send_replace(UnitState::Terminated);
        });

        Ok(Self {
            device,
            state,
            cancel: Some(cancel),
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn state(&self) -> UnitState {
        *self.state.borrow()
    }

    /// Still usable for test execution
    pub fn is_available(&self) -> bool {
        self.state() != UnitState::Terminated
    }

    pub fn mark_ready(&self) -> bool {
        self.advance(UnitState::Ready)
    }

    pub fn mark_running(&self) -> bool {
        self.advance(UnitState::Running)
    }

    fn advance(&self, next: UnitState) -> bool {
        self.state.send_if_modified(|current| {
            if *current < next {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Ask the service to stop; does not wait for it
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Wait until the watcher task observed the process end
    #[cfg(test)]
    pub async fn terminated(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == UnitState::Terminated).await;
    }
}

impl fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("device", &self.device.tag)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }

    fn device() -> Arc<Device> {
        Arc::new(Device::new("emulator-5554", "a", 4723))
    }

    #[tokio::test]
    async fn test_lifecycle_moves_forward() {
        let mut unit = ExecutionUnit::spawn(device(), sh("sleep 30")).unwrap();
        assert_eq!(unit.state(), UnitState::Starting);

        assert!(unit.mark_ready());
        assert!(unit.mark_running());
        assert!(!unit.mark_ready());
        assert_eq!(unit.state(), UnitState::Running);

        unit.cancel();
        timeout(Duration::from_secs(5), unit.terminated())
            .await
            .unwrap();
        assert_eq!(unit.state(), UnitState::Terminated);
        assert!(!unit.is_available());
        assert!(!unit.mark_running());
    }

    #[tokio::test]
    async fn test_process_exit_terminates_unit() {
        let unit = ExecutionUnit::spawn(device(), sh("exit 1")).unwrap();
        timeout(Duration::from_secs(5), unit.terminated())
            .await
            .unwrap();
        assert!(!unit.is_available());
    }

    #[test]
    fn test_spawn_failure() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let result = ExecutionUnit::spawn(device(), Command::new("/nonexistent/appium"));
        assert!(matches!(result, Err(EngineError::Spawn { .. })));
    }
}
