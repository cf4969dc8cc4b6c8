//! Execution unit supervisor
//!
//! Starts one background service per device, holds the readiness barrier,
//! and cancels every unit at teardown without waiting for confirmation.

mod readiness;
mod unit;

pub use unit::{ExecutionUnit, UnitState};

use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::engine::{run_to_completion, Placeholders};
use crate::models::{Device, DeviceRegistry};

/// Owner of every execution unit of a run
pub struct Supervisor {
    units: Vec<ExecutionUnit>,
    unavailable: Vec<Arc<Device>>,
}

impl Supervisor {
    /// Kill stale services, start one unit per device and wait for readiness
    pub async fn start(config: &RunConfig, registry: &DeviceRegistry) -> Self {
        let service = &config.settings.service;

        cleanup_stale(config).await;

        let mut units = Vec::new();
        let mut unavailable = Vec::new();

        // spawning does not wait on the process, so all units boot in parallel
        for device in registry.devices() {
            let vars = device.placeholders(&service.capability_args);
            let mut command = service.command.to_command(&vars, config.verbose);
            if !config.verbose {
                // nothing drains a long-lived service's pipes
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
            debug!("Starting: {}", service.command.display(&vars));

            match ExecutionUnit::spawn(device.clone(), command) {
                Ok(unit) => units.push(unit),
                Err(e) => {
                    warn!("Execution unit for {} failed to start: {}", device, e);
                    unavailable.push(device.clone());
                }
            }
        }

        let ready = readiness::await_ready(&config.settings.readiness, &units).await;

        for (unit, ready) in units.iter_mut().zip(ready) {
            if ready && unit.mark_ready() {
                continue;
            }
            warn!(
                "Execution unit for {} is not ready ({}); its device is skipped",
                unit.device(),
                unit.state()
            );
            unit.cancel();
            unavailable.push(unit.device().clone());
        }

        let supervisor = Self { units, unavailable };
        info!(
            "{} execution unit(s) ready, {} unavailable",
            supervisor.available_devices().len(),
            supervisor.unavailable.len()
        );
        supervisor
    }

    /// Devices whose unit passed the barrier, in registry order
    pub fn available_devices(&self) -> Vec<Arc<Device>> {
        self.units
            .iter()
            .filter(|unit| unit.state() >= UnitState::Ready && unit.is_available())
            .map(|unit| unit.device().clone())
            .collect()
    }

    pub fn unavailable_devices(&self) -> &[Arc<Device>] {
        &self.unavailable
    }

    #[cfg(test)]
    pub fn units(&self) -> &[ExecutionUnit] {
        &self.units
    }

    /// Called when suite execution begins
    pub fn mark_running(&self) {
        for unit in &self.units {
            unit.mark_running();
        }
    }

    /// Send every unit a cancel signal; returns how many were signalled
    pub fn stop(&mut self) -> usize {
        for unit in &mut self.units {
            unit.cancel();
        }
        info!("Stop signal sent to {} execution unit(s)", self.units.len());
        self.units.len()
    }
}

/// Kill same-kind services left over from a crashed run; never fails
async fn cleanup_stale(config: &RunConfig) {
    let Some(cleanup) = &config.settings.service.cleanup else {
        return;
    };

    let vars = Placeholders::new();
    debug!("Cleaning stale services: {}", cleanup.display(&vars));
    let outcome = run_to_completion(
        cleanup.to_command(&vars, false),
        &cleanup.program,
        None,
    )
    .await;
    debug!("Stale service cleanup: {}", outcome);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{ReadinessSettings, RunnerSettings, ServiceSettings};
    use crate::engine::CommandTemplate;
    use crate::models::Target;
    use crate::workspace::Workspace;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::timeout;

    fn config(service: ServiceSettings) -> RunConfig {
        let settings = RunnerSettings {
            service,
            readiness: ReadinessSettings::Settle { delay_secs: 0 },
            ..Default::default()
        };
        RunConfig::new(Workspace::new("/tmp/unused"), Target::File(PathBuf::from("x.robot")))
            .with_settings(settings)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let service = ServiceSettings {
            command: CommandTemplate::new("sh").args(["-c", "sleep 30", "{tag}"]),
            capability_args: Vec::new(),
            cleanup: Some(CommandTemplate::new("sh").args(["-c", "exit 1"])),
        };
        let registry = DeviceRegistry::from_devices(vec![
            Device::new("d1", "a", 4723),
            Device::new("d2", "b", 4724),
        ])
        .unwrap();

        let mut supervisor = Supervisor::start(&config(service), &registry).await;
        let tags: Vec<String> = supervisor
            .available_devices()
            .iter()
            .map(|d| d.tag.clone())
            .collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert!(supervisor.unavailable_devices().is_empty());

        supervisor.mark_running();
        assert!(supervisor
            .units()
            .iter()
            .all(|u| u.state() == UnitState::Running));

        assert_eq!(supervisor.stop(), 2);
        for unit in supervisor.units() {
            timeout(Duration::from_secs(5), unit.terminated())
                .await
                .unwrap();
        }
        assert!(supervisor.available_devices().is_empty());
    }

    #[tokio::test]
    async fn test_failed_unit_is_unavailable() {
        // device "b" gets a service that exits immediately
        let service = ServiceSettings {
            command: CommandTemplate::new("sh").args([
                "-c",
                "[ \"$0\" = b ] && exit 1; sleep 30",
                "{tag}",
            ]),
            capability_args: Vec::new(),
            cleanup: None,
        };
        let mut cfg = config(service);
        cfg.settings.readiness = ReadinessSettings::Settle { delay_secs: 1 };
        let registry = DeviceRegistry::from_devices(vec![
            Device::new("d1", "a", 4723),
            Device::new("d2", "b", 4724),
        ])
        .unwrap();

        let mut supervisor = Supervisor::start(&cfg, &registry).await;
        let available: Vec<String> = supervisor
            .available_devices()
            .iter()
            .map(|d| d.tag.clone())
            .collect();
        assert_eq!(available, vec!["a"]);
        assert_eq!(supervisor.unavailable_devices().len(), 1);
        assert_eq!(supervisor.unavailable_devices()[0].tag, "b");
        supervisor.stop();
    }

    #[tokio::test]
    async fn test_unspawnable_service() {
        let service = ServiceSettings {
            command: CommandTemplate::new("/nonexistent/appium"),
            capability_args: Vec::new(),
            cleanup: None,
        };
        let registry =
            DeviceRegistry::from_devices(vec![Device::new("d1", "a", 4723)]).unwrap();

        let supervisor = Supervisor::start(&config(service), &registry).await;
        assert!(supervisor.available_devices().is_empty());
        assert_eq!(supervisor.unavailable_devices().len(), 1);
    }
}
