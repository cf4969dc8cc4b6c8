//! Data models for parallel suite runs
//!
//! Devices, suites and invocation targets shared by every component.

mod device;
mod suite;

pub use device::{Device, DeviceRegistry, RegistryError};
pub use suite::{discover, Suite, SuiteError, Target};
