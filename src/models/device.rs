//! Device models
//!
//! Configured device endpoints and the registry loaded from the workspace.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::EngineSettings;
use crate::engine::{expand_pairs, Placeholders};

/// Prefix of legacy `values<TAG>.dat` device files
const LEGACY_PREFIX: &str = "values";

/// Device configuration errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid device file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Device tag '{0}' may only contain letters, digits, '-' and '_', and no '--'")]
    InvalidTag(String),

    #[error("Device tag '{0}' is configured more than once")]
    DuplicateTag(String),

    #[error("Endpoint {0} is configured for more than one device")]
    DuplicateEndpoint(String),
}

/// A configured mobile endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device identifier handed to the automation engine
    pub udid: String,

    /// Unique short name namespacing output artifacts
    pub tag: String,

    /// Address the execution unit listens on
    pub host: String,

    pub port: u16,

    /// Extra capability descriptors
    #[serde(default)]
    pub capabilities: BTreeMap<String, String>,
}

impl Device {
    pub fn new(udid: impl Into<String>, tag: impl Into<String>, port: u16) -> Self {
        Self {
            udid: udid.into(),
            tag: tag.into(),
            host: default_host(),
            port,
            capabilities: BTreeMap::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_capability(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.capabilities.insert(key.into(), value.into());
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Placeholder values for command templates; `capability_args` is
    /// repeated once per capability under `{capabilities}`
    pub fn placeholders(&self, capability_args: &[String]) -> Placeholders {
        Placeholders::new()
            .with("udid", &self.udid)
            .with("tag", &self.tag)
            .with("host", &self.host)
            .with("port", self.port.to_string())
            .with_list(
                "capabilities",
                expand_pairs(capability_args, &self.capabilities),
            )
    }

    /// Placeholders for one engine invocation
    pub fn engine_placeholders(&self, engine: &EngineSettings) -> Placeholders {
        self.placeholders(&engine.capability_args)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} @ {})", self.tag, self.udid, self.endpoint())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// On-disk device description (YAML or JSON)
#[derive(Debug, Deserialize)]
struct DeviceFile {
    udid: String,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default = "default_host")]
    host: String,
    port: u16,
    #[serde(default)]
    capabilities: BTreeMap<String, String>,
}

/// Set of configured devices, in configuration file order
#[derive(Clone, Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Arc<Device>>,
}

impl DeviceRegistry {
    /// Build from devices, rejecting duplicate tags and endpoints
    pub fn from_devices(devices: Vec<Device>) -> Result<Self, RegistryError> {
        let mut tags = HashSet::new();
        let mut endpoints = HashSet::new();

        for device in &devices {
            if !is_valid_tag(&device.tag) {
                return Err(RegistryError::InvalidTag(device.tag.clone()));
            }
            if !tags.insert(device.tag.clone()) {
                return Err(RegistryError::DuplicateTag(device.tag.clone()));
            }
            if !endpoints.insert(device.endpoint()) {
                return Err(RegistryError::DuplicateEndpoint(device.endpoint()));
            }
        }

        Ok(Self {
            devices: devices.into_iter().map(Arc::new).collect(),
        })
    }

    /// Load every device file in `dir`; a missing directory yields an empty registry
    pub fn load(dir: &Path) -> Result<Self, RegistryError> {
        if !dir.exists() {
            debug!("Device configuration directory {} not found", dir.display());
            return Ok(Self::default());
        }

        let entries = fs::read_dir(dir).map_err(|source| RegistryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut devices = Vec::new();
        for path in paths {
            if let Some(device) = load_device_file(&path)? {
                debug!("Loaded device {} from {}", device, path.display());
                devices.push(device);
            }
        }

        let registry = Self::from_devices(devices)?;
        info!(
            "Loaded {} device configuration(s) from {}",
            registry.len(),
            dir.display()
        );
        Ok(registry)
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Tags name directories and staged files, so they stay a single path segment
fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && !tag.contains("--")
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Parse one file; files with unrelated extensions are skipped
fn load_device_file(path: &Path) -> Result<Option<Device>, RegistryError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let read = || {
        fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })
    };
    let parse_err = |message: String| RegistryError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let file: DeviceFile = match extension.as_deref() {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&read()?).map_err(|e| parse_err(e.to_string()))?
        }
        Some("json") => serde_json::from_str(&read()?).map_err(|e| parse_err(e.to_string()))?,
        Some("dat") => parse_legacy(&read()?).map_err(parse_err)?,
        _ => return Ok(None),
    };

    let tag = file.tag.unwrap_or_else(|| tag_from_stem(&stem));
    if tag.is_empty() {
        return Err(parse_err("device tag is empty".to_string()));
    }

    let device = Device::new(file.udid, tag, file.port).with_host(file.host);
    Ok(Some(
        file.capabilities
            .into_iter()
            .fold(device, |device, (key, value)| device.with_capability(key, value)),
    ))
}

/// `values12.dat` is tagged `12`; any other stem is used as-is
fn tag_from_stem(stem: &str) -> String {
    match stem.strip_prefix(LEGACY_PREFIX) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => stem.to_string(),
    }
}

/// Legacy `key = value` variable file
fn parse_legacy(content: &str) -> Result<DeviceFile, String> {
    let mut udid = None;
    let mut tag = None;
    let mut host = None;
    let mut port = None;
    let mut capabilities = BTreeMap::new();

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected 'key = value'", number + 1))?;
        let key = key.trim();
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');

        match key.to_lowercase().as_str() {
            "udid" => udid = Some(value.to_string()),
            "tag" => tag = Some(value.to_string()),
            "host" => host = Some(value.to_string()),
            "port" => {
                port = Some(
                    value
                        .parse::<u16>()
                        .map_err(|_| format!("line {}: invalid port '{value}'", number + 1))?,
                )
            }
            _ => {
                capabilities.insert(key.to_string(), value.to_string());
            }
        }
    }

    Ok(DeviceFile {
        udid: udid.ok_or("missing 'udid'")?,
        tag,
        host: host.unwrap_or_else(default_host),
        port: port.ok_or("missing 'port'")?,
        capabilities,
    })
}
