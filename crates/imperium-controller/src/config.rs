//! Controller configuration: TOML file with CLI overrides.

use anyhow::Context;
use imperium_network::{DeviceEntry, DeviceRegistry};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Primary egress interface for the physical fleet.
    pub interface: String,
    /// Container network to scan for simulator nodes.
    pub container_network: String,
    pub mqtt: MqttConfig,
    pub api_port: u16,
    pub metrics_port: u16,
    pub poll_interval_secs: u64,
    /// Optional registry override; empty means the built-in seed.
    pub devices: Vec<DeviceSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSeed {
    pub device_id: String,
    pub ip: Ipv4Addr,
    pub classid: u16,
    /// Defaults to the primary interface.
    pub iface: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            container_network: "imperium_default".to_string(),
            mqtt: MqttConfig::default(),
            api_port: 5000,
            metrics_port: 8000,
            poll_interval_secs: 5,
            devices: Vec::new(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
        }
    }
}

impl ControllerConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Registry from the configured seed, or the built-in one.
    pub fn registry(&self) -> DeviceRegistry {
        if self.devices.is_empty() {
            return DeviceRegistry::with_static_seed(&self.interface);
        }
        let entries = self.devices.iter().map(|seed| {
            (
                seed.device_id.clone(),
                DeviceEntry {
                    ip: seed.ip,
                    classid: seed.classid,
                    iface: seed.iface.clone().unwrap_or_else(|| self.interface.clone()),
                },
            )
        });
        DeviceRegistry::from_entries(&self.interface, entries)
    }
}
