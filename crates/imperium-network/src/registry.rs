//! Device registry: logical device id → IP, HTB class id, egress interface.
//!
//! Seeded with the physical fleet at construction, optionally augmented once
//! with simulator-container IPs discovered from the container platform.
//! Immutable afterwards; readers take no lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Minor class id reserved for the catch-all default class.
pub const DEFAULT_CLASS_ID: u16 = 99;

/// First simulator node gets class id `SIM_CLASS_BASE + 1`.
const SIM_CLASS_BASE: u16 = 30;
const SIM_NODE_COUNT: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub ip: Ipv4Addr,
    /// HTB minor id, unique per interface (1–98; 99 reserved).
    pub classid: u16,
    /// Host interface this device's traffic crosses.
    pub iface: String,
}

#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceEntry>,
    primary_iface: String,
}

impl DeviceRegistry {
    /// Registry with only the static seed of physical devices.
    ///
    /// `esp32-mhz19-1` and `esp32-audio-1` are two sensors on the same
    /// ESP32, so they share an IP and an HTB class.
    pub fn with_static_seed(primary_iface: &str) -> Self {
        let mut devices = HashMap::new();
        devices.insert(
            "esp32-cam-1".to_string(),
            DeviceEntry {
                ip: Ipv4Addr::new(10, 218, 189, 80),
                classid: 10,
                iface: primary_iface.to_string(),
            },
        );
        devices.insert(
            "esp32-mhz19-1".to_string(),
            DeviceEntry {
                ip: Ipv4Addr::new(10, 218, 189, 218),
                classid: 20,
                iface: primary_iface.to_string(),
            },
        );
        devices.insert(
            "esp32-audio-1".to_string(),
            DeviceEntry {
                ip: Ipv4Addr::new(10, 218, 189, 218),
                classid: 20,
                iface: primary_iface.to_string(),
            },
        );
        Self {
            devices,
            primary_iface: primary_iface.to_string(),
        }
    }

    /// Registry from an explicit seed (configuration override).
    pub fn from_entries(
        primary_iface: &str,
        entries: impl IntoIterator<Item = (String, DeviceEntry)>,
    ) -> Self {
        Self {
            devices: entries.into_iter().collect(),
            primary_iface: primary_iface.to_string(),
        }
    }

    /// One-shot augmentation with simulator-node container IPs.
    ///
    /// Containers `imperium-iot-node-1..10` become `node-1..10` with class
    /// ids 31..40 on the container bridge. Containers that are not running
    /// are skipped.
    pub async fn discover_sim_nodes(&mut self, network_name: &str) {
        let bridge = discover_bridge(network_name).await;
        let mut found = 0usize;
        for i in 1..=SIM_NODE_COUNT {
            let container = format!("imperium-iot-node-{}", i);
            match container_ip(&container).await {
                Some(ip) => {
                    self.devices.insert(
                        format!("node-{}", i),
                        DeviceEntry {
                            ip,
                            classid: SIM_CLASS_BASE + u16::from(i),
                            iface: bridge.clone(),
                        },
                    );
                    found += 1;
                }
                None => debug!(container = %container, "container not running, skipped"),
            }
        }
        if found > 0 {
            info!(count = found, bridge = %bridge, "registered simulator nodes");
        }
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceEntry> {
        self.devices.get(device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    pub fn devices(&self) -> impl Iterator<Item = (&String, &DeviceEntry)> {
        self.devices.iter()
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &String> {
        self.devices.keys()
    }

    pub fn primary_iface(&self) -> &str {
        &self.primary_iface
    }

    /// Devices whose traffic crosses `iface`.
    pub fn devices_on<'a>(
        &'a self,
        iface: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a DeviceEntry)> {
        self.devices.iter().filter(move |(_, d)| d.iface == iface)
    }

    /// Union of all egress interfaces, primary included.
    pub fn interfaces(&self) -> Vec<String> {
        let mut ifaces: Vec<String> = self
            .devices
            .values()
            .map(|d| d.iface.clone())
            .collect();
        ifaces.push(self.primary_iface.clone());
        ifaces.sort();
        ifaces.dedup();
        ifaces
    }
}

/// Host-side bridge interface for a container network.
///
/// Falls back to `docker0` when the bridge cannot be determined.
async fn discover_bridge(network_name: &str) -> String {
    let fallback = "docker0".to_string();

    let Ok(out) = Command::new("docker")
        .args(["network", "inspect", network_name])
        .output()
        .await
    else {
        return fallback;
    };
    if !out.status.success() {
        return fallback;
    }

    let parsed: Option<Vec<serde_json::Value>> =
        serde_json::from_slice(&out.stdout).ok();
    let Some(id) = parsed
        .as_ref()
        .and_then(|nets| nets.first())
        .and_then(|net| net.get("Id"))
        .and_then(|id| id.as_str())
    else {
        return fallback;
    };

    let candidate = format!("br-{}", &id[..id.len().min(12)]);
    // The bridge only exists while the network does; verify before trusting it.
    let exists = Command::new("ip")
        .args(["link", "show", &candidate])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);
    if exists {
        candidate
    } else {
        warn!(candidate = %candidate, "bridge interface not present, using docker0");
        fallback
    }
}

/// IPv4 address of a running container, if any.
async fn container_ip(container: &str) -> Option<Ipv4Addr> {
    let out = Command::new("docker")
        .args([
            "inspect",
            "-f",
            "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}",
            container,
        ])
        .output()
        .await
        .ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8_lossy(&out.stdout).trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_seed_devices() {
        let reg = DeviceRegistry::with_static_seed("wlan0");
        let cam = reg.get("esp32-cam-1").unwrap();
        assert_eq!(cam.classid, 10);
        assert_eq!(cam.iface, "wlan0");
        assert!(reg.contains("esp32-mhz19-1"));
        assert!(reg.contains("esp32-audio-1"));
        assert!(!reg.contains("esp32-nope-9"));
    }

    #[test]
    fn co2_and_audio_share_endpoint() {
        let reg = DeviceRegistry::with_static_seed("wlan0");
        let co2 = reg.get("esp32-mhz19-1").unwrap();
        let audio = reg.get("esp32-audio-1").unwrap();
        assert_eq!(co2.ip, audio.ip);
        assert_eq!(co2.classid, audio.classid);
        assert_eq!(co2.iface, audio.iface);
    }

    #[test]
    fn classids_unique_per_interface_unless_shared_endpoint() {
        let reg = DeviceRegistry::with_static_seed("wlan0");
        let mut seen: HashMap<(String, u16), Ipv4Addr> = HashMap::new();
        for (_, entry) in reg.devices() {
            let key = (entry.iface.clone(), entry.classid);
            if let Some(ip) = seen.get(&key) {
                assert_eq!(*ip, entry.ip, "shared classid requires shared endpoint");
            }
            seen.insert(key, entry.ip);
            assert_ne!(entry.classid, DEFAULT_CLASS_ID);
            assert!(entry.classid >= 1 && entry.classid < 99);
        }
    }

    #[test]
    fn interfaces_are_deduplicated_union() {
        let mut reg = DeviceRegistry::with_static_seed("wlan0");
        reg.devices.insert(
            "node-1".to_string(),
            DeviceEntry {
                ip: Ipv4Addr::new(172, 18, 0, 2),
                classid: 31,
                iface: "docker0".to_string(),
            },
        );
        let ifaces = reg.interfaces();
        assert_eq!(ifaces, vec!["docker0".to_string(), "wlan0".to_string()]);
    }

    #[test]
    fn devices_on_filters_by_interface() {
        let mut reg = DeviceRegistry::with_static_seed("wlan0");
        reg.devices.insert(
            "node-1".to_string(),
            DeviceEntry {
                ip: Ipv4Addr::new(172, 18, 0, 2),
                classid: 31,
                iface: "docker0".to_string(),
            },
        );
        assert_eq!(reg.devices_on("docker0").count(), 1);
        assert_eq!(reg.devices_on("wlan0").count(), 3);
    }
}
