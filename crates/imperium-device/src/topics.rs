//! MQTT topic routing per device family.

/// Status topics the enforcer observes to keep a last-known-status map.
pub const STATUS_SUBSCRIPTION: &str = "iot/+/status";

/// Control topic for a device.
///
/// CO₂ and environmental sensor firmware subscribes under the
/// `imperium/devices/` prefix; cameras, audio nodes and the simulator
/// nodes listen under `iot/`.
pub fn control_topic(device: &str) -> String {
    let lower = device.to_lowercase();
    if lower.contains("mhz19") || lower.contains("env") {
        format!("imperium/devices/{}/control", device)
    } else {
        format!("iot/{}/control", device)
    }
}
