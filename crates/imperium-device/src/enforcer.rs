//! MQTT device enforcer.
//!
//! Translates device-plane policies into firmware control messages. The
//! ESP32 firmware speaks `{"command": ...}` messages; the simulator nodes
//! still understand the legacy `{"type": "qos_update", ...}` format for QoS
//! changes. Camera payloads use bare keys (`resolution`, `quality`, ...).

use crate::topics::{control_topic, STATUS_SUBSCRIPTION};
use imperium_core::{Policy, PolicyType};
use imperium_monitoring::ControllerMetrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CLIENT_ID: &str = "device-enforcer";
const KEEP_ALIVE: Duration = Duration::from_secs(60);

pub struct DeviceEnforcer {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    /// device id → last status payload seen on `iot/+/status`
    status: Arc<RwLock<HashMap<String, Value>>>,
    metrics: Arc<ControllerMetrics>,
}

impl DeviceEnforcer {
    /// Open the broker session and start the network loop on its own task.
    pub fn connect(
        host: &str,
        port: u16,
        metrics: Arc<ControllerMetrics>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let mut options = MqttOptions::new(CLIENT_ID, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, mut event_loop) = AsyncClient::new(options, 64);

        let enforcer = Arc::new(Self {
            client: client.clone(),
            connected: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(HashMap::new())),
            metrics,
        });

        let connected = enforcer.connected.clone();
        let status = enforcer.status.clone();
        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("device enforcer connected to MQTT broker");
                        connected.store(true, Ordering::SeqCst);
                        if let Err(e) =
                            client.subscribe(STATUS_SUBSCRIPTION, QoS::AtLeastOnce).await
                        {
                            error!(error = %e, "status subscription failed");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Ok(payload) = serde_json::from_slice::<Value>(&publish.payload) {
                            if let Some(node_id) =
                                payload.get("node_id").and_then(Value::as_str)
                            {
                                status.write().await.insert(node_id.to_string(), payload);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::SeqCst);
                        warn!(error = %e, "MQTT connection lost, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        (enforcer, handle)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Apply a device policy by publishing its control message.
    ///
    /// Returns `true` once the publish is queued on a live session. The
    /// outcome is reported to the metrics exporter either way.
    pub async fn apply(&self, policy: &Policy) -> bool {
        let Some(message) = control_message(policy) else {
            warn!(policy_type = %policy.policy_type, "unsupported policy type for devices");
            return false;
        };

        let success = self.send(&policy.target, &message).await;
        self.metrics
            .record_device_enforcement(policy.policy_type.as_str(), &policy.target, success);
        if success && policy.policy_type.is_camera() {
            self.metrics.record_camera_state(
                &policy.target,
                message.get("resolution").and_then(Value::as_str),
                message.get("brightness").and_then(Value::as_i64),
                message.get("enabled").and_then(Value::as_bool),
            );
        }
        success
    }

    async fn send(&self, target: &str, message: &Value) -> bool {
        if !self.is_connected() {
            error!(device = %target, "not connected to MQTT broker");
            return false;
        }
        let topic = control_topic(target);
        let payload = message.to_string();
        debug!(%topic, %payload, "sending control message");
        match self
            .client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(()) => {
                info!(device = %target, %topic, "control message sent");
                true
            }
            Err(e) => {
                error!(device = %target, %topic, error = %e, "publish failed");
                false
            }
        }
    }

    /// Last status payload a device reported, if any.
    pub async fn device_status(&self, device_id: &str) -> Option<Value> {
        self.status.read().await.get(device_id).cloned()
    }

    /// Last status payload of every device that has reported.
    pub async fn all_devices(&self) -> HashMap<String, Value> {
        self.status.read().await.clone()
    }

    pub async fn disconnect(&self) {
        let _ = self.client.disconnect().await;
        info!("disconnected from MQTT broker");
    }
}

/// Build the firmware control message for a device policy.
///
/// Pure; returns `None` for policy types that have no device-plane meaning
/// (the network types).
pub fn control_message(policy: &Policy) -> Option<Value> {
    let target = policy.target.to_lowercase();
    match policy.policy_type {
        PolicyType::QosControl => {
            let qos = policy.param_i64("mqtt_qos").unwrap_or(1);
            if target.contains("esp32") {
                Some(json!({ "command": "SET_QOS", "qos": qos }))
            } else {
                // simulator nodes still speak the legacy update format
                Some(json!({
                    "type": "qos_update",
                    "qos": qos,
                    "reliable_delivery": policy.param_bool("reliable_delivery").unwrap_or(false),
                }))
            }
        }
        PolicyType::SampleRate => Some(json!({
            "command": "SET_SAMPLE_RATE",
            "sample_rate": policy.param_i64("sample_rate").unwrap_or(16000),
        })),
        PolicyType::SamplingInterval => {
            let seconds = policy.param_i64("interval_seconds").unwrap_or(10);
            if target.contains("esp32") || target.contains("mhz19") {
                // that firmware exposes a single publish-interval knob in ms
                Some(json!({
                    "command": "SET_PUBLISH_INTERVAL",
                    "interval_ms": seconds * 1000,
                }))
            } else {
                Some(json!({
                    "command": "SET_SAMPLING_INTERVAL",
                    "interval_seconds": seconds,
                }))
            }
        }
        PolicyType::DeviceControl => Some(json!({
            "command": policy.param_str("command").unwrap_or("ENABLE"),
        })),
        PolicyType::DeviceConfig => Some(json!({
            "type": "config_update",
            "sampling_rate": policy.parameters.get("sampling_rate").cloned().unwrap_or(Value::Null),
            "enabled": policy.param_bool("enabled").unwrap_or(true),
            "priority": policy.param_str("priority").unwrap_or("normal"),
        })),
        PolicyType::PublishInterval => Some(json!({
            "command": "SET_PUBLISH_INTERVAL",
            "interval_ms": policy.param_i64("interval_ms").unwrap_or(10000),
        })),
        PolicyType::AudioGain => Some(json!({
            "command": "SET_AUDIO_GAIN",
            "gain": policy.param_f64("gain").unwrap_or(1.0),
        })),
        PolicyType::CameraResolution => Some(json!({
            "resolution": policy.param_str("resolution").unwrap_or("SVGA"),
        })),
        PolicyType::CameraQuality => Some(json!({
            "quality": policy.param_i64("quality").unwrap_or(15),
        })),
        PolicyType::CameraBrightness => Some(json!({
            "brightness": policy.param_i64("brightness").unwrap_or(0),
        })),
        PolicyType::CameraFramerate => Some(json!({
            "capture_interval_ms": policy.param_i64("capture_interval_ms").unwrap_or(5000),
        })),
        PolicyType::CameraControl => Some(json!({
            "enabled": policy.param_bool("enabled").unwrap_or(true),
        })),
        PolicyType::TrafficShaping
        | PolicyType::RoutingPriority
        | PolicyType::BandwidthLimit
        | PolicyType::LatencyControl => None,
    }
}
