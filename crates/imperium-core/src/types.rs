//! Core data model: parsed intents and policies.
//!
//! Both are immutable once produced: a directive is parsed exactly once and
//! the resulting policies carry everything the enforcers need.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Primary classification of a directive, decided by the
/// type-disambiguation cascade before any pattern is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Priority,
    Bandwidth,
    Latency,
    Qos,
    SampleRate,
    SamplingInterval,
    DeviceControl,
    PublishInterval,
    AudioGain,
    CameraResolution,
    CameraQuality,
    CameraBrightness,
    CameraFramerate,
    CameraControl,
    General,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::Bandwidth => "bandwidth",
            Self::Latency => "latency",
            Self::Qos => "qos",
            Self::SampleRate => "sample_rate",
            Self::SamplingInterval => "sampling_interval",
            Self::DeviceControl => "device_control",
            Self::PublishInterval => "publish_interval",
            Self::AudioGain => "audio_gain",
            Self::CameraResolution => "camera_resolution",
            Self::CameraQuality => "camera_quality",
            Self::CameraBrightness => "camera_brightness",
            Self::CameraFramerate => "camera_framerate",
            Self::CameraControl => "camera_control",
            Self::General => "general",
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directive matched against the pattern catalogue.
///
/// `parameters` maps a pattern's parameter name to its captured groups;
/// group 0 is the main value, later groups may hold units or secondary
/// captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    /// The directive text, verbatim, for audit.
    pub original: String,
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub parameters: HashMap<String, Vec<String>>,
}

impl ParsedIntent {
    /// Main captured value (group 0) for a parameter, if present.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|groups| groups.first())
            .map(String::as_str)
    }

    /// A specific captured group for a parameter.
    pub fn param_group(&self, name: &str, idx: usize) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|groups| groups.get(idx))
            .map(String::as_str)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    /// Device the directive names, when one was extracted.
    pub fn target_device(&self) -> Option<&str> {
        self.param("target_device")
    }
}

/// Which plane enforces a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementPlane {
    /// Linux traffic control on the controller host.
    Network,
    /// MQTT command to the device itself.
    Device,
}

/// Concrete enforcement action kinds, closed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    TrafficShaping,
    QosControl,
    RoutingPriority,
    DeviceConfig,
    BandwidthLimit,
    LatencyControl,
    SampleRate,
    SamplingInterval,
    DeviceControl,
    PublishInterval,
    AudioGain,
    CameraResolution,
    CameraQuality,
    CameraBrightness,
    CameraFramerate,
    CameraControl,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrafficShaping => "traffic_shaping",
            Self::QosControl => "qos_control",
            Self::RoutingPriority => "routing_priority",
            Self::DeviceConfig => "device_config",
            Self::BandwidthLimit => "bandwidth_limit",
            Self::LatencyControl => "latency_control",
            Self::SampleRate => "sample_rate",
            Self::SamplingInterval => "sampling_interval",
            Self::DeviceControl => "device_control",
            Self::PublishInterval => "publish_interval",
            Self::AudioGain => "audio_gain",
            Self::CameraResolution => "camera_resolution",
            Self::CameraQuality => "camera_quality",
            Self::CameraBrightness => "camera_brightness",
            Self::CameraFramerate => "camera_framerate",
            Self::CameraControl => "camera_control",
        }
    }

    /// Dispatch classification. The dispatcher routes by policy type, not by
    /// the intent type that produced it.
    pub fn plane(&self) -> EnforcementPlane {
        match self {
            Self::TrafficShaping
            | Self::RoutingPriority
            | Self::BandwidthLimit
            | Self::LatencyControl => EnforcementPlane::Network,
            _ => EnforcementPlane::Device,
        }
    }

    pub fn is_camera(&self) -> bool {
        matches!(
            self,
            Self::CameraResolution
                | Self::CameraQuality
                | Self::CameraBrightness
                | Self::CameraFramerate
                | Self::CameraControl
        )
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, parameterised enforcement action derived from a ParsedIntent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub policy_type: PolicyType,
    /// Device id; resolvable by the registry (network types) or by topic
    /// routing (device types).
    pub target: String,
    pub parameters: serde_json::Map<String, Value>,
    /// 1–9; dispatch ordering within a directive, not HTB prio.
    pub priority: u8,
}

impl Policy {
    pub fn new(
        policy_type: PolicyType,
        target: impl Into<String>,
        parameters: serde_json::Map<String, Value>,
        priority: u8,
    ) -> Self {
        Self {
            policy_id: next_policy_id(),
            policy_type,
            target: target.into(),
            parameters,
            priority,
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.parameters.get(key).and_then(Value::as_i64)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(Value::as_bool)
    }
}

/// Globally unique policy id: fixed prefix plus a random hex suffix.
fn next_policy_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("policy-{}", &id[..8])
}

/// Outcome of dispatching a single policy to its enforcement plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementResult {
    pub policy_id: String,
    pub policy_type: PolicyType,
    pub target: String,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_ids_are_unique() {
        let a = Policy::new(PolicyType::QosControl, "node-1", Default::default(), 6);
        let b = Policy::new(PolicyType::QosControl, "node-1", Default::default(), 6);
        assert_ne!(a.policy_id, b.policy_id);
        assert!(a.policy_id.starts_with("policy-"));
        assert_eq!(a.policy_id.len(), "policy-".len() + 8);
    }

    #[test]
    fn plane_classification() {
        assert_eq!(PolicyType::BandwidthLimit.plane(), EnforcementPlane::Network);
        assert_eq!(PolicyType::TrafficShaping.plane(), EnforcementPlane::Network);
        assert_eq!(PolicyType::RoutingPriority.plane(), EnforcementPlane::Network);
        assert_eq!(PolicyType::LatencyControl.plane(), EnforcementPlane::Network);
        assert_eq!(PolicyType::QosControl.plane(), EnforcementPlane::Device);
        assert_eq!(PolicyType::CameraResolution.plane(), EnforcementPlane::Device);
        assert_eq!(PolicyType::SamplingInterval.plane(), EnforcementPlane::Device);
    }

    #[test]
    fn intent_type_serialises_snake_case() {
        let s = serde_json::to_string(&IntentType::CameraFramerate).unwrap();
        assert_eq!(s, "\"camera_framerate\"");
        assert_eq!(IntentType::SampleRate.as_str(), "sample_rate");
    }
}
