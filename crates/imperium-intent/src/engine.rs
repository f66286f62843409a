//! Policy engine: ParsedIntent → concrete enforcement policies.
//!
//! Pure expansion, no I/O; two runs over the same intent differ only in the
//! generated policy ids. Default values and clamping ranges here are
//! normative for the device firmware involved.

use imperium_core::{IntentType, ParsedIntent, Policy, PolicyType};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Supported audio sample rates; requested values snap to the nearest.
const VALID_SAMPLE_RATES: &[i64] = &[8000, 16000, 44100, 48000];

/// Generates policies from parsed intents.
pub struct PolicyEngine;

impl PolicyEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let policies = match parsed.intent_type {
            IntentType::Priority => self.priority_policies(parsed),
            IntentType::Bandwidth => self.bandwidth_policies(parsed),
            IntentType::Latency => self.latency_policies(parsed),
            IntentType::Qos => self.qos_policies(parsed),
            IntentType::SampleRate => self.sample_rate_policies(parsed),
            IntentType::SamplingInterval => self.sampling_interval_policies(parsed),
            IntentType::DeviceControl => self.device_control_policies(parsed),
            IntentType::PublishInterval => self.publish_interval_policies(parsed),
            IntentType::AudioGain => self.audio_gain_policies(parsed),
            IntentType::CameraResolution => self.camera_resolution_policies(parsed),
            IntentType::CameraQuality => self.camera_quality_policies(parsed),
            IntentType::CameraBrightness => self.camera_brightness_policies(parsed),
            IntentType::CameraFramerate => self.camera_framerate_policies(parsed),
            IntentType::CameraControl => self.camera_control_policies(parsed),
            IntentType::General => Vec::new(),
        };
        debug!(count = policies.len(), intent = %parsed.intent_type, "generated policies");
        policies
    }

    fn priority_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed
            .target_device()
            .or_else(|| parsed.param("device_id"))
            .unwrap_or("unknown")
            .to_string();

        let shaping = params(&[
            ("class", json!("high_priority")),
            ("rate", json!("100mbit")),
            ("ceil", json!("200mbit")),
            ("burst", json!("32k")),
        ]);
        let routing = params(&[("tos", json!("0x10")), ("priority", json!("high"))]);

        vec![
            Policy::new(PolicyType::TrafficShaping, target.as_str(), shaping, 9),
            Policy::new(PolicyType::RoutingPriority, target.as_str(), routing, 8),
        ]
    }

    fn bandwidth_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("all").to_string();

        let limit = if let Some(value) = parsed.param("bandwidth_limit") {
            let unit = parsed
                .param_group("bandwidth_limit", 1)
                .filter(|u| !u.is_empty())
                .unwrap_or("mbit");
            Some(format!("{}{}", value, normalize_rate_unit(unit)))
        } else if let Some(value) = parsed.param("bandwidth_allocation") {
            let unit = parsed
                .param_group("bandwidth_allocation", 1)
                .filter(|u| !u.is_empty())
                .unwrap_or("mbit");
            Some(format!("{}{}", value, normalize_rate_unit(unit)))
        } else {
            // "throttle X to N" has no unit; mbit is implied
            parsed
                .param_group("throttle", 1)
                .map(|value| format!("{}mbit", value))
        };

        let Some(limit) = limit else {
            return Vec::new();
        };

        let p = params(&[
            ("rate", json!(limit)),
            ("ceil", json!(limit)),
            ("burst", json!("15k")),
        ]);
        vec![Policy::new(PolicyType::BandwidthLimit, target.as_str(), p, 7)]
    }

    fn latency_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("all").to_string();

        // A concrete delay (injected or targeted) becomes netem control.
        let delay_ms = parsed
            .param("latency_inject")
            .or_else(|| parsed.param("latency_target"))
            .and_then(|v| v.parse::<i64>().ok());

        if let Some(delay_ms) = delay_ms {
            let p = params(&[
                ("delay", json!(format!("{}ms", delay_ms))),
                ("jitter", json!(format!("{}ms", (delay_ms / 10).max(1)))),
            ]);
            return vec![Policy::new(PolicyType::LatencyControl, target.as_str(), p, 8)];
        }

        // Otherwise shape for low latency.
        let p = params(&[
            ("class", json!("low_latency")),
            ("netem_delay", json!("0ms")),
            ("priority", json!("express")),
            ("queue", json!("fq_codel")),
        ]);
        vec![Policy::new(PolicyType::TrafficShaping, target.as_str(), p, 9)]
    }

    fn qos_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("all").to_string();
        let qos_level = parsed
            .param("qos_level")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(1)
            .clamp(0, 2);

        let p = params(&[
            ("mqtt_qos", json!(qos_level)),
            ("reliable_delivery", json!(qos_level >= 1)),
            ("retain", json!(true)),
        ]);
        vec![Policy::new(PolicyType::QosControl, target.as_str(), p, 6)]
    }

    fn sample_rate_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("esp32-audio-1").to_string();

        let mut rate = parsed
            .param("sample_rate")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(16000);
        // kHz shorthand: "16 khz" arrives as 16
        if rate < 1000 {
            rate *= 1000;
        }
        let snapped = VALID_SAMPLE_RATES
            .iter()
            .copied()
            .min_by_key(|candidate| (candidate - rate).abs())
            .unwrap_or(16000);
        if snapped != rate {
            warn!(requested = rate, adjusted = snapped, "snapped sample rate to supported value");
        }

        let p = params(&[
            ("sample_rate", json!(snapped)),
            ("command", json!("SET_SAMPLE_RATE")),
        ]);
        vec![Policy::new(PolicyType::SampleRate, target.as_str(), p, 7)]
    }

    fn sampling_interval_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("mhz19-01").to_string();
        // MH-Z19 needs at least 2 s between reads
        let interval = parsed
            .param("interval_seconds")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(10)
            .clamp(2, 3600);

        let p = params(&[
            ("interval_seconds", json!(interval)),
            ("command", json!("SET_SAMPLING_INTERVAL")),
        ]);
        vec![Policy::new(PolicyType::SamplingInterval, target.as_str(), p, 7)]
    }

    fn device_control_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let (command, captured) = if parsed.has_param("enable_device") {
            ("ENABLE", parsed.param("enable_device"))
        } else if parsed.has_param("disable_device") {
            ("DISABLE", parsed.param("disable_device"))
        } else if parsed.has_param("reset_device") {
            ("RESET", parsed.param("reset_device"))
        } else {
            ("ENABLE", None)
        };
        let target = parsed
            .target_device()
            .or(captured)
            .unwrap_or("unknown")
            .to_string();

        let p = params(&[("command", json!(command))]);
        vec![Policy::new(PolicyType::DeviceControl, target.as_str(), p, 8)]
    }

    fn publish_interval_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("esp32-audio-1").to_string();

        let interval_ms = match parsed.param("interval_value").and_then(|v| v.parse::<i64>().ok())
        {
            Some(raw) => {
                // values up to 60 are human-scale seconds, larger ones are ms
                let ms = if raw <= 60 { raw * 1000 } else { raw };
                ms.clamp(1000, 60000)
            }
            None => 10000,
        };

        let p = params(&[
            ("interval_ms", json!(interval_ms)),
            ("command", json!("SET_PUBLISH_INTERVAL")),
        ]);
        vec![Policy::new(PolicyType::PublishInterval, target.as_str(), p, 5)]
    }

    fn audio_gain_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("esp32-audio-1").to_string();
        let gain = parsed
            .param("gain_value")
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(1.0)
            .clamp(0.1, 10.0);

        let p = params(&[("gain", json!(gain)), ("command", json!("SET_AUDIO_GAIN"))]);
        vec![Policy::new(PolicyType::AudioGain, target.as_str(), p, 5)]
    }

    fn camera_resolution_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("esp32-cam-1").to_string();
        let raw = parsed.param("resolution_value").unwrap_or("svga");
        let resolution = normalize_resolution(raw);

        let p = params(&[
            ("resolution", json!(resolution)),
            ("command", json!("SET_RESOLUTION")),
        ]);
        vec![Policy::new(PolicyType::CameraResolution, target.as_str(), p, 5)]
    }

    fn camera_quality_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("esp32-cam-1").to_string();

        let quality = if let Some(preset) = parsed.param("quality_preset") {
            match preset {
                "high" => 5,
                "medium" => 15,
                "low" => 30,
                _ => 10,
            }
        } else {
            parsed
                .param("quality_value")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(10)
                .clamp(0, 63)
        };

        let p = params(&[("quality", json!(quality)), ("command", json!("SET_QUALITY"))]);
        vec![Policy::new(PolicyType::CameraQuality, target.as_str(), p, 5)]
    }

    fn camera_brightness_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("esp32-cam-1").to_string();
        let brightness = parsed
            .param("brightness_value")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            .clamp(-2, 2);

        let p = params(&[
            ("brightness", json!(brightness)),
            ("command", json!("SET_BRIGHTNESS")),
        ]);
        vec![Policy::new(PolicyType::CameraBrightness, target.as_str(), p, 5)]
    }

    fn camera_framerate_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("esp32-cam-1").to_string();

        let interval_ms = if let Some(fps) =
            parsed.param("framerate_value").and_then(|v| v.parse::<i64>().ok())
        {
            if fps > 0 { 1000 / fps } else { 5000 }
        } else if let Some(raw) =
            parsed.param("capture_interval").and_then(|v| v.parse::<i64>().ok())
        {
            // bare small values are seconds, larger ones already ms
            if raw < 100 { raw * 1000 } else { raw }
        } else {
            5000
        };
        let interval_ms = interval_ms.clamp(100, 60000);

        let p = params(&[
            ("capture_interval_ms", json!(interval_ms)),
            ("fps", json!((1000.0 / interval_ms as f64 * 100.0).round() / 100.0)),
            ("command", json!("SET_FRAMERATE")),
        ]);
        vec![Policy::new(PolicyType::CameraFramerate, target.as_str(), p, 5)]
    }

    fn camera_control_policies(&self, parsed: &ParsedIntent) -> Vec<Policy> {
        let target = parsed.target_device().unwrap_or("esp32-cam-1").to_string();
        let action = parsed.param("camera_action").unwrap_or("enable");
        let enabled = matches!(action, "enable" | "start" | "resume");
        let command = if enabled { "ENABLE_CAMERA" } else { "DISABLE_CAMERA" };

        let p = params(&[("enabled", json!(enabled)), ("command", json!(command))]);
        vec![Policy::new(PolicyType::CameraControl, target.as_str(), p, 7)]
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn params(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// tc wants `mbit`/`kbit`/`gbit`; directives often say `mbps`/`kbps`/`gbps`.
fn normalize_rate_unit(unit: &str) -> String {
    if let Some(prefix) = unit.strip_suffix("bps") {
        format!("{}bit", prefix)
    } else {
        unit.to_string()
    }
}

/// Canonical framesize names understood by the camera firmware.
fn normalize_resolution(raw: &str) -> String {
    match raw.trim() {
        "qvga" | "320x240" | "240p" => "QVGA".into(),
        "vga" | "640x480" | "480p" => "VGA".into(),
        "svga" | "800x600" | "600p" => "SVGA".into(),
        "xga" | "1024x768" | "768p" => "XGA".into(),
        "hd" | "1280x720" | "720p" => "HD".into(),
        "sxga" | "1280x1024" | "960p" => "SXGA".into(),
        "uxga" | "1600x1200" | "1080p" | "full hd" => "UXGA".into(),
        other => other.to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::IntentParser;

    fn policies_for(directive: &str) -> Vec<Policy> {
        let parsed = IntentParser::new().parse(directive);
        PolicyEngine::new().generate_policies(&parsed)
    }

    #[test]
    fn priority_emits_both_planes_of_network_policy() {
        let policies = policies_for("set high priority for esp32-cam-1");
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].policy_type, PolicyType::TrafficShaping);
        assert_eq!(policies[0].param_str("rate"), Some("100mbit"));
        assert_eq!(policies[0].param_str("ceil"), Some("200mbit"));
        assert_eq!(policies[1].policy_type, PolicyType::RoutingPriority);
        assert_eq!(policies[1].param_str("tos"), Some("0x10"));
        assert!(policies.iter().all(|p| p.target == "esp32-cam-1"));
    }

    #[test]
    fn bandwidth_unit_normalisation() {
        let policies = policies_for("limit bandwidth to 100 mbps for node-2");
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].policy_type, PolicyType::BandwidthLimit);
        assert_eq!(policies[0].param_str("rate"), Some("100mbit"));
        assert_eq!(policies[0].param_str("ceil"), Some("100mbit"));
        assert_eq!(policies[0].param_str("burst"), Some("15k"));

        let policies = policies_for("limit bandwidth to 500kbit for esp32-audio-1");
        assert_eq!(policies[0].param_str("rate"), Some("500kbit"));
    }

    #[test]
    fn throttle_defaults_to_mbit() {
        let policies = policies_for("throttle node-4 to 5");
        assert_eq!(policies[0].param_str("rate"), Some("5mbit"));
    }

    #[test]
    fn latency_injection_emits_netem_control() {
        let policies = policies_for("add latency of 50ms for esp32-mhz19-1");
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].policy_type, PolicyType::LatencyControl);
        assert_eq!(policies[0].param_str("delay"), Some("50ms"));
        assert_eq!(policies[0].param_str("jitter"), Some("5ms"));
        assert_eq!(policies[0].target, "esp32-mhz19-1");
    }

    #[test]
    fn small_delay_keeps_minimum_jitter() {
        let policies = policies_for("add latency of 5ms for esp32-cam-1");
        assert_eq!(policies[0].param_str("jitter"), Some("1ms"));
    }

    #[test]
    fn latency_minimize_shapes_for_low_latency() {
        let policies = policies_for("minimize latency for esp32-cam-1");
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].policy_type, PolicyType::TrafficShaping);
        assert_eq!(policies[0].param_str("class"), Some("low_latency"));
        assert_eq!(policies[0].param_str("queue"), Some("fq_codel"));
    }

    #[test]
    fn qos_level_two_is_reliable() {
        let policies = policies_for("set qos level 2 for node-1");
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].policy_type, PolicyType::QosControl);
        assert_eq!(policies[0].param_i64("mqtt_qos"), Some(2));
        assert_eq!(policies[0].param_bool("reliable_delivery"), Some(true));
        assert_eq!(policies[0].param_bool("retain"), Some(true));
        assert_eq!(policies[0].target, "node-1");
    }

    #[test]
    fn qos_level_zero_is_unreliable() {
        let policies = policies_for("set qos level 0 for node-2");
        assert_eq!(policies[0].param_bool("reliable_delivery"), Some(false));
    }

    #[test]
    fn sample_rate_khz_normalisation_and_snap() {
        let policies = policies_for("16 khz sampling for esp32-audio-1");
        assert_eq!(policies[0].param_i64("sample_rate"), Some(16000));

        let policies = policies_for("set sample rate to 48000 hz for esp32-audio-1");
        assert_eq!(policies[0].param_i64("sample_rate"), Some(48000));

        // 40000 snaps to the closest supported value
        let policies = policies_for("set sample rate to 40000 hz for esp32-audio-1");
        assert_eq!(policies[0].param_i64("sample_rate"), Some(44100));
    }

    #[test]
    fn sampling_interval_clamped() {
        let policies = policies_for("set sampling interval for esp32-mhz19-1 to 30 seconds");
        assert_eq!(policies[0].policy_type, PolicyType::SamplingInterval);
        assert_eq!(policies[0].param_i64("interval_seconds"), Some(30));

        let policies = policies_for("set sampling interval for esp32-mhz19-1 to 1 seconds");
        assert_eq!(policies[0].param_i64("interval_seconds"), Some(2));

        let policies = policies_for("set sampling interval for esp32-mhz19-1 to 9999 seconds");
        assert_eq!(policies[0].param_i64("interval_seconds"), Some(3600));
    }

    #[test]
    fn device_control_commands() {
        let policies = policies_for("reset esp32-mhz19-1");
        assert_eq!(policies[0].policy_type, PolicyType::DeviceControl);
        assert_eq!(policies[0].param_str("command"), Some("RESET"));
        assert_eq!(policies[0].target, "esp32-mhz19-1");

        let policies = policies_for("enable device node-5");
        assert_eq!(policies[0].param_str("command"), Some("ENABLE"));
        assert_eq!(policies[0].target, "node-5");

        let policies = policies_for("disable node-2");
        assert_eq!(policies[0].param_str("command"), Some("DISABLE"));
    }

    #[test]
    fn publish_interval_seconds_and_ms() {
        let policies = policies_for("send data every 5 seconds for esp32-audio-1");
        assert_eq!(policies[0].param_i64("interval_ms"), Some(5000));

        let policies = policies_for("set publish interval to 2500 for esp32-audio-1");
        assert_eq!(policies[0].param_i64("interval_ms"), Some(2500));
    }

    #[test]
    fn audio_gain_clamped() {
        let policies = policies_for("set audio gain to 3.5 for esp32-audio-1");
        assert_eq!(policies[0].param_f64("gain"), Some(3.5));

        let policies = policies_for("set audio gain to 99 for esp32-audio-1");
        assert_eq!(policies[0].param_f64("gain"), Some(10.0));
    }

    #[test]
    fn camera_resolution_normalised() {
        let policies = policies_for("set resolution to 1080p for esp32-cam-1");
        assert_eq!(policies[0].policy_type, PolicyType::CameraResolution);
        assert_eq!(policies[0].param_str("resolution"), Some("UXGA"));
        assert_eq!(policies[0].target, "esp32-cam-1");

        let policies = policies_for("set resolution to 640x480 for esp32-cam-1");
        assert_eq!(policies[0].param_str("resolution"), Some("VGA"));
    }

    #[test]
    fn camera_quality_presets_and_clamp() {
        let policies = policies_for("set camera quality to 99 for esp32-cam-1");
        assert_eq!(policies[0].param_i64("quality"), Some(63));

        let policies = policies_for("high quality for the camera");
        assert_eq!(policies[0].param_i64("quality"), Some(5));
    }

    #[test]
    fn camera_brightness_clamped() {
        let policies = policies_for("set camera brightness to 7 for esp32-cam-1");
        assert_eq!(policies[0].param_i64("brightness"), Some(2));

        let policies = policies_for("set camera brightness to -5 for esp32-cam-1");
        assert_eq!(policies[0].param_i64("brightness"), Some(-2));
    }

    #[test]
    fn camera_framerate_fps_and_interval() {
        let policies = policies_for("set camera fps to 5 for esp32-cam-1");
        assert_eq!(policies[0].param_i64("capture_interval_ms"), Some(200));

        let policies = policies_for("capture every 3 seconds for esp32-cam-1");
        assert_eq!(policies[0].param_i64("capture_interval_ms"), Some(3000));

        // very high fps clamps at the firmware floor
        let policies = policies_for("set camera fps to 30 for esp32-cam-1");
        assert_eq!(policies[0].param_i64("capture_interval_ms"), Some(100));
    }

    #[test]
    fn camera_control_enable_disable() {
        let policies = policies_for("disable camera for esp32-cam-1");
        assert_eq!(policies[0].policy_type, PolicyType::CameraControl);
        assert_eq!(policies[0].param_bool("enabled"), Some(false));
        assert_eq!(policies[0].param_str("command"), Some("DISABLE_CAMERA"));

        let policies = policies_for("enable camera for esp32-cam-1");
        assert_eq!(policies[0].param_bool("enabled"), Some(true));
    }

    #[test]
    fn engine_is_pure_up_to_ids() {
        let parsed = IntentParser::new().parse("limit bandwidth to 2mbit for esp32-cam-1");
        let engine = PolicyEngine::new();
        let a = engine.generate_policies(&parsed);
        let b = engine.generate_policies(&parsed);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.policy_type, y.policy_type);
            assert_eq!(x.target, y.target);
            assert_eq!(x.parameters, y.parameters);
            assert_eq!(x.priority, y.priority);
            assert_ne!(x.policy_id, y.policy_id);
        }
    }
}
