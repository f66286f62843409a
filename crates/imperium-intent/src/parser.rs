//! Intent parser: free-text directive → typed ParsedIntent.
//!
//! Classification happens first, through a fixed-order keyword cascade; the
//! first rule that matches wins. Parameter extraction then sweeps the whole
//! catalogue. The same directive always yields the same ParsedIntent.

use crate::patterns::{COMPILED_CATALOGUE, COMPILED_TARGETS};
use imperium_core::{Error, IntentType, ParsedIntent, Result};
use std::collections::HashMap;
use tracing::debug;

// Keyword tables for the disambiguation cascade. Matching is substring-based
// except for resolution tokens, which are word-bounded so that e.g. "hd"
// inside an unrelated word cannot classify a directive.
const RESOLUTION_TOKENS: &[&str] = &[
    "qvga", "svga", "sxga", "uxga", "xga", "vga", "hd", "480p", "720p", "1080p",
];
const CAMERA_WORDS: &[&str] = &["camera", "cam"];
const CAMERA_VERBS: &[&str] = &["enable", "disable", "start", "stop", "pause", "resume"];
const ENVIRONMENTAL_WORDS: &[&str] =
    &["mhz19", "co2", "carbon dioxide", "environmental", "esp32-env"];
const INTERVAL_WORDS: &[&str] = &["sampling", "interval", "rate", "every"];
const SAMPLE_RATE_WORDS: &[&str] = &["sample rate", "sampling", "audio rate", "khz", " hz"];
const GAIN_WORDS: &[&str] = &["gain", "amplify", "boost", "audio volume", "audio level"];
const PUBLISH_WORDS: &[&str] =
    &["publish interval", "telemetry", "reporting", "send data", "report every"];
const CONTROL_VERBS: &[&str] =
    &["enable", "disable", "start", "stop", "activate", "deactivate", "reset"];
const PRIORITY_WORDS: &[&str] = &["priority", "prioritize", "critical"];
const BANDWIDTH_WORDS: &[&str] = &["bandwidth", "throttle", "limit"];
const LATENCY_WORDS: &[&str] = &["latency", "delay", "response"];
const QOS_WORDS: &[&str] = &["qos", "quality", "reliable"];

/// Parses directives against the pattern catalogue.
pub struct IntentParser;

impl IntentParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a directive. Always succeeds; use [`IntentParser::validate`]
    /// to reject unusable results.
    pub fn parse(&self, directive: &str) -> ParsedIntent {
        let lower = directive.to_lowercase();
        let intent_type = determine_type(&lower);

        let mut parameters: HashMap<String, Vec<String>> = HashMap::new();
        for entry in COMPILED_CATALOGUE.iter() {
            if parameters.contains_key(entry.param) {
                continue;
            }
            if let Some(caps) = entry.regex.captures(&lower) {
                let groups: Vec<String> = caps
                    .iter()
                    .skip(1)
                    .map(|g| g.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                parameters.insert(entry.param.to_string(), groups);
            }
        }

        if let Some(target) = extract_target(&lower) {
            parameters.insert("target_device".to_string(), vec![target]);
        }

        let parsed = ParsedIntent {
            original: directive.to_string(),
            intent_type,
            parameters,
        };
        debug!(intent_type = %parsed.intent_type, target = ?parsed.target_device(), "parsed directive");
        parsed
    }

    /// Reject intents that cannot drive any enforcement.
    pub fn validate(&self, parsed: &ParsedIntent) -> Result<()> {
        if parsed.intent_type == IntentType::General {
            return Err(Error::Parse("unable to determine intent type".into()));
        }
        if parsed.parameters.is_empty() {
            return Err(Error::Parse("no actionable parameters extracted".into()));
        }
        Ok(())
    }
}

impl Default for IntentParser {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// True when `word` appears with non-alphanumeric characters (or string
/// edges) on both sides.
fn contains_word(haystack: &str, word: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(word) {
        let at = start + pos;
        let end = at + word.len();
        let left_ok = at == 0
            || !haystack[..at].chars().next_back().unwrap().is_ascii_alphanumeric();
        let right_ok = end == haystack.len()
            || !haystack[end..].chars().next().unwrap().is_ascii_alphanumeric();
        if left_ok && right_ok {
            return true;
        }
        start = at + 1;
    }
    false
}

/// The type-disambiguation cascade. Order is normative; first match wins.
fn determine_type(directive: &str) -> IntentType {
    // 1. camera resolution
    if directive.contains("resolution")
        || directive.contains("full hd")
        || RESOLUTION_TOKENS.iter().any(|t| contains_word(directive, t))
    {
        return IntentType::CameraResolution;
    }
    // 2. camera brightness
    if directive.contains("brightness") && contains_any(directive, CAMERA_WORDS) {
        return IntentType::CameraBrightness;
    }
    // 3. camera framerate
    if directive.contains("frame rate")
        || directive.contains("fps")
        || directive.contains("capture interval")
        || directive.contains("capture every")
    {
        return IntentType::CameraFramerate;
    }
    // 4. camera quality
    if (directive.contains("quality") && contains_any(directive, CAMERA_WORDS))
        || directive.contains("jpeg quality")
        || directive.contains("image quality")
    {
        return IntentType::CameraQuality;
    }
    // 5. camera enable/disable
    if contains_any(directive, CAMERA_WORDS) && contains_any(directive, CAMERA_VERBS) {
        return IntentType::CameraControl;
    }
    // 6. sampling interval (environmental sensors)
    if (contains_any(directive, ENVIRONMENTAL_WORDS) && contains_any(directive, INTERVAL_WORDS))
        || (directive.contains("seconds") && directive.contains("sampling"))
    {
        return IntentType::SamplingInterval;
    }
    // 7. audio sample rate
    if contains_any(directive, SAMPLE_RATE_WORDS) {
        return IntentType::SampleRate;
    }
    // 8. audio gain
    if contains_any(directive, GAIN_WORDS) {
        return IntentType::AudioGain;
    }
    // 9. publish interval
    if contains_any(directive, PUBLISH_WORDS) {
        return IntentType::PublishInterval;
    }
    // 10. device control (non-camera)
    if contains_any(directive, CONTROL_VERBS) {
        return IntentType::DeviceControl;
    }
    // 11. the network-plane keywords
    if contains_any(directive, PRIORITY_WORDS) {
        return IntentType::Priority;
    }
    if contains_any(directive, BANDWIDTH_WORDS) {
        return IntentType::Bandwidth;
    }
    if contains_any(directive, LATENCY_WORDS) {
        return IntentType::Latency;
    }
    if contains_any(directive, QOS_WORDS) {
        return IntentType::Qos;
    }
    IntentType::General
}

/// Ordered target cascade; the first pattern that matches decides.
fn extract_target(directive: &str) -> Option<String> {
    for (regex, replacement) in COMPILED_TARGETS.iter() {
        if let Some(caps) = regex.captures(directive) {
            let mut target = String::new();
            caps.expand(replacement, &mut target);
            if !target.is_empty() {
                return Some(target);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(directive: &str) -> ParsedIntent {
        IntentParser::new().parse(directive)
    }

    #[test]
    fn qos_for_simulated_node() {
        let parsed = parse("set qos level 2 for node-1");
        assert_eq!(parsed.intent_type, IntentType::Qos);
        assert_eq!(parsed.param("qos_level"), Some("2"));
        assert_eq!(parsed.target_device(), Some("node-1"));
    }

    #[test]
    fn bandwidth_with_mid_clause() {
        let parsed = parse("limit bandwidth to 2mbit for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::Bandwidth);
        assert_eq!(parsed.param("bandwidth_limit"), Some("2"));
        assert_eq!(parsed.param_group("bandwidth_limit", 1), Some("mbit"));
        assert_eq!(parsed.target_device(), Some("esp32-cam-1"));
    }

    #[test]
    fn bandwidth_unit_mbps() {
        let parsed = parse("limit bandwidth to 100 mbps for device node-2");
        assert_eq!(parsed.intent_type, IntentType::Bandwidth);
        assert_eq!(parsed.param("bandwidth_limit"), Some("100"));
        assert_eq!(parsed.param_group("bandwidth_limit", 1), Some("mbps"));
        assert_eq!(parsed.target_device(), Some("node-2"));
    }

    #[test]
    fn throttle_form() {
        let parsed = parse("throttle node-4 to 5");
        assert_eq!(parsed.intent_type, IntentType::Bandwidth);
        let groups = parsed.parameters.get("throttle").unwrap();
        assert_eq!(groups, &vec!["node-4".to_string(), "5".to_string()]);
    }

    #[test]
    fn latency_injection() {
        let parsed = parse("add latency of 50ms for esp32-mhz19-1");
        assert_eq!(parsed.intent_type, IntentType::Latency);
        assert_eq!(parsed.param("latency_inject"), Some("50"));
        assert_eq!(parsed.target_device(), Some("esp32-mhz19-1"));
    }

    #[test]
    fn latency_minimize() {
        let parsed = parse("minimize latency for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::Latency);
        assert!(parsed.has_param("low_latency"));
        assert_eq!(parsed.target_device(), Some("esp32-cam-1"));
    }

    #[test]
    fn priority_forms() {
        let parsed = parse("prioritize node-1");
        assert_eq!(parsed.intent_type, IntentType::Priority);
        assert_eq!(parsed.target_device(), Some("node-1"));

        let parsed = parse("set high priority for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::Priority);
        assert_eq!(parsed.param("device_id"), Some("esp32-cam-1"));
    }

    #[test]
    fn device_control_verbs() {
        let parsed = parse("enable device node-5");
        assert_eq!(parsed.intent_type, IntentType::DeviceControl);
        assert_eq!(parsed.param("enable_device"), Some("node-5"));

        let parsed = parse("disable node-2");
        assert_eq!(parsed.intent_type, IntentType::DeviceControl);
        assert_eq!(parsed.param("disable_device"), Some("node-2"));

        let parsed = parse("reset esp32-mhz19-1");
        assert_eq!(parsed.intent_type, IntentType::DeviceControl);
        assert_eq!(parsed.param("reset_device"), Some("esp32-mhz19-1"));
        assert_eq!(parsed.target_device(), Some("esp32-mhz19-1"));
    }

    #[test]
    fn sampling_interval_for_co2() {
        let parsed = parse("set sampling interval for esp32-mhz19-1 to 30 seconds");
        assert_eq!(parsed.intent_type, IntentType::SamplingInterval);
        assert_eq!(parsed.param("interval_seconds"), Some("30"));
        assert_eq!(parsed.target_device(), Some("esp32-mhz19-1"));

        let parsed = parse("read co2 every 10 seconds for esp32-mhz19-1");
        assert_eq!(parsed.intent_type, IntentType::SamplingInterval);
        assert_eq!(parsed.param("interval_seconds"), Some("10"));
    }

    #[test]
    fn sample_rate_forms() {
        let parsed = parse("set sample rate to 48000 hz for esp32-audio-1");
        assert_eq!(parsed.intent_type, IntentType::SampleRate);
        assert_eq!(parsed.param("sample_rate"), Some("48000"));
        assert_eq!(parsed.target_device(), Some("esp32-audio-1"));

        let parsed = parse("16 khz sampling for esp32-audio-1");
        assert_eq!(parsed.intent_type, IntentType::SampleRate);
        assert_eq!(parsed.param("sample_rate"), Some("16"));
    }

    #[test]
    fn audio_gain_forms() {
        let parsed = parse("set audio gain to 3.5 for esp32-audio-1");
        assert_eq!(parsed.intent_type, IntentType::AudioGain);
        assert_eq!(parsed.param("gain_value"), Some("3.5"));

        let parsed = parse("amplify audio by 2x for esp32-audio-1");
        assert_eq!(parsed.intent_type, IntentType::AudioGain);
        assert_eq!(parsed.param("gain_value"), Some("2"));
    }

    #[test]
    fn publish_interval_send_data() {
        let parsed = parse("send data every 5 seconds for esp32-audio-1");
        assert_eq!(parsed.intent_type, IntentType::PublishInterval);
        assert_eq!(parsed.param("interval_value"), Some("5"));
    }

    #[test]
    fn camera_resolution_forms() {
        let parsed = parse("set resolution to VGA for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::CameraResolution);
        assert_eq!(parsed.param("resolution_value"), Some("vga"));

        let parsed = parse("change to HD resolution for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::CameraResolution);
        assert_eq!(parsed.param("resolution_value"), Some("hd"));

        let parsed = parse("set resolution to 1080p for esp32-cam-1");
        assert_eq!(parsed.param("resolution_value"), Some("1080p"));

        let parsed = parse("set resolution to 640x480 for esp32-cam-1");
        assert_eq!(parsed.param("resolution_value"), Some("640x480"));
    }

    #[test]
    fn camera_quality_and_brightness() {
        let parsed = parse("set camera quality to 10 for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::CameraQuality);
        assert_eq!(parsed.param("quality_value"), Some("10"));

        let parsed = parse("set camera brightness to 1 for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::CameraBrightness);
        assert_eq!(parsed.param("brightness_value"), Some("1"));

        let parsed = parse("set camera brightness to -2 for esp32-cam-1");
        assert_eq!(parsed.param("brightness_value"), Some("-2"));
    }

    #[test]
    fn camera_framerate_forms() {
        let parsed = parse("set camera fps to 5 for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::CameraFramerate);
        assert_eq!(parsed.param("framerate_value"), Some("5"));

        let parsed = parse("capture every 3 seconds for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::CameraFramerate);
        assert_eq!(parsed.param("capture_interval"), Some("3"));
    }

    #[test]
    fn camera_control_beats_device_control() {
        let parsed = parse("disable camera for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::CameraControl);
        assert_eq!(parsed.param("camera_action"), Some("disable"));

        let parsed = parse("enable camera for esp32-cam-1");
        assert_eq!(parsed.intent_type, IntentType::CameraControl);
        assert_eq!(parsed.param("camera_action"), Some("enable"));
    }

    #[test]
    fn unknown_device_still_parses() {
        let parsed = parse("limit bandwidth to 1mbit for esp32-nope-9");
        assert_eq!(parsed.intent_type, IntentType::Bandwidth);
        assert_eq!(parsed.target_device(), Some("esp32-nope-9"));
    }

    #[test]
    fn resolution_token_requires_word_boundary() {
        // "hd" buried inside a word must not classify as camera_resolution
        let parsed = parse("reset adhdevice node-1");
        assert_ne!(parsed.intent_type, IntentType::CameraResolution);
    }

    #[test]
    fn general_directive_rejected() {
        let parser = IntentParser::new();
        let parsed = parser.parse("make everything better");
        assert_eq!(parsed.intent_type, IntentType::General);
        assert!(parser.validate(&parsed).is_err());
    }

    #[test]
    fn parse_is_deterministic() {
        let a = parse("limit bandwidth to 2mbit for esp32-cam-1");
        let b = parse("limit bandwidth to 2mbit for esp32-cam-1");
        assert_eq!(a, b);
    }
}
