//! The pattern catalogue, materialised as data.
//!
//! Both the catalogue and the target-extraction cascade are plain static
//! tables so tests can assert their order and contents directly. Order is
//! load-bearing: parameters and targets are recorded first-match-wins.

use imperium_core::IntentType;
use once_cell::sync::Lazy;
use regex::Regex;

/// One catalogue entry: a regex whose captures land under `param`.
#[derive(Debug, Clone, Copy)]
pub struct IntentPattern {
    pub intent_type: IntentType,
    pub pattern: &'static str,
    pub param: &'static str,
}

const fn p(intent_type: IntentType, pattern: &'static str, param: &'static str) -> IntentPattern {
    IntentPattern { intent_type, pattern, param }
}

/// Every recognised directive form, grouped by intent type.
pub const CATALOGUE: &[IntentPattern] = &[
    // priority
    p(IntentType::Priority, r"prioritize\s+(?:device\s+|node\s+)?(\S+)", "device_id"),
    p(IntentType::Priority, r"high\s+priority\s+(?:for\s+)?(\S+)", "device_id"),
    p(IntentType::Priority, r"priority\s+(\d+)", "priority_level"),
    // bandwidth
    p(
        IntentType::Bandwidth,
        r"limit\s+bandwidth\s+(?:to\s+)?(\d+)\s*(mbps|kbps|gbps|mbit|kbit|gbit)?",
        "bandwidth_limit",
    ),
    p(
        IntentType::Bandwidth,
        r"allocate\s+(\d+)\s*(mbps|kbps|gbps|mbit|kbit|gbit)?\s+(?:to|for)\s+(\S+)",
        "bandwidth_allocation",
    ),
    p(IntentType::Bandwidth, r"throttle\s+(\S+)\s+(?:to\s+)?(\d+)", "throttle"),
    // latency: injection forms first, then targets/thresholds
    p(IntentType::Latency, r"add\s+latency\s+of\s+(\d+)\s*ms", "latency_inject"),
    p(IntentType::Latency, r"add\s+(\d+)\s*ms\s+(?:of\s+)?latency", "latency_inject"),
    p(IntentType::Latency, r"inject\s+(\d+)\s*ms\s+(?:of\s+)?latency", "latency_inject"),
    p(IntentType::Latency, r"set\s+latency\s+to\s+(\d+)\s*ms", "latency_inject"),
    p(IntentType::Latency, r"reduce\s+latency\s+(?:to\s+)?(\d+)\s*ms", "latency_target"),
    p(IntentType::Latency, r"latency\s+(?:below|under)\s+(\d+)", "latency_threshold"),
    p(IntentType::Latency, r"minimize\s+latency(?:\s+for\s+(\S+))?", "low_latency"),
    // qos
    p(IntentType::Qos, r"qos\s+(?:level\s+)?(\d+)", "qos_level"),
    p(IntentType::Qos, r"quality\s+of\s+service\s+(?:level\s+)?(\d+)", "qos_level"),
    p(IntentType::Qos, r"reliable\s+delivery\s+(?:for\s+)?(\S+)", "reliable_delivery"),
    // sample rate (Hz or kHz; values < 1000 are normalised as kHz downstream)
    p(IntentType::SampleRate, r"sample\s+rate\s+(?:to\s+|of\s+|at\s+)?(\d+)", "sample_rate"),
    p(IntentType::SampleRate, r"audio\s+rate\s+(?:to\s+)?(\d+)", "sample_rate"),
    p(IntentType::SampleRate, r"(\d+)\s*khz", "sample_rate"),
    p(IntentType::SampleRate, r"(\d+)\s*hz", "sample_rate"),
    // sampling interval (environmental sensors, seconds)
    p(
        IntentType::SamplingInterval,
        r"sampling\s+interval\s+(?:for\s+\S+\s+)?(?:to\s+)?(\d+)",
        "interval_seconds",
    ),
    p(IntentType::SamplingInterval, r"sampl\w*\s+every\s+(\d+)", "interval_seconds"),
    p(IntentType::SamplingInterval, r"every\s+(\d+)\s*seconds", "interval_seconds"),
    p(IntentType::SamplingInterval, r"(\d+)\s*seconds?\s+sampling", "interval_seconds"),
    // publish interval
    p(IntentType::PublishInterval, r"publish\s+interval\s+(?:to\s+)?(\d+)", "interval_value"),
    p(IntentType::PublishInterval, r"publish\s+every\s+(\d+)", "interval_value"),
    p(
        IntentType::PublishInterval,
        r"(?:send\s+data|report|telemetry)\s+every\s+(\d+)",
        "interval_value",
    ),
    p(IntentType::PublishInterval, r"every\s+(\d+)\s*seconds", "interval_value"),
    // audio gain (decimals allowed)
    p(IntentType::AudioGain, r"gain\s+(?:to\s+|of\s+|by\s+)?(\d+(?:\.\d+)?)", "gain_value"),
    p(
        IntentType::AudioGain,
        r"(?:amplify|boost)\s+(?:audio\s+)?(?:by\s+)?(\d+(?:\.\d+)?)x?",
        "gain_value",
    ),
    p(
        IntentType::AudioGain,
        r"audio\s+(?:volume|level)\s+(?:to\s+)?(\d+(?:\.\d+)?)",
        "gain_value",
    ),
    // camera resolution: by name, by Np shorthand, or by WxH
    p(
        IntentType::CameraResolution,
        r"resolution\s+(?:to\s+)?(qvga|svga|sxga|uxga|xga|vga|full\s+hd|hd|\d{3,4}p|\d{3,4}x\d{3,4})",
        "resolution_value",
    ),
    p(
        IntentType::CameraResolution,
        r"\b(qvga|svga|sxga|uxga|xga|vga|full\s+hd|hd|480p|720p|1080p)\b",
        "resolution_value",
    ),
    p(IntentType::CameraResolution, r"(\d{3,4}x\d{3,4})", "resolution_value"),
    // camera quality: numeric or preset
    p(
        IntentType::CameraQuality,
        r"(?:camera\s+|image\s+|jpeg\s+)?quality\s+(?:to\s+)?(\d+)",
        "quality_value",
    ),
    p(
        IntentType::CameraQuality,
        r"(high|medium|low)\s+(?:camera\s+|image\s+|jpeg\s+)?quality",
        "quality_preset",
    ),
    p(IntentType::CameraQuality, r"quality\s+(?:to\s+)?(high|medium|low)", "quality_preset"),
    // camera brightness
    p(IntentType::CameraBrightness, r"brightness\s+(?:to\s+)?(-?\d+)", "brightness_value"),
    // camera framerate / capture interval
    p(IntentType::CameraFramerate, r"(\d+)\s*fps", "framerate_value"),
    p(IntentType::CameraFramerate, r"fps\s+(?:to\s+)?(\d+)", "framerate_value"),
    p(IntentType::CameraFramerate, r"frame\s+rate\s+(?:to\s+|of\s+)?(\d+)", "framerate_value"),
    p(
        IntentType::CameraFramerate,
        r"capture\s+(?:interval\s+(?:to\s+)?|every\s+)(\d+)",
        "capture_interval",
    ),
    // camera enable/disable
    p(
        IntentType::CameraControl,
        r"(enable|disable|start|stop|pause|resume)\s+(?:the\s+)?cam(?:era)?",
        "camera_action",
    ),
    p(
        IntentType::CameraControl,
        r"cam(?:era)?\s+(enable|disable|start|stop|pause|resume)",
        "camera_action",
    ),
    // device control (non-camera)
    p(
        IntentType::DeviceControl,
        r"\b(?:enable|activate|start)\s+(?:device\s+)?(\S+)",
        "enable_device",
    ),
    p(
        IntentType::DeviceControl,
        r"\b(?:disable|deactivate|stop)\s+(?:device\s+)?(\S+)",
        "disable_device",
    ),
    p(IntentType::DeviceControl, r"\breset\s+(?:device\s+)?(\S+)", "reset_device"),
];

/// Target-device extraction cascade. First match wins; later patterns never
/// overwrite an already-found target. `replacement` rebuilds a canonical id
/// from the capture (`$1` is the first group).
#[derive(Debug, Clone, Copy)]
pub struct TargetPattern {
    pub pattern: &'static str,
    pub replacement: &'static str,
}

pub const TARGET_CASCADE: &[TargetPattern] = &[
    TargetPattern { pattern: r"(esp32-audio-\d+)", replacement: "$1" },
    TargetPattern { pattern: r"(esp32-cam-\d+)", replacement: "$1" },
    TargetPattern { pattern: r"(esp32-mhz19-\d+)", replacement: "$1" },
    TargetPattern { pattern: r"(esp32-env-\d+)", replacement: "$1" },
    TargetPattern { pattern: r"\b(mhz19-\d+)", replacement: "$1" },
    TargetPattern { pattern: r"node[-_]?(\w+)", replacement: "node-$1" },
    TargetPattern { pattern: r"for\s+([a-z0-9_.-]+)", replacement: "$1" },
];

pub(crate) struct CompiledPattern {
    pub regex: Regex,
    pub param: &'static str,
}

pub(crate) static COMPILED_CATALOGUE: Lazy<Vec<CompiledPattern>> = Lazy::new(|| {
    CATALOGUE
        .iter()
        .map(|entry| CompiledPattern {
            regex: Regex::new(entry.pattern).expect("catalogue pattern must compile"),
            param: entry.param,
        })
        .collect()
});

pub(crate) static COMPILED_TARGETS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    TARGET_CASCADE
        .iter()
        .map(|entry| {
            (
                Regex::new(entry.pattern).expect("target pattern must compile"),
                entry.replacement,
            )
        })
        .collect()
});
