//! Prometheus metric families exported by the controller.
//!
//! The camera gauges mirror the last command sent by the device enforcer,
//! not firmware-reported state; some firmware never exposes the setting
//! back, and a dashboard needs a series either way.

use once_cell::sync::Lazy;
use prometheus::{CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use regex::Regex;

/// Enforcement latency buckets, in seconds.
const LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Framesize index the camera firmware uses for each resolution name.
pub fn resolution_index(name: &str) -> i64 {
    match name.to_uppercase().as_str() {
        "QQVGA" => 0,
        "QVGA" => 3,
        "CIF" => 4,
        "VGA" => 6,
        "SVGA" => 7,
        "XGA" | "HD" => 8,
        "SXGA" => 9,
        "UXGA" => 10,
        "QXGA" => 11,
        _ => -1,
    }
}

static RATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([\d.]+)\s*(gbit|mbit|kbit|bit|gbps|mbps|kbps|bps)").expect("rate regex")
});
static DELAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\d.]+)\s*(ms|us|s)").expect("delay regex"));

/// `10mbit` / `500kbit` / `1gbit` → bits per second.
pub fn parse_rate_to_bps(rate: &str) -> f64 {
    let rate = rate.trim().to_lowercase();
    let Some(caps) = RATE_RE.captures(&rate) else {
        return 0.0;
    };
    let value: f64 = caps[1].parse().unwrap_or(0.0);
    let multiplier = match &caps[2] {
        "gbit" | "gbps" => 1e9,
        "mbit" | "mbps" => 1e6,
        "kbit" | "kbps" => 1e3,
        _ => 1.0,
    };
    value * multiplier
}

/// `100ms` / `0.5s` / `250us` → milliseconds.
pub fn parse_delay_to_ms(delay: &str) -> f64 {
    let delay = delay.trim().to_lowercase();
    let Some(caps) = DELAY_RE.captures(&delay) else {
        return 0.0;
    };
    let value: f64 = caps[1].parse().unwrap_or(0.0);
    match &caps[2] {
        "s" => value * 1000.0,
        "us" => value / 1000.0,
        _ => value,
    }
}

/// All `ibs_*` metric families, registered on one registry.
pub struct ControllerMetrics {
    registry: Registry,

    // per-device tc counters, refreshed by the collector
    pub(crate) tc_bytes: GaugeVec,
    pub(crate) tc_packets: GaugeVec,
    pub(crate) tc_dropped: GaugeVec,
    pub(crate) tc_overlimits: GaugeVec,

    // configured policy values, from the active-policy map
    pub(crate) tc_rate_bps: GaugeVec,
    pub(crate) tc_delay_ms: GaugeVec,
    pub(crate) tc_priority: GaugeVec,

    pub(crate) policy_active: Gauge,
    pub(crate) intent_active: Gauge,

    enforcement_total: CounterVec,
    enforcement_latency: HistogramVec,
    device_enforcement_total: CounterVec,

    // controller-side camera mirrors
    cam_resolution: GaugeVec,
    cam_brightness: GaugeVec,
    cam_enabled: GaugeVec,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tc_bytes = GaugeVec::new(
            Opts::new("ibs_tc_bandwidth_bytes_total", "Total bytes sent through device tc class"),
            &["device"],
        )?;
        registry.register(Box::new(tc_bytes.clone()))?;

        let tc_packets = GaugeVec::new(
            Opts::new("ibs_tc_packets_total", "Total packets sent through device tc class"),
            &["device"],
        )?;
        registry.register(Box::new(tc_packets.clone()))?;

        let tc_dropped = GaugeVec::new(
            Opts::new("ibs_tc_dropped_total", "Packets dropped by tc for device"),
            &["device"],
        )?;
        registry.register(Box::new(tc_dropped.clone()))?;

        let tc_overlimits = GaugeVec::new(
            Opts::new("ibs_tc_overlimits_total", "TC overlimit events for device"),
            &["device"],
        )?;
        registry.register(Box::new(tc_overlimits.clone()))?;

        let tc_rate_bps = GaugeVec::new(
            Opts::new("ibs_tc_configured_rate_bps", "Configured HTB rate in bits/sec"),
            &["device"],
        )?;
        registry.register(Box::new(tc_rate_bps.clone()))?;

        let tc_delay_ms = GaugeVec::new(
            Opts::new("ibs_tc_configured_delay_ms", "Configured netem delay in milliseconds"),
            &["device"],
        )?;
        registry.register(Box::new(tc_delay_ms.clone()))?;

        let tc_priority = GaugeVec::new(
            Opts::new(
                "ibs_tc_configured_priority",
                "Configured HTB priority (lower = higher priority)",
            ),
            &["device"],
        )?;
        registry.register(Box::new(tc_priority.clone()))?;

        let policy_active = Gauge::with_opts(Opts::new(
            "ibs_policy_active",
            "Number of active network policies",
        ))?;
        registry.register(Box::new(policy_active.clone()))?;

        let intent_active = Gauge::with_opts(Opts::new(
            "ibs_intent_active",
            "Number of active intents",
        ))?;
        registry.register(Box::new(intent_active.clone()))?;

        let enforcement_total = CounterVec::new(
            Opts::new("ibs_policy_enforcement_total", "Total network enforcement operations"),
            &["policy_type", "status"],
        )?;
        registry.register(Box::new(enforcement_total.clone()))?;

        let enforcement_latency = HistogramVec::new(
            HistogramOpts::new(
                "ibs_policy_enforcement_latency_seconds",
                "Time to apply a network policy",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["policy_type"],
        )?;
        registry.register(Box::new(enforcement_latency.clone()))?;

        let device_enforcement_total = CounterVec::new(
            Opts::new("ibs_device_enforcement_total", "Total device enforcement operations"),
            &["policy_type", "device", "status"],
        )?;
        registry.register(Box::new(device_enforcement_total.clone()))?;

        let cam_resolution = GaugeVec::new(
            Opts::new(
                "ibs_cam_resolution_index",
                "Camera resolution as framesize index (0=QQVGA..13=UXGA)",
            ),
            &["device"],
        )?;
        registry.register(Box::new(cam_resolution.clone()))?;

        let cam_brightness = GaugeVec::new(
            Opts::new("ibs_cam_brightness", "Camera brightness setting (-2..+2)"),
            &["device"],
        )?;
        registry.register(Box::new(cam_brightness.clone()))?;

        let cam_enabled = GaugeVec::new(
            Opts::new("ibs_cam_enabled", "Camera enabled state (1=on 0=off)"),
            &["device"],
        )?;
        registry.register(Box::new(cam_enabled.clone()))?;

        Ok(Self {
            registry,
            tc_bytes,
            tc_packets,
            tc_dropped,
            tc_overlimits,
            tc_rate_bps,
            tc_delay_ms,
            tc_priority,
            policy_active,
            intent_active,
            enforcement_total,
            enforcement_latency,
            device_enforcement_total,
            cam_resolution,
            cam_brightness,
            cam_enabled,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Called by the dispatcher after each enforcement operation.
    pub fn record_enforcement(&self, policy_type: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "failure" };
        self.enforcement_total
            .with_label_values(&[policy_type, status])
            .inc();
        self.enforcement_latency
            .with_label_values(&[policy_type])
            .observe(duration_secs);
    }

    /// Called by the device enforcer after each MQTT command.
    pub fn record_device_enforcement(&self, policy_type: &str, device: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.device_enforcement_total
            .with_label_values(&[policy_type, device, status])
            .inc();
    }

    /// Mirror the last camera command sent to a device.
    pub fn record_camera_state(
        &self,
        device: &str,
        resolution: Option<&str>,
        brightness: Option<i64>,
        enabled: Option<bool>,
    ) {
        if let Some(resolution) = resolution {
            self.cam_resolution
                .with_label_values(&[device])
                .set(resolution_index(resolution) as f64);
        }
        if let Some(brightness) = brightness {
            self.cam_brightness
                .with_label_values(&[device])
                .set(brightness as f64);
        }
        if let Some(enabled) = enabled {
            self.cam_enabled
                .with_label_values(&[device])
                .set(if enabled { 1.0 } else { 0.0 });
        }
    }

    /// Seed series from device defaults so dashboards are non-empty before
    /// the first intent arrives.
    pub fn seed_defaults<'a>(&self, device_ids: impl IntoIterator<Item = &'a str>) {
        for device in device_ids {
            self.tc_rate_bps
                .with_label_values(&[device])
                .set(parse_rate_to_bps(imperium_network::enforcer::DEFAULT_DEV_RATE));
            self.tc_delay_ms.with_label_values(&[device]).set(0.0);
            self.tc_priority.with_label_values(&[device]).set(4.0);
            self.tc_bytes.with_label_values(&[device]).set(0.0);
            self.tc_packets.with_label_values(&[device]).set(0.0);
            self.tc_dropped.with_label_values(&[device]).set(0.0);
            self.tc_overlimits.with_label_values(&[device]).set(0.0);

            if device.starts_with("esp32-cam") {
                self.record_camera_state(device, Some("SVGA"), Some(0), Some(true));
            }
        }

        // instantiate the common counter series at zero
        for policy_type in [
            "bandwidth_limit",
            "latency_control",
            "traffic_shaping",
            "routing_priority",
            "qos_control",
            "device_control",
        ] {
            for status in ["success", "failure"] {
                let _ = self.enforcement_total.with_label_values(&[policy_type, status]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn rate_parsing() {
        assert_eq!(parse_rate_to_bps("10mbit"), 1e7);
        assert_eq!(parse_rate_to_bps("500kbit"), 5e5);
        assert_eq!(parse_rate_to_bps("1gbit"), 1e9);
        assert_eq!(parse_rate_to_bps("100 mbps"), 1e8);
        assert_eq!(parse_rate_to_bps("64bit"), 64.0);
        assert_eq!(parse_rate_to_bps("garbage"), 0.0);
    }

    #[test]
    fn delay_parsing() {
        assert_eq!(parse_delay_to_ms("100ms"), 100.0);
        assert_eq!(parse_delay_to_ms("0.5s"), 500.0);
        assert_eq!(parse_delay_to_ms("250us"), 0.25);
        assert_eq!(parse_delay_to_ms(""), 0.0);
    }

    #[test]
    fn resolution_indices_match_firmware_framesizes() {
        assert_eq!(resolution_index("UXGA"), 10);
        assert_eq!(resolution_index("uxga"), 10);
        assert_eq!(resolution_index("SVGA"), 7);
        assert_eq!(resolution_index("VGA"), 6);
        assert_eq!(resolution_index("HD"), 8);
        assert_eq!(resolution_index("bogus"), -1);
    }

    #[test]
    fn all_families_register() {
        let metrics = ControllerMetrics::new().unwrap();
        metrics.record_enforcement("bandwidth_limit", true, 0.02);
        metrics.record_device_enforcement("qos_control", "node-1", false);
        metrics.record_camera_state("esp32-cam-1", Some("UXGA"), None, Some(true));

        let families = metrics.registry().gather();
        let names: Vec<String> = families.iter().map(|f| f.get_name().to_string()).collect();
        for expected in [
            "ibs_policy_enforcement_total",
            "ibs_policy_enforcement_latency_seconds",
            "ibs_device_enforcement_total",
            "ibs_cam_resolution_index",
            "ibs_cam_enabled",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn camera_mirror_sets_resolution_index() {
        let metrics = ControllerMetrics::new().unwrap();
        metrics.record_camera_state("esp32-cam-1", Some("UXGA"), None, None);
        let value = metrics
            .cam_resolution
            .with_label_values(&["esp32-cam-1"])
            .get();
        assert_eq!(value, 10.0);
    }

    #[test]
    fn seeding_creates_default_series() {
        let metrics = ControllerMetrics::new().unwrap();
        metrics.seed_defaults(["esp32-cam-1", "esp32-mhz19-1"]);
        assert_eq!(
            metrics.tc_rate_bps.with_label_values(&["esp32-cam-1"]).get(),
            1e7
        );
        assert_eq!(
            metrics.cam_enabled.with_label_values(&["esp32-cam-1"]).get(),
            1.0
        );
        // non-camera device gets no camera mirror
        let gathered = metrics.cam_resolution.collect();
        let series = &gathered[0];
        assert_eq!(series.get_metric().len(), 1);
    }
}
