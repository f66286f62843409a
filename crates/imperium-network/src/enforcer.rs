//! Idempotent Linux traffic-control enforcer for per-device policies.
//!
//! All kernel mutations and snapshots are serialised behind one mutex, so a
//! metrics poll sees either the pre- or post-apply state, never a torn one.
//! tc failures that are expected in normal operation (deleting an absent
//! qdisc, adding an existing class) are absorbed; anything else makes the
//! surrounding apply return `false` without touching the in-memory record.

use crate::registry::{DeviceEntry, DeviceRegistry};
use crate::stats::{parse_class_stats, TcClassStats};
use chrono::{DateTime, Utc};
use imperium_core::{Error, Policy, PolicyType, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Overall ceiling for a managed interface.
pub const DEFAULT_LINK_RATE: &str = "50mbit";
/// Guaranteed rate for a device class before any intent touches it.
pub const DEFAULT_DEV_RATE: &str = "10mbit";
/// Burst ceiling for a device class before any intent touches it.
pub const DEFAULT_DEV_CEIL: &str = "50mbit";
pub const DEFAULT_BURST: &str = "32k";

/// Hard kill for a wedged tc invocation.
const TC_TIMEOUT: Duration = Duration::from_secs(5);

/// HTB prio for a named priority level; lower binds tighter.
pub fn htb_prio(level: &str) -> u8 {
    match level {
        "critical" => 0,
        "high" => 1,
        "medium" => 4,
        "low" => 7,
        _ => 4,
    }
}

/// Last applied parameters for a device; params are the last-writer-wins
/// union across every apply, which is what lets a priority directive
/// compose with an earlier bandwidth directive.
#[derive(Debug, Clone, Serialize)]
pub struct ActivePolicy {
    pub policy_type: String,
    pub params: Map<String, Value>,
    pub applied_at: DateTime<Utc>,
}

/// Raw tc listings for one interface.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceState {
    pub qdiscs: String,
    pub classes: String,
    pub filters: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnforcerStatus {
    pub status: &'static str,
    pub interfaces: HashMap<String, InterfaceState>,
    pub active_policies: HashMap<String, ActivePolicy>,
}

pub struct NetworkEnforcer {
    registry: Arc<DeviceRegistry>,
    interfaces: Vec<String>,
    active: Mutex<HashMap<String, ActivePolicy>>,
}

impl NetworkEnforcer {
    /// Build the enforcer and bring up the HTB root tree on every managed
    /// interface so per-device counters exist before any intent arrives.
    pub async fn new(registry: Arc<DeviceRegistry>) -> Self {
        let interfaces = registry.interfaces();
        let enforcer = Self {
            registry,
            interfaces,
            active: Mutex::new(HashMap::new()),
        };
        {
            let _guard = enforcer.active.lock().await;
            for iface in enforcer.interfaces.clone() {
                enforcer.ensure_root_qdisc(&iface).await;
            }
        }
        enforcer
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Dispatch a network policy to the matching handler.
    ///
    /// Returns `true` on success. Kernel failures are captured and logged,
    /// never raised; unknown policy types return `false`.
    pub async fn apply(&self, policy: &Policy) -> bool {
        let mut active = self.active.lock().await;
        let result = match policy.policy_type {
            PolicyType::BandwidthLimit => self.apply_bandwidth(policy, &mut active).await,
            PolicyType::LatencyControl => self.apply_latency(policy, &mut active).await,
            PolicyType::TrafficShaping | PolicyType::RoutingPriority => {
                self.apply_priority(policy, &mut active).await
            }
            other => {
                warn!(policy_type = %other, "unknown network policy type");
                return false;
            }
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(policy_type = %policy.policy_type, device = %policy.target, error = %e,
                    "network enforcement failed");
                false
            }
        }
    }

    /// Remove netem, filter, class and the active record for a device.
    pub async fn clear_device(&self, device_id: &str) -> bool {
        let Some(info) = self.registry.get(device_id).cloned() else {
            warn!(device_id, "unknown device");
            return false;
        };
        let mut active = self.active.lock().await;
        self.del_netem(info.classid, &info.iface).await;
        self.del_filter(&info.ip, &info.iface, &active).await;
        self.del_class(info.classid, &info.iface).await;
        active.remove(device_id);
        info!(device_id, iface = %info.iface, "cleared tc rules");
        true
    }

    /// Tear down the HTB tree on every managed interface.
    pub async fn clear_all(&self) -> bool {
        let mut active = self.active.lock().await;
        for iface in &self.interfaces {
            let _ = self
                .tc(&["qdisc", "del", "dev", iface, "root"], true)
                .await;
            info!(iface = %iface, "all tc rules cleared");
        }
        active.clear();
        true
    }

    /// Current qdisc/class/filter listings plus the active-policy map.
    pub async fn get_status(&self) -> EnforcerStatus {
        let active = self.active.lock().await;
        let mut interfaces = HashMap::new();
        for iface in &self.interfaces {
            interfaces.insert(
                iface.clone(),
                InterfaceState {
                    qdiscs: self.tc_output(&["qdisc", "show", "dev", iface]).await,
                    classes: self.tc_output(&["class", "show", "dev", iface]).await,
                    filters: self.tc_output(&["filter", "show", "dev", iface]).await,
                },
            );
        }
        EnforcerStatus {
            status: "active",
            interfaces,
            active_policies: active.clone(),
        }
    }

    /// Sample `tc -s class show` on every managed interface into per-device
    /// counters. Devices sharing a class share the sample.
    pub async fn collect_tc_stats(&self) -> HashMap<String, TcClassStats> {
        let _guard = self.active.lock().await;

        let mut result: HashMap<String, TcClassStats> = HashMap::new();
        for iface in &self.interfaces {
            let raw = self
                .tc_output(&["-s", "class", "show", "dev", iface])
                .await;
            if raw.is_empty() {
                continue;
            }
            let per_class = parse_class_stats(&raw);
            for (device_id, entry) in self.registry.devices_on(iface) {
                if let Some(stats) = per_class.get(&entry.classid) {
                    result.insert(device_id.clone(), stats.clone());
                }
            }
        }
        result
    }

    /// Snapshot of the active-policy map.
    pub async fn get_active_policies(&self) -> HashMap<String, ActivePolicy> {
        self.active.lock().await.clone()
    }

    // ── policy handlers (mutex held by caller) ──────────────────────────

    async fn apply_bandwidth(
        &self,
        policy: &Policy,
        active: &mut HashMap<String, ActivePolicy>,
    ) -> Result<()> {
        let info = self.resolve_device(&policy.target)?;
        let rate = policy.param_str("rate").unwrap_or(DEFAULT_DEV_RATE).to_string();
        let ceil = policy.param_str("ceil").unwrap_or(DEFAULT_DEV_CEIL).to_string();
        let burst = policy.param_str("burst").unwrap_or(DEFAULT_BURST).to_string();

        self.ensure_root_qdisc(&info.iface).await;
        self.replace_class(info.classid, &rate, &ceil, &burst, 4, &info.iface)
            .await?;
        self.ensure_filter(&info.ip, info.classid, &info.iface).await?;

        record(
            active,
            &policy.target,
            "bandwidth_limit",
            [("rate", Value::from(rate.clone())), ("ceil", Value::from(ceil.clone()))],
        );
        info!(device = %policy.target, ip = %info.ip, iface = %info.iface, %rate, %ceil,
            "bandwidth applied");
        Ok(())
    }

    async fn apply_latency(
        &self,
        policy: &Policy,
        active: &mut HashMap<String, ActivePolicy>,
    ) -> Result<()> {
        let info = self.resolve_device(&policy.target)?;
        let delay = policy
            .param_str("delay")
            .or_else(|| policy.param_str("netem_delay"))
            .unwrap_or("0ms")
            .to_string();
        let jitter = policy.param_str("jitter").unwrap_or("0ms").to_string();
        let loss = policy.param_str("loss").unwrap_or("").to_string();

        self.ensure_root_qdisc(&info.iface).await;
        self.ensure_class(info.classid, &info.iface).await?;
        self.ensure_filter(&info.ip, info.classid, &info.iface).await?;

        // netem never stacks: delete whatever is there, then add fresh
        self.del_netem(info.classid, &info.iface).await;
        let args = netem_args(&info.iface, info.classid, &delay, &jitter, &loss);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.tc(&arg_refs, false).await?;

        record(
            active,
            &policy.target,
            "latency_control",
            [
                ("delay", Value::from(delay.clone())),
                ("jitter", Value::from(jitter.clone())),
                ("loss", Value::from(loss)),
            ],
        );
        info!(device = %policy.target, ip = %info.ip, iface = %info.iface, %delay, %jitter,
            "latency applied");
        Ok(())
    }

    async fn apply_priority(
        &self,
        policy: &Policy,
        active: &mut HashMap<String, ActivePolicy>,
    ) -> Result<()> {
        let info = self.resolve_device(&policy.target)?;

        let level = policy
            .param_str("priority")
            .map(str::to_string)
            .or_else(|| policy.param_i64("priority").map(|n| n.to_string()))
            .or_else(|| policy.param_str("level").map(str::to_string))
            .unwrap_or_else(|| "medium".to_string());
        let prio = level.parse::<u8>().unwrap_or_else(|_| htb_prio(&level));

        // A previously applied bandwidth wins over this policy's own rate:
        // a priority directive must never clobber an earlier bandwidth one.
        let existing = active.get(&policy.target).map(|a| a.params.clone());
        let rate = existing
            .as_ref()
            .and_then(|p| param_string(p, "rate"))
            .or_else(|| policy.param_str("rate").map(str::to_string))
            .unwrap_or_else(|| DEFAULT_DEV_RATE.to_string());
        let ceil = existing
            .as_ref()
            .and_then(|p| param_string(p, "ceil"))
            .or_else(|| policy.param_str("ceil").map(str::to_string))
            .unwrap_or_else(|| DEFAULT_DEV_CEIL.to_string());

        self.ensure_root_qdisc(&info.iface).await;
        self.replace_class(info.classid, &rate, &ceil, DEFAULT_BURST, prio, &info.iface)
            .await?;
        self.ensure_filter(&info.ip, info.classid, &info.iface).await?;

        record(
            active,
            &policy.target,
            "priority",
            [
                ("priority", Value::from(level.clone())),
                ("prio", Value::from(prio)),
                ("rate", Value::from(rate.clone())),
                ("ceil", Value::from(ceil.clone())),
            ],
        );
        info!(device = %policy.target, ip = %info.ip, iface = %info.iface, %level, prio,
            "priority applied");
        Ok(())
    }

    // ── tc helpers (mutex held by caller) ───────────────────────────────

    /// Create the root HTB qdisc + umbrella classes on `iface` if missing,
    /// then make sure every registered device has a class and filter.
    async fn ensure_root_qdisc(&self, iface: &str) {
        let out = self.tc_output(&["qdisc", "show", "dev", iface]).await;
        if out.contains("htb 1:") {
            self.ensure_device_classes(iface).await;
            return;
        }

        // 'replace' overwrites whatever root qdisc is installed (fq_codel
        // comes by default on many distros)
        let _ = self
            .tc(
                &["qdisc", "replace", "dev", iface, "root", "handle", "1:", "htb", "default", "99"],
                true,
            )
            .await;
        let _ = self
            .tc(
                &[
                    "class", "add", "dev", iface, "parent", "1:", "classid", "1:1", "htb",
                    "rate", DEFAULT_LINK_RATE, "ceil", DEFAULT_LINK_RATE,
                ],
                true,
            )
            .await;
        let _ = self
            .tc(
                &[
                    "class", "add", "dev", iface, "parent", "1:1", "classid", "1:99", "htb",
                    "rate", DEFAULT_DEV_RATE, "ceil", DEFAULT_LINK_RATE,
                ],
                true,
            )
            .await;
        info!(iface, "HTB root tree created");

        self.ensure_device_classes(iface).await;
    }

    /// Create a class + filter for every device on `iface` so tc stats are
    /// populated before any intent. Devices sharing a class are set up once.
    async fn ensure_device_classes(&self, iface: &str) {
        let mut seen: HashSet<u16> = HashSet::new();
        for (_, entry) in self.registry.devices_on(iface) {
            if !seen.insert(entry.classid) {
                continue;
            }
            if let Err(e) = self.ensure_class(entry.classid, iface).await {
                warn!(iface, classid = entry.classid, error = %e, "device class bring-up failed");
                continue;
            }
            if let Err(e) = self.ensure_filter(&entry.ip, entry.classid, iface).await {
                warn!(iface, ip = %entry.ip, error = %e, "device filter bring-up failed");
            }
        }
        if !seen.is_empty() {
            debug!(iface, classids = ?seen, "per-device HTB classes ensured");
        }
    }

    /// Add-or-replace an HTB class under 1:1: try `change` first, fall back
    /// to `add` when the class does not exist yet.
    async fn replace_class(
        &self,
        cid: u16,
        rate: &str,
        ceil: &str,
        burst: &str,
        prio: u8,
        iface: &str,
    ) -> Result<()> {
        let change = class_args("change", cid, rate, ceil, burst, prio, iface);
        let change_refs: Vec<&str> = change.iter().map(String::as_str).collect();
        if self.tc(&change_refs, true).await? != 0 {
            let add = class_args("add", cid, rate, ceil, burst, prio, iface);
            let add_refs: Vec<&str> = add.iter().map(String::as_str).collect();
            self.tc(&add_refs, false).await?;
        }
        Ok(())
    }

    /// Make sure a class exists (with defaults).
    async fn ensure_class(&self, cid: u16, iface: &str) -> Result<()> {
        let out = self.tc_output(&["class", "show", "dev", iface]).await;
        if out.contains(&format!("1:{} ", cid)) {
            return Ok(());
        }
        self.replace_class(cid, DEFAULT_DEV_RATE, DEFAULT_DEV_CEIL, DEFAULT_BURST, 4, iface)
            .await
    }

    async fn del_class(&self, cid: u16, iface: &str) {
        let classid = format!("1:{}", cid);
        let _ = self
            .tc(
                &["class", "del", "dev", iface, "parent", "1:1", "classid", &classid],
                true,
            )
            .await;
    }

    /// Add a u32 filter for `ip` → 1:<cid> unless one is already listed.
    /// The kernel prints matched IPs in hex, so both spellings are checked.
    async fn ensure_filter(&self, ip: &Ipv4Addr, cid: u16, iface: &str) -> Result<()> {
        let out = self.tc_output(&["filter", "show", "dev", iface]).await;
        let hex = ip_to_hex(ip);
        if out.contains(&hex) || out.contains(&ip.to_string()) {
            return Ok(());
        }
        let dst = format!("{}/32", ip);
        let flowid = format!("1:{}", cid);
        self.tc(
            &[
                "filter", "add", "dev", iface, "protocol", "ip", "parent", "1:0", "prio", "1",
                "u32", "match", "ip", "dst", &dst, "flowid", &flowid,
            ],
            false,
        )
        .await?;
        debug!(%ip, %flowid, iface, "filter added");
        Ok(())
    }

    /// Remove the u32 filter for `ip`.
    ///
    /// Preferred path: find the filter's handle in the listing and delete
    /// exactly that one. Only when no handle can be associated does this
    /// fall back to flushing parent 1:0 and re-adding the filters of the
    /// other devices that still have active policies.
    async fn del_filter(
        &self,
        ip: &Ipv4Addr,
        iface: &str,
        active: &HashMap<String, ActivePolicy>,
    ) {
        let out = self.tc_output(&["filter", "show", "dev", iface]).await;
        let hex = ip_to_hex(ip);
        if !out.contains(&hex) && !out.contains(&ip.to_string()) {
            return;
        }

        if let Some(handle) = find_filter_handle(&out, &hex) {
            let _ = self
                .tc(
                    &[
                        "filter", "del", "dev", iface, "parent", "1:0", "prio", "1", "handle",
                        &handle, "u32",
                    ],
                    true,
                )
                .await;
            return;
        }

        // flush everything under 1:0, then restore the survivors
        let _ = self
            .tc(&["filter", "del", "dev", iface, "parent", "1:0"], true)
            .await;
        for (device_id, entry) in self.registry.devices_on(iface) {
            if entry.ip == *ip || !active.contains_key(device_id) {
                continue;
            }
            if let Err(e) = self.ensure_filter(&entry.ip, entry.classid, iface).await {
                warn!(device_id = %device_id, error = %e, "filter restore failed");
            }
        }
    }

    /// Remove the netem qdisc under a class, ignoring its absence.
    async fn del_netem(&self, cid: u16, iface: &str) {
        let parent = format!("1:{}", cid);
        let handle = format!("{}:", cid);
        let _ = self
            .tc(
                &["qdisc", "del", "dev", iface, "parent", &parent, "handle", &handle],
                true,
            )
            .await;
    }

    fn resolve_device(&self, target: &str) -> Result<DeviceEntry> {
        self.registry.get(target).cloned().ok_or_else(|| {
            warn!(device = %target, "device not in registry");
            Error::UnknownDevice(target.to_string())
        })
    }

    /// Run a tc command. With `ok_fail` a non-zero exit is expected and only
    /// the code is returned; otherwise it is an error.
    async fn tc(&self, args: &[&str], ok_fail: bool) -> Result<i32> {
        debug!(cmd = %format!("tc {}", args.join(" ")), "tc");
        let mut cmd = Command::new("tc");
        cmd.args(args).kill_on_drop(true);
        let output = tokio::time::timeout(TC_TIMEOUT, cmd.output())
            .await
            .map_err(|_| Error::Kernel(format!("tc timed out: {}", args.join(" "))))?
            .map_err(Error::Io)?;
        let code = output.status.code().unwrap_or(-1);
        if code != 0 && !ok_fail {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(code, %stderr, "tc failed");
            return Err(Error::Kernel(stderr));
        }
        Ok(code)
    }

    /// Run a read-only tc command and return stdout; failures read as empty.
    async fn tc_output(&self, args: &[&str]) -> String {
        let mut cmd = Command::new("tc");
        cmd.args(args).kill_on_drop(true);
        match tokio::time::timeout(TC_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout).to_string(),
            _ => String::new(),
        }
    }
}

/// Merge new params over any prior record for the device (last writer wins
/// per key) and stamp the record.
fn record<const N: usize>(
    active: &mut HashMap<String, ActivePolicy>,
    device_id: &str,
    policy_type: &str,
    params: [(&str, Value); N],
) {
    let mut merged = active
        .get(device_id)
        .map(|a| a.params.clone())
        .unwrap_or_default();
    for (k, v) in params {
        merged.insert(k.to_string(), v);
    }
    active.insert(
        device_id.to_string(),
        ActivePolicy {
            policy_type: policy_type.to_string(),
            params: merged,
            applied_at: Utc::now(),
        },
    );
}

fn param_string(params: &Map<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Dotted-quad → lowercase 8-hex big-endian, the form tc prints in filter
/// listings (e.g. `10.218.189.80` → `0adabd50`).
pub fn ip_to_hex(ip: &Ipv4Addr) -> String {
    format!("{:08x}", u32::from(*ip))
}

/// HTB class add/change arguments for a device class under 1:1.
fn class_args(
    verb: &str,
    cid: u16,
    rate: &str,
    ceil: &str,
    burst: &str,
    prio: u8,
    iface: &str,
) -> Vec<String> {
    vec![
        "class".into(),
        verb.into(),
        "dev".into(),
        iface.into(),
        "parent".into(),
        "1:1".into(),
        "classid".into(),
        format!("1:{}", cid),
        "htb".into(),
        "rate".into(),
        rate.into(),
        "ceil".into(),
        ceil.into(),
        "burst".into(),
        burst.into(),
        "prio".into(),
        prio.to_string(),
    ]
}

/// netem add arguments for a class: `delay <d> [jitter] [loss <p>]` with
/// handle `<cid>:` under parent `1:<cid>`.
fn netem_args(iface: &str, cid: u16, delay: &str, jitter: &str, loss: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "qdisc".into(),
        "add".into(),
        "dev".into(),
        iface.into(),
        "parent".into(),
        format!("1:{}", cid),
        "handle".into(),
        format!("{}:", cid),
        "netem".into(),
        "delay".into(),
        delay.into(),
    ];
    if !jitter.is_empty() && jitter != "0ms" {
        args.push(jitter.to_string());
    }
    if !loss.is_empty() {
        args.push("loss".to_string());
        args.push(loss.to_string());
    }
    args
}

static FH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfh ([0-9a-f]+::[0-9a-f]+)\b").expect("fh regex"));

/// Associate a u32 filter handle with the filter matching `ip_hex`.
///
/// tc lists each filter as an `fh <handle>` line followed by its match
/// lines; the hash-table headers (`fh 800:`) carry no match and are skipped
/// by requiring the `::` slot form.
pub fn find_filter_handle(listing: &str, ip_hex: &str) -> Option<String> {
    let mut current: Option<String> = None;
    for line in listing.lines() {
        if let Some(caps) = FH_RE.captures(line) {
            current = Some(caps[1].to_string());
        }
        if line.contains(ip_hex) {
            if let Some(handle) = &current {
                return Some(handle.clone());
            }
        }
    }
    None
}
