//! Background poller reconciling metric series with live tc state.
//!
//! Each cycle snapshots tc counters and the active-policy map (both behind
//! the enforcer mutex, so a cycle never observes a half-applied directive)
//! and pushes them into the Prometheus gauges. Devices whose policies
//! disappeared since the previous cycle have their configured gauges reset
//! to zero rather than left stale.

use crate::metrics::{parse_delay_to_ms, parse_rate_to_bps, ControllerMetrics};
use imperium_network::NetworkEnforcer;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Where the active-intent count comes from (the intent-store collaborator).
pub trait IntentSource: Send + Sync {
    fn active_intents(&self) -> usize;
}

pub struct MetricsCollector {
    enforcer: Arc<NetworkEnforcer>,
    metrics: Arc<ControllerMetrics>,
    intents: Option<Arc<dyn IntentSource>>,
    poll_interval: Duration,
    prev_devices: Mutex<HashSet<String>>,
}

impl MetricsCollector {
    pub fn new(
        enforcer: Arc<NetworkEnforcer>,
        metrics: Arc<ControllerMetrics>,
        intents: Option<Arc<dyn IntentSource>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            enforcer,
            metrics,
            intents,
            poll_interval,
            prev_devices: Mutex::new(HashSet::new()),
        }
    }

    /// Start the poll loop on its own task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        info!(interval_secs = self.poll_interval.as_secs(), "metrics collector started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                ticker.tick().await;
                self.collect().await;
            }
        })
    }

    /// One reconciliation cycle. Never raises; a failed snapshot only logs.
    pub async fn collect(&self) {
        // 1. tc counters
        let stats = self.enforcer.collect_tc_stats().await;
        for (device, s) in &stats {
            self.metrics
                .tc_bytes
                .with_label_values(&[device])
                .set(s.bytes_sent as f64);
            self.metrics
                .tc_packets
                .with_label_values(&[device])
                .set(s.packets_sent as f64);
            self.metrics
                .tc_dropped
                .with_label_values(&[device])
                .set(s.dropped as f64);
            self.metrics
                .tc_overlimits
                .with_label_values(&[device])
                .set(s.overlimits as f64);
        }

        // 2. configured policy values, with stale-device reset
        let active = self.enforcer.get_active_policies().await;
        self.metrics.policy_active.set(active.len() as f64);

        let current: HashSet<String> = active.keys().cloned().collect();
        let stale: Vec<String> = {
            let mut prev = match self.prev_devices.lock() {
                Ok(prev) => prev,
                Err(poisoned) => poisoned.into_inner(),
            };
            let stale = prev.difference(&current).cloned().collect();
            *prev = current;
            stale
        };
        for device in stale {
            self.metrics.tc_rate_bps.with_label_values(&[&device]).set(0.0);
            self.metrics.tc_delay_ms.with_label_values(&[&device]).set(0.0);
            self.metrics.tc_priority.with_label_values(&[&device]).set(0.0);
        }

        for (device, policy) in &active {
            let rate = policy
                .params
                .get("rate")
                .and_then(|v| v.as_str())
                .map(parse_rate_to_bps)
                .unwrap_or(0.0);
            self.metrics.tc_rate_bps.with_label_values(&[device]).set(rate);

            let delay = policy
                .params
                .get("delay")
                .and_then(|v| v.as_str())
                .map(parse_delay_to_ms)
                .unwrap_or(0.0);
            self.metrics.tc_delay_ms.with_label_values(&[device]).set(delay);

            let prio = policy
                .params
                .get("prio")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            self.metrics.tc_priority.with_label_values(&[device]).set(prio);
        }

        // 3. active intents, best effort
        if let Some(intents) = &self.intents {
            self.metrics.intent_active.set(intents.active_intents() as f64);
        }

        debug!(devices = stats.len(), policies = active.len(), "metrics cycle complete");
    }
}
