//! Routes each policy to its enforcement plane.
//!
//! Classification is by policy type, not by the intent type that produced
//! it: one directive can fan out to both planes. Policies are applied in
//! list order; a failure never aborts the rest of the directive.

use imperium_core::{EnforcementPlane, EnforcementResult, Policy};
use imperium_device::DeviceEnforcer;
use imperium_monitoring::ControllerMetrics;
use imperium_network::NetworkEnforcer;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub struct PolicyDispatcher {
    network: Arc<NetworkEnforcer>,
    device: Arc<DeviceEnforcer>,
    metrics: Arc<ControllerMetrics>,
}

impl PolicyDispatcher {
    pub fn new(
        network: Arc<NetworkEnforcer>,
        device: Arc<DeviceEnforcer>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            network,
            device,
            metrics,
        }
    }

    /// Apply the policies of one directive sequentially, recording latency
    /// and outcome per policy under the directive's intent type.
    pub async fn dispatch(&self, intent_type: &str, policies: &[Policy]) -> Vec<EnforcementResult> {
        let mut results = Vec::with_capacity(policies.len());
        for policy in policies {
            let started = Instant::now();
            let success = match policy.policy_type.plane() {
                EnforcementPlane::Network => self.network.apply(policy).await,
                EnforcementPlane::Device => self.device.apply(policy).await,
            };
            self.metrics
                .record_enforcement(intent_type, success, started.elapsed().as_secs_f64());
            if !success {
                warn!(policy_id = %policy.policy_id, policy_type = %policy.policy_type,
                    device = %policy.target, "policy enforcement failed");
            }
            results.push(EnforcementResult {
                policy_id: policy.policy_id.clone(),
                policy_type: policy.policy_type,
                target: policy.target.clone(),
                success,
            });
        }
        results
    }
}
