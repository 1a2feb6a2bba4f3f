//! # Device Manager
//!
//! Per-backend DVFS control loop driven off task-lifecycle events. Stores the
//! latest device metrics into [`ClusterState`], evaluates the configured
//! [`ScalingPolicy`] on each scaling tick, and produces scaling commands for
//! the orchestrator to send over the backend connections.

use edgeflow_shared::config::ScalingConfig;
use edgeflow_shared::wire::{DeviceMetricsHeader, ScalingCommandHeader};
use edgeflow_shared::ClusterState;
use tracing::{debug, info};

use crate::scaling::{OperatingPoint, ScalingPolicy};

/// A scaling command for one backend, with the frequency it moves away from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingAction {
    pub backend_idx: u32,
    pub old_frequency: f64,
    pub command: ScalingCommandHeader,
}

/// Evaluates DVFS scaling for the backend cluster.
pub struct DeviceManager {
    policy: Box<dyn ScalingPolicy>,
    opps: Vec<OperatingPoint>,
}

impl DeviceManager {
    /// Create a manager with an explicit operating-point table.
    ///
    /// The table must be sorted by ascending frequency; policies index it
    /// positionally.
    pub fn new(policy: Box<dyn ScalingPolicy>, opps: Vec<OperatingPoint>) -> Self {
        Self { policy, opps }
    }

    /// Create a manager with a linear V-F operating-point table derived from
    /// the configured frequency and voltage bounds.
    pub fn from_config(policy: Box<dyn ScalingPolicy>, config: &ScalingConfig) -> Self {
        let steps = config.steps.max(2) as usize;
        let opps = (0..steps)
            .map(|i| {
                let t = i as f64 / (steps - 1) as f64;
                OperatingPoint {
                    frequency: config.min_frequency
                        + (config.max_frequency - config.min_frequency) * t,
                    voltage: config.min_voltage + (config.max_voltage - config.min_voltage) * t,
                }
            })
            .collect();
        Self::new(policy, opps)
    }

    /// Store metrics reported by backend `backend_idx`.
    pub fn handle_metrics(
        &self,
        backend_idx: u32,
        metrics: DeviceMetricsHeader,
        state: &mut ClusterState,
    ) {
        debug!(
            backend = backend_idx,
            frequency = metrics.frequency,
            busy = metrics.busy,
            queue_len = metrics.queue_len,
            "stored device metrics"
        );
        state.set_device_metrics(backend_idx, metrics);
    }

    /// Run the scaling policy over every backend and collect the commands to
    /// send. Backends the policy leaves alone produce nothing.
    pub fn evaluate_scaling(&self, state: &ClusterState) -> Vec<ScalingAction> {
        let mut actions = Vec::new();
        for (idx, backend) in state.iter().enumerate() {
            let Some(decision) = self.policy.decide(backend, &self.opps) else {
                continue;
            };
            let old_frequency = backend
                .device_metrics
                .as_ref()
                .map_or(0.0, |metrics| metrics.frequency);
            info!(
                backend = idx,
                policy = self.policy.name(),
                old_frequency,
                new_frequency = decision.target_frequency,
                "scaling backend"
            );
            actions.push(ScalingAction {
                backend_idx: idx as u32,
                old_frequency,
                command: ScalingCommandHeader {
                    target_frequency: decision.target_frequency,
                    target_voltage: decision.target_voltage,
                },
            });
        }
        actions
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("policy", &self.policy.name())
            .field("opps", &self.opps)
            .finish()
    }
}
