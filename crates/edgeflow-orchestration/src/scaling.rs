//! # DVFS Scaling Policies
//!
//! A [`ScalingPolicy`] picks a target operating point for one backend from
//! its current state. Policies are consulted once per backend per scaling
//! tick by the device manager; `None` means "no change".

use edgeflow_shared::BackendState;

/// One frequency/voltage operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatingPoint {
    /// Frequency in Hz
    pub frequency: f64,
    /// Core voltage in Volts
    pub voltage: f64,
}

/// Target setpoint produced by a policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingDecision {
    pub target_frequency: f64,
    pub target_voltage: f64,
}

impl From<OperatingPoint> for ScalingDecision {
    fn from(opp: OperatingPoint) -> Self {
        Self {
            target_frequency: opp.frequency,
            target_voltage: opp.voltage,
        }
    }
}

/// DVFS decision strategy.
pub trait ScalingPolicy: Send {
    /// Decide a new operating point for a backend, or `None` for no change.
    ///
    /// `opps` is the device's operating-point table sorted by ascending
    /// frequency; it always has at least two entries when scaling is enabled.
    fn decide(&self, backend: &BackendState, opps: &[OperatingPoint]) -> Option<ScalingDecision>;

    /// Policy name for logging.
    fn name(&self) -> &'static str;
}

/// Whether the backend currently has work, preferring device-reported
/// metrics over orchestrator-tracked load.
fn backend_busy(backend: &BackendState) -> bool {
    match &backend.device_metrics {
        Some(metrics) => metrics.busy || metrics.queue_len > 0,
        None => backend.active_tasks > 0,
    }
}

fn current_frequency(backend: &BackendState, fallback: f64) -> f64 {
    backend
        .device_metrics
        .as_ref()
        .map_or(fallback, |metrics| metrics.frequency)
}

/// Binary policy: maximum frequency while busy or queued, minimum when idle.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtilizationScalingPolicy;

impl ScalingPolicy for UtilizationScalingPolicy {
    fn decide(&self, backend: &BackendState, opps: &[OperatingPoint]) -> Option<ScalingDecision> {
        if opps.len() < 2 {
            return None;
        }
        let target = if backend_busy(backend) {
            opps[opps.len() - 1]
        } else {
            opps[0]
        };
        let current = current_frequency(backend, 0.0);
        if target.frequency == current {
            return None;
        }
        Some(target.into())
    }

    fn name(&self) -> &'static str {
        "Utilization"
    }
}

/// Steps one operating point up when busy, one down when idle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConservativeScalingPolicy;

impl ScalingPolicy for ConservativeScalingPolicy {
    fn decide(&self, backend: &BackendState, opps: &[OperatingPoint]) -> Option<ScalingDecision> {
        if opps.len() < 2 {
            return None;
        }
        let busy = backend_busy(backend);
        let current = current_frequency(backend, opps[0].frequency);

        // Index of the operating point closest to the reported frequency.
        let mut current_idx = 0;
        let mut min_dist = (opps[0].frequency - current).abs();
        for (i, opp) in opps.iter().enumerate().skip(1) {
            let dist = (opp.frequency - current).abs();
            if dist < min_dist {
                min_dist = dist;
                current_idx = i;
            }
        }

        let target_idx = if busy && current_idx < opps.len() - 1 {
            current_idx + 1
        } else if !busy && current_idx > 0 {
            current_idx - 1
        } else {
            return None;
        };

        Some(opps[target_idx].into())
    }

    fn name(&self) -> &'static str {
        "Conservative"
    }
}
