//! # Cluster State
//!
//! Authoritative per-backend load counters plus the latest device-reported
//! metrics snapshot. Owned and mutated only by the orchestrator core;
//! strategies receive a shared reference on every decision call.

use crate::wire::DeviceMetricsHeader;

/// Per-backend state combining orchestrator-tracked load and device metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendState {
    /// Tasks dispatched but not yet completed
    pub active_tasks: u32,
    /// Lifetime dispatch count
    pub total_dispatched: u32,
    /// Lifetime completion count
    pub total_completed: u32,
    /// Latest device-reported metrics, if any arrived
    pub device_metrics: Option<DeviceMetricsHeader>,
}

/// Centralized view of per-backend load for decision-makers.
#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    backends: Vec<BackendState>,
    active_workloads: u32,
}

impl ClusterState {
    /// Create state sized for `n` backends.
    pub fn with_backends(n: usize) -> Self {
        Self {
            backends: vec![BackendState::default(); n],
            active_workloads: 0,
        }
    }

    /// Number of backends tracked.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether no backends are tracked.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// State of backend `idx`. Panics on out-of-range index: the cluster is
    /// fixed at startup and indices come from the scheduler.
    pub fn get(&self, idx: u32) -> &BackendState {
        &self.backends[idx as usize]
    }

    /// Iterate backend states in index order.
    pub fn iter(&self) -> impl Iterator<Item = &BackendState> {
        self.backends.iter()
    }

    /// Record a dispatch to backend `idx`.
    pub fn notify_task_dispatched(&mut self, idx: u32) {
        let backend = &mut self.backends[idx as usize];
        backend.active_tasks += 1;
        backend.total_dispatched += 1;
    }

    /// Record a completion (or cancellation rollback) on backend `idx`.
    pub fn notify_task_completed(&mut self, idx: u32) {
        let backend = &mut self.backends[idx as usize];
        backend.active_tasks = backend.active_tasks.saturating_sub(1);
        backend.total_completed += 1;
    }

    /// Replace the stored metrics snapshot for backend `idx`.
    pub fn set_device_metrics(&mut self, idx: u32, metrics: DeviceMetricsHeader) {
        if let Some(backend) = self.backends.get_mut(idx as usize) {
            backend.device_metrics = Some(metrics);
        }
    }

    /// Set the live workload count.
    pub fn set_active_workloads(&mut self, count: u32) {
        self.active_workloads = count;
    }

    /// Number of live workloads.
    pub fn active_workloads(&self) -> u32 {
        self.active_workloads
    }

    /// Sum of in-flight tasks across all backends.
    pub fn total_active_tasks(&self) -> u32 {
        self.backends.iter().map(|b| b.active_tasks).sum()
    }
}
