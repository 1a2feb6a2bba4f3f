//! # Cluster Schedulers
//!
//! A [`ClusterScheduler`] picks which backend executes a given task. If the
//! task requires an accelerator type, only backends of that type are
//! candidates. Returning `None` means no suitable backend exists and the
//! workload fails.

use std::collections::HashMap;

use edgeflow_shared::{Cluster, ClusterState, Task};
use tracing::debug;

/// Backend selection strategy for task placement.
pub trait ClusterScheduler: Send {
    /// Select a backend index for `task`, or `None` if no suitable backend
    /// exists.
    fn schedule_task(&mut self, task: &Task, cluster: &Cluster, state: &ClusterState)
        -> Option<u32>;

    /// Completion hook for stateful schedulers. Default: no-op.
    fn notify_task_completed(&mut self, _backend_idx: u32, _task: &Task) {}

    /// Scheduler name for logging.
    fn name(&self) -> &'static str;
}

/// Round-robin placement with a separate cursor per accelerator type.
#[derive(Debug, Default)]
pub struct FirstFitScheduler {
    next_index_by_type: HashMap<String, usize>,
}

impl FirstFitScheduler {
    /// Create a scheduler with all cursors at zero.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClusterScheduler for FirstFitScheduler {
    fn schedule_task(
        &mut self,
        task: &Task,
        cluster: &Cluster,
        _state: &ClusterState,
    ) -> Option<u32> {
        match task.required_accelerator.as_deref() {
            None => {
                let n = cluster.len();
                if n == 0 {
                    debug!("no backends in cluster");
                    return None;
                }
                let cursor = self.next_index_by_type.entry(String::new()).or_insert(0);
                let idx = *cursor % n;
                *cursor = (idx + 1) % n;
                debug!(task_id = task.task_id, backend = idx, "scheduled");
                Some(idx as u32)
            }
            Some(required) => {
                let candidates = cluster.backends_by_type(required);
                if candidates.is_empty() {
                    debug!(accelerator = required, "no backend matches required type");
                    return None;
                }
                let cursor = self
                    .next_index_by_type
                    .entry(required.to_string())
                    .or_insert(0);
                let candidate = *cursor % candidates.len();
                *cursor = (candidate + 1) % candidates.len();
                let backend = candidates[candidate];
                debug!(
                    task_id = task.task_id,
                    backend,
                    accelerator = required,
                    "scheduled"
                );
                Some(backend)
            }
        }
    }

    fn name(&self) -> &'static str {
        "FirstFit"
    }
}

/// Places each task on the candidate backend with the fewest in-flight tasks,
/// breaking ties by lowest index.
#[derive(Debug, Default)]
pub struct LeastLoadedScheduler;

impl LeastLoadedScheduler {
    /// Create the scheduler.
    pub fn new() -> Self {
        Self
    }

    fn argmin(state: &ClusterState, candidates: impl Iterator<Item = u32>) -> Option<u32> {
        let mut best: Option<(u32, u32)> = None;
        for idx in candidates {
            let load = state.get(idx).active_tasks;
            if best.is_none_or(|(_, min)| load < min) {
                best = Some((idx, load));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

impl ClusterScheduler for LeastLoadedScheduler {
    fn schedule_task(
        &mut self,
        task: &Task,
        cluster: &Cluster,
        state: &ClusterState,
    ) -> Option<u32> {
        let chosen = match task.required_accelerator.as_deref() {
            None => Self::argmin(state, 0..cluster.len() as u32),
            Some(required) => {
                Self::argmin(state, cluster.backends_by_type(required).iter().copied())
            }
        };
        match chosen {
            Some(backend) => {
                debug!(
                    task_id = task.task_id,
                    backend,
                    load = state.get(backend).active_tasks,
                    "scheduled"
                );
            }
            None => debug!(task_id = task.task_id, "no suitable backend"),
        }
        chosen
    }

    fn name(&self) -> &'static str {
        "LeastLoaded"
    }
}
