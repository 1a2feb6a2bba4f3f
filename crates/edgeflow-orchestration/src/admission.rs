//! # Admission Policies
//!
//! An [`AdmissionPolicy`] decides, before any payload upload, whether a
//! workload is accepted. Policies are pure decision functions over the DAG
//! metadata, the cluster topology, and current load; they never mutate state.

use edgeflow_shared::{Clock, Cluster, ClusterState, TaskDag};
use tracing::debug;

/// Decides whether a workload may enter the system.
pub trait AdmissionPolicy: Send {
    /// Return true to admit the workload.
    fn should_admit(&self, dag: &TaskDag, cluster: &Cluster, state: &ClusterState) -> bool;

    /// Policy name for logging.
    fn name(&self) -> &'static str;
}

/// Admits every workload. Equivalent to running without a policy; useful as
/// an explicit configuration value.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAdmit;

impl AdmissionPolicy for AlwaysAdmit {
    fn should_admit(&self, _dag: &TaskDag, _cluster: &Cluster, _state: &ClusterState) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "AlwaysAdmit"
    }
}

/// Admits while at least one backend is below an active-task threshold.
#[derive(Debug, Clone, Copy)]
pub struct MaxActiveTasks {
    threshold: u32,
}

impl MaxActiveTasks {
    /// Create a policy with the given per-backend threshold.
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }
}

impl AdmissionPolicy for MaxActiveTasks {
    fn should_admit(&self, _dag: &TaskDag, _cluster: &Cluster, state: &ClusterState) -> bool {
        for (idx, backend) in state.iter().enumerate() {
            if backend.active_tasks < self.threshold {
                debug!(
                    backend = idx,
                    active = backend.active_tasks,
                    threshold = self.threshold,
                    "backend has capacity"
                );
                return true;
            }
        }
        debug!(
            backends = state.len(),
            threshold = self.threshold,
            "all backends at capacity"
        );
        false
    }

    fn name(&self) -> &'static str {
        "MaxActiveTasks"
    }
}

/// Rejects workloads whose deadlined tasks cannot finish in time.
///
/// Earliest start times are computed by a topological walk assuming the
/// configured compute rate. A deadlined task is feasible on a backend when
/// `earliest_start + (active_tasks + 1) * exec_time <= deadline`; the whole
/// DAG is rejected if any deadlined task is infeasible on every candidate
/// backend.
#[derive(Debug, Clone)]
pub struct DeadlineAware {
    compute_rate: f64,
    clock: Clock,
}

impl DeadlineAware {
    /// Create a policy assuming `compute_rate` FLOPS per backend.
    pub fn new(compute_rate: f64, clock: Clock) -> Self {
        Self {
            compute_rate,
            clock,
        }
    }

    fn exec_time_ns(&self, compute_demand: f64) -> i64 {
        (compute_demand / self.compute_rate * 1e9) as i64
    }

    fn can_meet_deadline(
        &self,
        deadline_ns: i64,
        exec_ns: i64,
        active_tasks: u32,
        earliest_start_ns: i64,
    ) -> bool {
        let wait_ns = i64::from(active_tasks) * exec_ns;
        earliest_start_ns + wait_ns + exec_ns <= deadline_ns
    }
}

impl AdmissionPolicy for DeadlineAware {
    fn should_admit(&self, dag: &TaskDag, cluster: &Cluster, state: &ClusterState) -> bool {
        let n = dag.task_count() as usize;
        let now_ns = self.clock.now_ns();

        // Earliest start per task: predecessor completion times assuming the
        // configured compute rate.
        let mut earliest_start = vec![now_ns; n];
        for curr in dag.topological_order() {
            let task = match dag.task(curr) {
                Some(task) => task,
                None => continue,
            };
            let completion = earliest_start[curr as usize] + self.exec_time_ns(task.compute_demand);
            for &s in dag.successors(curr) {
                if completion > earliest_start[s as usize] {
                    earliest_start[s as usize] = completion;
                }
            }
        }

        for idx in 0..dag.task_count() {
            let task = match dag.task(idx) {
                Some(task) => task,
                None => continue,
            };
            let Some(deadline_ns) = task.deadline_ns else {
                continue;
            };
            let exec_ns = self.exec_time_ns(task.compute_demand);
            let start_ns = earliest_start[idx as usize];

            let feasible = match task.required_accelerator.as_deref() {
                None => (0..state.len() as u32).any(|b| {
                    self.can_meet_deadline(deadline_ns, exec_ns, state.get(b).active_tasks, start_ns)
                }),
                Some(kind) => cluster.backends_by_type(kind).iter().any(|&b| {
                    self.can_meet_deadline(deadline_ns, exec_ns, state.get(b).active_tasks, start_ns)
                }),
            };

            if !feasible {
                debug!(
                    task_id = task.task_id,
                    deadline_ns,
                    "rejecting workload: task cannot meet deadline on any backend"
                );
                return false;
            }
        }

        debug!(task_count = dag.task_count(), "admitting workload");
        true
    }

    fn name(&self) -> &'static str {
        "DeadlineAware"
    }
}
