//! Per-workload bookkeeping and admission-queue types.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use edgeflow_shared::TaskDag;
use tokio::task::JoinHandle;

/// Reasons a workload can be rejected before execution. The string forms are
/// a closed set consumed by drivers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    DeserializationFailed,
    EmptyDag,
    InvalidDag,
    AdmissionRejected,
    DuplicateAdmission,
    AdmissionTimeout,
    ClientDisconnect,
}

impl RejectReason {
    /// The wire/trace string for this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::DeserializationFailed => "deserialization_failed",
            RejectReason::EmptyDag => "empty_dag",
            RejectReason::InvalidDag => "invalid_dag",
            RejectReason::AdmissionRejected => "admission_rejected",
            RejectReason::DuplicateAdmission => "duplicate_admission",
            RejectReason::AdmissionTimeout => "admission_timeout",
            RejectReason::ClientDisconnect => "client_disconnect",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state of one admitted workload.
#[derive(Debug)]
pub struct WorkloadState {
    /// The workload DAG; task slots are replaced by response tasks as they
    /// complete.
    pub dag: TaskDag,
    /// Client the final results are routed to
    pub client_addr: SocketAddr,
    /// Original task ID to backend index, for tasks in flight
    pub task_to_backend: HashMap<u64, u32>,
    /// Tasks dispatched but not yet completed
    pub pending_tasks: u32,
}

impl WorkloadState {
    /// Create state for a freshly admitted workload.
    pub fn new(dag: TaskDag, client_addr: SocketAddr) -> Self {
        Self {
            dag,
            client_addr,
            task_to_backend: HashMap::new(),
            pending_tasks: 0,
        }
    }
}

/// Guard around an admission-timeout timer task; aborts the timer when
/// dropped, so consuming or clearing a pending admission cancels it.
#[derive(Debug)]
pub struct TimeoutHandle(JoinHandle<()>);

impl TimeoutHandle {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }
}

impl Drop for TimeoutHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A Phase-1-accepted admission awaiting its Phase-2 upload.
///
/// TCP ordering ties Phase-2 data to the queue front: the front entry is
/// exactly the admission whose DAG payload the next client bytes describe.
#[derive(Debug)]
pub struct PendingAdmission {
    /// DAG ID from the Phase-1 request
    pub id: u64,
    /// Timeout timer, if an admission timeout is configured
    pub timeout: Option<TimeoutHandle>,
}
