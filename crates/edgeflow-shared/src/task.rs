//! # Task Model
//!
//! A [`Task`] is the leaf unit of work submitted to the orchestrator:
//! a compute demand in FLOPS plus input/output data sizes and optional
//! placement constraints. Tasks are created by clients, serialized into the
//! admission phase (metadata only) and the data phase (with payload), and
//! reconstructed on both the orchestrator and the backend.

/// Task type tag for the built-in simple task codec.
pub const SIMPLE_TASK_TYPE: u8 = 0;

/// A computational task to be executed on a backend accelerator.
///
/// `task_id` is chosen by the client and unique within a DAG. On the backend
/// leg the orchestrator substitutes a wire task ID; the client-visible ID is
/// restored before the response is routed back.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique task identifier within a DAG
    pub task_id: u64,
    /// Task type tag, selects the codec in the registry
    pub task_type: u8,
    /// Compute demand in FLOPS
    pub compute_demand: f64,
    /// Input data size in bytes
    pub input_size: u64,
    /// Output data size in bytes
    pub output_size: u64,
    /// Absolute deadline in nanoseconds on the orchestrator clock
    pub deadline_ns: Option<i64>,
    /// Required accelerator type (e.g. "GPU"). `None` = any backend.
    pub required_accelerator: Option<String>,
}

impl Task {
    /// Create a task with the given ID and the simple task type.
    pub fn new(task_id: u64) -> Self {
        Self {
            task_id,
            task_type: SIMPLE_TASK_TYPE,
            compute_demand: 0.0,
            input_size: 0,
            output_size: 0,
            deadline_ns: None,
            required_accelerator: None,
        }
    }

    /// Set the compute demand in FLOPS.
    pub fn with_compute_demand(mut self, flops: f64) -> Self {
        self.compute_demand = flops;
        self
    }

    /// Set the input data size in bytes.
    pub fn with_input_size(mut self, bytes: u64) -> Self {
        self.input_size = bytes;
        self
    }

    /// Set the output data size in bytes.
    pub fn with_output_size(mut self, bytes: u64) -> Self {
        self.output_size = bytes;
        self
    }

    /// Set an absolute deadline in nanoseconds.
    pub fn with_deadline_ns(mut self, deadline_ns: i64) -> Self {
        self.deadline_ns = Some(deadline_ns);
        self
    }

    /// Require a specific accelerator type.
    pub fn with_required_accelerator(mut self, accelerator: impl Into<String>) -> Self {
        self.required_accelerator = Some(accelerator.into());
        self
    }

    /// Whether this task carries a deadline.
    pub fn has_deadline(&self) -> bool {
        self.deadline_ns.is_some()
    }
}
